#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use ulid::Ulid;

use toolshed::directory::{InMemoryDirectory, ToolDirectory};
use toolshed::engine::{today, Engine, EngineError};
use toolshed::lifecycle::{BookingService, Collaborators, NewBooking, ServiceSettings};
use toolshed::model::*;
use toolshed::notify::{Notification, Notifier, NotifyHub};
use toolshed::retry::RetryPolicy;

pub fn in_days(n: u64) -> NaiveDate {
    today() + Days::new(n)
}

pub fn range(from: u64, to: u64) -> DateRange {
    DateRange::new(in_days(from), in_days(to))
}

pub fn settings() -> ServiceSettings {
    ServiceSettings {
        brand: "Barrio Tools".into(),
        retry: RetryPolicy {
            max_retries: 2,
            backoff: Duration::from_millis(1),
        },
        call_timeout: Duration::from_millis(500),
    }
}

pub fn open_engine(name: &str) -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("toolshed_it_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    Arc::new(Engine::new(dir.join(format!("{name}.wal"))).unwrap())
}

pub struct Fixture {
    pub service: Arc<BookingService>,
    pub dir: Arc<InMemoryDirectory>,
    pub hub: Arc<NotifyHub>,
}

impl Fixture {
    pub fn new(name: &str) -> Self {
        let dir = Arc::new(InMemoryDirectory::new());
        let hub = Arc::new(NotifyHub::new());
        let collaborators = Collaborators::in_memory(dir.clone(), hub.clone());
        Self::with(name, dir, hub, collaborators, settings())
    }

    pub fn with(
        name: &str,
        dir: Arc<InMemoryDirectory>,
        hub: Arc<NotifyHub>,
        collaborators: Collaborators,
        settings: ServiceSettings,
    ) -> Self {
        let service = Arc::new(BookingService::new(open_engine(name), collaborators, settings));
        Self { service, dir, hub }
    }

    pub fn user(&self, name: &str) -> UserId {
        let id = Ulid::new();
        self.dir.put_user(User {
            id,
            display_name: name.into(),
            active: true,
            location: None,
            reputation: 0,
            rating_count: 0,
        });
        id
    }

    pub fn tool(&self, owner: UserId, nomadic: bool) -> ToolId {
        let id = Ulid::new();
        self.dir.put_tool(Tool {
            id,
            name: "Cordless drill".into(),
            owner_id: owner,
            is_nomadic: nomadic,
            actual_holder_id: None,
            community_id: None,
            max_distance_km: None,
            location: None,
        });
        id
    }

    pub async fn request(
        &self,
        tool_id: ToolId,
        requester: UserId,
        dates: DateRange,
    ) -> Result<Booking, EngineError> {
        self.service
            .create_booking(NewBooking {
                tool_id,
                requester_id: requester,
                range: dates,
                contact: "ana@example.org".into(),
                comments: Some("for the shelves".into()),
            })
            .await
    }

    pub async fn accepted(&self, tool_id: ToolId, requester: UserId, dates: DateRange) -> Booking {
        let b = self.request(tool_id, requester, dates).await.unwrap();
        self.service
            .update_status(b.id, b.to_user_id, BookingStatus::Accepted)
            .await
            .unwrap()
    }

    /// Requested, accepted and returned: ready to rate.
    pub async fn returned(&self, tool_id: ToolId, requester: UserId, dates: DateRange) -> Booking {
        let b = self.accepted(tool_id, requester, dates).await;
        self.service
            .update_status(b.id, b.to_user_id, BookingStatus::Returned)
            .await
            .unwrap()
    }
}

/// Tool directory whose holder updates fail a set number of times.
pub struct FlakyTools {
    pub inner: Arc<InMemoryDirectory>,
    pub failures: AtomicU32,
}

impl FlakyTools {
    pub fn new(inner: Arc<InMemoryDirectory>, failures: u32) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl ToolDirectory for FlakyTools {
    async fn tool(&self, id: ToolId) -> Result<Option<Tool>, EngineError> {
        self.inner.tool(id).await
    }

    async fn set_actual_holder(&self, id: ToolId, holder: UserId) -> Result<(), EngineError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(EngineError::Unavailable("tool service down".into()));
        }
        self.inner.set_actual_holder(id, holder).await
    }
}

/// Notifier that never delivers.
pub struct FailingNotifier {
    pub attempts: AtomicU32,
}

#[async_trait]
impl Notifier for FailingNotifier {
    async fn dispatch(&self, _notification: Notification) -> Result<(), EngineError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(EngineError::Unavailable("smtp relay refused".into()))
    }
}

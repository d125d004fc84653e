//! The booking lifecycle: request, decide, hand over, return, rate.
//!
//! `BookingService` sits between the API layer and the booking repository.
//! It validates input, consults the tool/user/community directories,
//! applies every status change as a compare-and-swap, and fans out
//! notifications once the authoritative state is committed.

mod propagation;
mod rating;
mod transition;

pub use rating::{reputation, RatingRequest};
pub use transition::{authorize, next_statuses, required_role, Role};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures::future::join_all;
use tracing::{info, warn};
use ulid::Ulid;

use crate::config::Config;
use crate::directory::{CommunityDirectory, InMemoryDirectory, ToolDirectory, UserDirectory};
use crate::engine::{today, CasOutcome, Engine, EngineError};
use crate::limits::*;
use crate::model::*;
use crate::notify::{Notification, NotificationKind, Notifier};
use crate::observability;
use crate::retry::RetryPolicy;

/// The systems the lifecycle reads from and reports to.
pub struct Collaborators {
    pub tools: Arc<dyn ToolDirectory>,
    pub users: Arc<dyn UserDirectory>,
    pub communities: Arc<dyn CommunityDirectory>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    /// One in-process directory serving tools, users and communities.
    pub fn in_memory(directory: Arc<InMemoryDirectory>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            tools: directory.clone(),
            users: directory.clone(),
            communities: directory,
            notifier,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    pub brand: String,
    pub retry: RetryPolicy,
    /// Upper bound for a single collaborator call or notification.
    pub call_timeout: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            brand: "Toolshed".into(),
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(2),
        }
    }
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            brand: config.brand.clone(),
            retry: config.retry,
            call_timeout: config.store_timeout,
        }
    }
}

/// A booking request as submitted by the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub tool_id: ToolId,
    pub requester_id: UserId,
    pub range: DateRange,
    pub contact: String,
    pub comments: Option<String>,
}

pub struct BookingService {
    engine: Arc<Engine>,
    tools: Arc<dyn ToolDirectory>,
    users: Arc<dyn UserDirectory>,
    communities: Arc<dyn CommunityDirectory>,
    notifier: Arc<dyn Notifier>,
    settings: ServiceSettings,
}

impl BookingService {
    pub fn new(engine: Arc<Engine>, collaborators: Collaborators, settings: ServiceSettings) -> Self {
        Self {
            engine,
            tools: collaborators.tools,
            users: collaborators.users,
            communities: collaborators.communities,
            notifier: collaborators.notifier,
            settings,
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    // ── Operations ───────────────────────────────────────────

    /// CreateBooking: validate, check the requester may borrow the tool,
    /// and insert a PENDING booking addressed to the tool's recipient.
    pub async fn create_booking(&self, request: NewBooking) -> Result<Booking, EngineError> {
        let NewBooking {
            tool_id,
            requester_id,
            range,
            contact,
            comments,
        } = request;
        validate_request(&range, &contact, comments.as_deref(), today())?;

        let tool = self.require_tool(tool_id).await?;
        let requester = self.require_user(requester_id).await?;
        if !requester.active {
            return Err(EngineError::Forbidden("requester account is inactive"));
        }
        let recipient_id = tool.recipient();
        if recipient_id != requester_id {
            let recipient = self.require_user(recipient_id).await?;
            if !recipient.active {
                return Err(EngineError::Forbidden("recipient account is inactive"));
            }
        }
        if let Some(community) = tool.community_id {
            let member = self
                .call("membership check", || self.communities.is_member(requester_id, community))
                .await?;
            if !member {
                return Err(EngineError::Forbidden("requester is not a member of the tool's community"));
            }
        }
        check_distance(&tool, &requester)?;

        let draft = Booking {
            id: Ulid::new(),
            tool_id,
            from_user_id: requester_id,
            to_user_id: recipient_id,
            range,
            status: BookingStatus::Pending,
            contact: contact.trim().to_string(),
            comments: comments
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            ratings: Ratings::default(),
            created_at: 0,
            updated_at: 0,
        };
        let booking = self
            .store("insert booking", || self.engine.insert_booking(draft.clone()))
            .await?;
        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        info!(
            "booking {} requested: tool {} by {} for {}..{}",
            booking.id, tool_id, requester_id, range.start, range.end
        );

        self.deliver(vec![self.notification(
            booking.to_user_id,
            NotificationKind::BookingRequested,
            &booking,
            &tool.name,
            None,
        )])
        .await;
        Ok(booking)
    }

    /// UpdateStatus: move a booking along the transition table on behalf of
    /// `actor`.
    pub async fn update_status(
        &self,
        booking_id: BookingId,
        actor: UserId,
        to: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let booking = self.engine.get_booking(booking_id).await?;

        // Repeating a pickup whose propagation never finished resumes it.
        if to == BookingStatus::Picked
            && booking.status == BookingStatus::Picked
            && booking.to_user_id == actor
            && self.engine.pending_propagation(&booking_id).is_some()
        {
            self.resume_propagation(booking_id).await?;
            return self.engine.get_booking(booking_id).await;
        }

        authorize(&booking, actor, to)?;
        let tool = if to == BookingStatus::Picked {
            let tool = self.require_tool(booking.tool_id).await?;
            if !tool.is_nomadic {
                return Err(EngineError::NotNomadic(tool.id));
            }
            Some(tool)
        } else {
            None
        };

        let expected = booking.status;
        let outcome = self
            .store("status change", || {
                self.engine.compare_and_swap_status(booking_id, expected, to)
            })
            .await?;
        let updated = match outcome {
            CasOutcome::Applied(b) => b,
            CasOutcome::NotApplied { actual } => {
                metrics::counter!(observability::STALE_TRANSITIONS_TOTAL).increment(1);
                return Err(EngineError::StaleStatus {
                    id: booking_id,
                    expected,
                    actual,
                });
            }
        };
        metrics::counter!(
            observability::TRANSITIONS_TOTAL,
            "from" => expected.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
        info!("booking {booking_id}: {expected} -> {to} by {actor}");

        let tool_name = match tool {
            Some(tool) => {
                let name = tool.name.clone();
                self.finish_pickup(&updated, tool).await?;
                name
            }
            None => self.tool_name(updated.tool_id).await,
        };

        let recipient = match to {
            BookingStatus::Cancelled => updated.to_user_id,
            _ => updated.from_user_id,
        };
        self.deliver(vec![self.notification(
            recipient,
            NotificationKind::for_status(to),
            &updated,
            &tool_name,
            None,
        )])
        .await;
        Ok(updated)
    }

    pub async fn booking(&self, id: BookingId) -> Result<Booking, EngineError> {
        self.engine.get_booking(id).await
    }

    /// ListBookings: PENDING first, then newest first.
    pub async fn list_bookings(
        &self,
        filter: &ListFilter,
        page: PageRequest,
    ) -> Result<Page<Booking>, EngineError> {
        self.engine.list_bookings(filter, page).await
    }

    pub async fn has_conflict(&self, tool_id: ToolId, range: &DateRange) -> Result<bool, EngineError> {
        self.engine.has_conflict(tool_id, range).await
    }

    // ── Collaborator access ──────────────────────────────────

    /// A collaborator call: bounded by the call timeout, transient failures retried.
    async fn call<T, F, Fut>(&self, what: &'static str, mut op: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let limit = self.settings.call_timeout;
        self.settings
            .retry
            .run(what, move || {
                let attempt = op();
                async move {
                    match tokio::time::timeout(limit, attempt).await {
                        Ok(result) => result,
                        Err(_) => Err(EngineError::StoreTimeout),
                    }
                }
            })
            .await
    }

    /// A repository write. The engine bounds its own WAL appends.
    async fn store<T, F, Fut>(&self, what: &'static str, op: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        self.settings.retry.run(what, op).await
    }

    async fn require_tool(&self, id: ToolId) -> Result<Tool, EngineError> {
        self.call("tool lookup", || self.tools.tool(id))
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    async fn require_user(&self, id: UserId) -> Result<User, EngineError> {
        self.call("user lookup", || self.users.user(id))
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    /// For notification text only; falls back to the id.
    async fn tool_name(&self, id: ToolId) -> String {
        match self.call("tool lookup", || self.tools.tool(id)).await {
            Ok(Some(tool)) => tool.name,
            Ok(None) => id.to_string(),
            Err(e) => {
                warn!("tool {id} lookup for notification failed: {e}");
                id.to_string()
            }
        }
    }

    async fn display_name(&self, id: UserId) -> String {
        match self.call("user lookup", || self.users.user(id)).await {
            Ok(Some(user)) => user.display_name,
            Ok(None) => id.to_string(),
            Err(e) => {
                warn!("user {id} lookup for notification failed: {e}");
                id.to_string()
            }
        }
    }

    // ── Notifications ────────────────────────────────────────

    fn notification(
        &self,
        recipient: UserId,
        kind: NotificationKind,
        booking: &Booking,
        tool_name: &str,
        holder_name: Option<String>,
    ) -> Notification {
        Notification {
            recipient,
            kind,
            booking_id: booking.id,
            tool_id: booking.tool_id,
            tool_name: tool_name.to_string(),
            holder_name,
            brand: self.settings.brand.clone(),
        }
    }

    /// Best effort: failures are logged and counted, never returned.
    async fn deliver(&self, notifications: Vec<Notification>) {
        let limit = self.settings.call_timeout;
        let sends = notifications.into_iter().map(|n| {
            let (recipient, kind) = (n.recipient, n.kind);
            async move {
                let outcome = tokio::time::timeout(limit, self.notifier.dispatch(n)).await;
                let err = match outcome {
                    Ok(Ok(())) => return,
                    Ok(Err(e)) => e,
                    Err(_) => EngineError::StoreTimeout,
                };
                metrics::counter!(observability::NOTIFY_FAILURES_TOTAL).increment(1);
                warn!("notification {kind:?} to {recipient} failed: {err}");
            }
        });
        join_all(sends).await;
    }
}

/// Shape checks on a booking request that need no lookups.
fn validate_request(
    range: &DateRange,
    contact: &str,
    comments: Option<&str>,
    today: NaiveDate,
) -> Result<(), EngineError> {
    range.ensure_ordered()?;
    if range.start < today {
        return Err(EngineError::Invalid("booking cannot start in the past"));
    }
    if range.days() > MAX_BOOKING_DAYS {
        return Err(EngineError::Invalid("booking is too long"));
    }
    if contact.trim().is_empty() {
        return Err(EngineError::Invalid("contact is required"));
    }
    if contact.len() > MAX_CONTACT_LEN {
        return Err(EngineError::Invalid("contact too long"));
    }
    if comments.is_some_and(|c| c.len() > MAX_COMMENTS_LEN) {
        return Err(EngineError::Invalid("comments too long"));
    }
    Ok(())
}

/// A tool with a radius only lends to requesters known to be inside it.
fn check_distance(tool: &Tool, requester: &User) -> Result<(), EngineError> {
    let Some(max_km) = tool.max_distance_km else {
        return Ok(());
    };
    match (tool.location, requester.location) {
        (Some(at), Some(from)) if at.distance_km(&from) <= max_km => Ok(()),
        _ => Err(EngineError::Forbidden("requester is outside the tool's radius")),
    }
}

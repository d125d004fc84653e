mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use conflict::{find_conflict, now_ms, today};
pub use error::{EngineError, ErrorKind};
pub use mutations::CasOutcome;
pub use queries::request_order;
pub use store::{BookingStore, SharedToolBookings, ToolBookings};

use std::io;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, warn};

use crate::model::*;
use crate::wal::Wal;

const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while a flush is running are
/// committed together with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                run_maintenance(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            run_maintenance(&mut wal, cmd);
        }
    }
    debug!("WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so stray bytes don't leak into the next batch.
    let flushed = wal.flush_sync();
    let outcome = appended.and(flushed);

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &outcome {
        warn!("WAL batch of {} failed: {e}", batch.len());
    }
    for (_, tx) in batch {
        let reply = match &outcome {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn run_maintenance(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// The booking repository: indexed in-memory state made durable by the WAL.
///
/// Every write goes WAL-first and is applied in memory only after the
/// append is acknowledged, while the owning tool's write lock is held.
pub struct Engine {
    pub(super) store: BookingStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Shared by writers, exclusive for compaction, so a snapshot never
    /// misses an append that lands between reading a tool and the swap.
    pub(super) compaction_gate: Arc<RwLock<()>>,
    store_timeout: Duration,
    last_created_at: AtomicI64,
}

/// Write access to one tool's bookings, holding the compaction gate.
pub(super) struct ToolWrite {
    guard: OwnedRwLockWriteGuard<ToolBookings>,
    _gate: OwnedRwLockReadGuard<()>,
}

impl Deref for ToolWrite {
    type Target = ToolBookings;

    fn deref(&self) -> &ToolBookings {
        &self.guard
    }
}

impl DerefMut for ToolWrite {
    fn deref_mut(&mut self) -> &mut ToolBookings {
        &mut self.guard
    }
}

/// Apply an event to the tool it belongs to. Caller holds the tool's write lock.
fn apply_to_tool(tb: &mut ToolBookings, event: &Event, store: &BookingStore) {
    match event {
        Event::BookingCreated { booking } => {
            match tb.get_mut(&booking.id) {
                Some(existing) => *existing = booking.clone(),
                None => tb.insert(booking.clone()),
            }
            store.index_booking(booking);
            for side in [RatingSide::Owner, RatingSide::Requester] {
                if let Some(entry) = booking.ratings.get(side) {
                    store.record_rating(booking.rated_party(side), booking.id, side, entry.rating);
                }
            }
        }
        Event::StatusChanged { id, tool_id, to, at, .. } => {
            if let Some(b) = tb.get_mut(id) {
                b.status = *to;
                b.updated_at = *at;
                if *to == BookingStatus::Picked {
                    store.mark_pending(PendingPropagation {
                        booking_id: *id,
                        tool_id: *tool_id,
                        holder_id: b.from_user_id,
                    });
                }
            }
        }
        Event::RecipientChanged { id, to_user_id, at, .. } => {
            if let Some(b) = tb.get_mut(id) {
                let previous = std::mem::replace(&mut b.to_user_id, *to_user_id);
                b.updated_at = *at;
                store.move_incoming(*id, previous, *to_user_id);
            }
        }
        Event::RatingAttached { id, side, rated_user_id, entry, .. } => {
            if let Some(b) = tb.get_mut(id) {
                *b.ratings.slot_mut(*side) = Some(entry.clone());
                b.updated_at = entry.rated_at;
                store.record_rating(*rated_user_id, *id, *side, entry.rating);
            }
        }
        Event::PropagationPending(_) | Event::PropagationCompleted { .. } => {
            apply_to_store(event, store)
        }
    }
}

/// Events that only touch store-level indexes.
fn apply_to_store(event: &Event, store: &BookingStore) {
    match event {
        Event::PropagationPending(pending) => store.mark_pending(*pending),
        Event::PropagationCompleted { booking_id } => {
            store.clear_pending(booking_id);
        }
        _ => {}
    }
}

/// The tool an event belongs to, for events applied under a tool lock.
fn event_tool_id(event: &Event) -> Option<ToolId> {
    match event {
        Event::BookingCreated { booking } => Some(booking.tool_id),
        Event::StatusChanged { tool_id, .. }
        | Event::RecipientChanged { tool_id, .. }
        | Event::RatingAttached { tool_id, .. } => Some(*tool_id),
        Event::PropagationPending(_) | Event::PropagationCompleted { .. } => None,
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        Self::with_timeout(wal_path, DEFAULT_STORE_TIMEOUT)
    }

    /// Replay the WAL at `wal_path` and start its writer task.
    /// Must be called inside a Tokio runtime.
    pub fn with_timeout(wal_path: PathBuf, store_timeout: Duration) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: BookingStore::new(),
            wal_tx,
            compaction_gate: Arc::new(RwLock::new(())),
            store_timeout,
            last_created_at: AtomicI64::new(0),
        };

        // Nothing else holds these locks yet, so try_write cannot fail. Never
        // block here: this may run inside an async context.
        let mut newest = 0;
        for event in &events {
            if let Event::BookingCreated { booking } = event {
                newest = newest.max(booking.created_at);
            }
            match event_tool_id(event) {
                Some(tool_id) => {
                    let tb = engine.store.tool_or_insert(tool_id);
                    let mut guard = tb.try_write().expect("replay: uncontended write");
                    apply_to_tool(&mut guard, event, &engine.store);
                }
                None => apply_to_store(event, &engine.store),
            }
        }
        engine.last_created_at.store(newest, Ordering::SeqCst);
        debug!(
            "replayed {} events: {} bookings, {} pending propagations",
            events.len(),
            engine.store.booking_count(),
            engine.store.all_pending().len()
        );

        Ok(engine)
    }

    /// Hand an event to the group-commit writer and wait for the fsync.
    ///
    /// Only the enqueue is bounded by the store timeout. A queued event is
    /// written whether or not anyone waits for it, so once it is queued the
    /// caller waits for the writer's verdict and memory follows the log.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        let command = WalCommand::Append {
            event: event.clone(),
            response: tx,
        };
        match tokio::time::timeout(self.store_timeout, self.wal_tx.send(command)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(EngineError::WalError("WAL writer shut down".into())),
            Err(_) => {
                metrics::counter!(crate::observability::STORE_TIMEOUTS_TOTAL).increment(1);
                return Err(EngineError::StoreTimeout);
            }
        }
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append, then apply to the locked tool.
    pub(super) async fn persist_and_apply(
        &self,
        tb: &mut ToolBookings,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_tool(tb, event, &self.store);
        Ok(())
    }

    /// WAL-append, then apply a store-level event.
    pub(super) async fn persist_and_apply_store(&self, event: &Event) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        self.wal_append(event).await?;
        apply_to_store(event, &self.store);
        Ok(())
    }

    /// Gate first, then the tool lock. Compaction takes them in the same order.
    pub(super) async fn lock_tool(&self, tb: SharedToolBookings) -> ToolWrite {
        let gate = self.compaction_gate.clone().read_owned().await;
        ToolWrite {
            guard: tb.write_owned().await,
            _gate: gate,
        }
    }

    /// Lookup booking → tool and take the tool's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        id: &BookingId,
    ) -> Result<ToolWrite, EngineError> {
        let tool_id = self
            .store
            .tool_for_booking(id)
            .ok_or(EngineError::NotFound(*id))?;
        let tb = self
            .store
            .get_tool(&tool_id)
            .ok_or(EngineError::NotFound(tool_id))?;
        Ok(self.lock_tool(tb).await)
    }

    /// Strictly increasing creation stamp, close to wall-clock time.
    pub(super) fn next_created_at(&self) -> Ms {
        let now = now_ms();
        let previous = self
            .last_created_at
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some((last + 1).max(now))
            })
            .unwrap_or_else(|last| last);
        (previous + 1).max(now)
    }
}

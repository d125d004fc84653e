use chrono::NaiveDate;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::limits::*;
use crate::model::*;

use super::conflict::{find_conflict, now_ms};
use super::{Engine, EngineError, WalCommand};

/// Result of a status compare-and-swap on an existing booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    Applied(Booking),
    /// The booking exists but was not in the expected status.
    NotApplied { actual: BookingStatus },
}

impl Engine {
    /// Insert a new PENDING booking unless a committed booking overlaps it.
    ///
    /// `created_at`/`updated_at` are stamped here. Re-inserting an id that
    /// already exists returns the stored booking, so a timed-out insert can
    /// be retried with the same id.
    pub async fn insert_booking(&self, mut booking: Booking) -> Result<Booking, EngineError> {
        booking.range.ensure_ordered()?;
        let tb = self.store.tool_or_insert(booking.tool_id);
        let mut guard = self.lock_tool(tb).await;

        if let Some(existing) = guard.get(&booking.id) {
            return Ok(existing.clone());
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_TOOL {
            return Err(EngineError::Invalid("too many bookings on tool"));
        }
        if let Some(blocking) = find_conflict(&guard, &booking.range, None) {
            metrics::counter!(crate::observability::CONFLICTS_TOTAL, "stage" => "create")
                .increment(1);
            return Err(EngineError::Conflict(blocking));
        }

        booking.status = BookingStatus::Pending;
        booking.created_at = self.next_created_at();
        booking.updated_at = booking.created_at;
        let event = Event::BookingCreated { booking: booking.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!("booking {} inserted for tool {}", booking.id, booking.tool_id);
        Ok(booking)
    }

    /// Set `status = to` where `status = expected`.
    ///
    /// Moving into a committed status (ACCEPTED/PICKED) from an uncommitted
    /// one re-runs the conflict check under the same lock.
    pub async fn compare_and_swap_status(
        &self,
        id: BookingId,
        expected: BookingStatus,
        to: BookingStatus,
    ) -> Result<CasOutcome, EngineError> {
        let mut guard = self.resolve_booking_write(&id).await?;
        let current = guard.get(&id).ok_or(EngineError::NotFound(id))?;
        if current.status != expected {
            return Ok(CasOutcome::NotApplied { actual: current.status });
        }
        if to.is_committed() && !expected.is_committed() {
            let range = current.range;
            if let Some(blocking) = find_conflict(&guard, &range, Some(id)) {
                metrics::counter!(crate::observability::CONFLICTS_TOTAL, "stage" => "accept")
                    .increment(1);
                return Err(EngineError::Conflict(blocking));
            }
        }

        let event = Event::StatusChanged {
            id,
            tool_id: guard.tool_id,
            from: expected,
            to,
            at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let updated = guard.get(&id).cloned().ok_or(EngineError::NotFound(id))?;
        Ok(CasOutcome::Applied(updated))
    }

    /// Point every future PENDING/ACCEPTED booking of `tool_id` other than
    /// `exclude` at `holder`. Returns the bookings that actually changed;
    /// running it again with the same holder changes nothing.
    pub async fn retarget_future_bookings(
        &self,
        tool_id: ToolId,
        exclude: BookingId,
        holder: UserId,
        today: NaiveDate,
    ) -> Result<Vec<Booking>, EngineError> {
        let Some(tb) = self.store.get_tool(&tool_id) else {
            return Ok(Vec::new());
        };
        let mut guard = self.lock_tool(tb).await;

        let targets: Vec<BookingId> = guard
            .bookings
            .iter()
            .filter(|b| {
                b.id != exclude
                    && matches!(b.status, BookingStatus::Pending | BookingStatus::Accepted)
                    && b.range.start > today
                    && b.to_user_id != holder
            })
            .map(|b| b.id)
            .collect();

        let mut changed = Vec::with_capacity(targets.len());
        for id in targets {
            let event = Event::RecipientChanged {
                id,
                tool_id,
                to_user_id: holder,
                at: now_ms(),
            };
            self.persist_and_apply(&mut guard, &event).await?;
            if let Some(b) = guard.get(&id) {
                changed.push(b.clone());
            }
        }
        if !changed.is_empty() {
            info!("tool {tool_id}: {} future bookings now addressed to {holder}", changed.len());
        }
        Ok(changed)
    }

    /// Store a rating in the `side` slot if it is still empty and the
    /// booking is in a ratable status.
    pub async fn attach_rating(
        &self,
        id: BookingId,
        side: RatingSide,
        entry: RatingEntry,
    ) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(&id).await?;
        let current = guard.get(&id).ok_or(EngineError::NotFound(id))?;
        if !current.status.is_ratable() {
            return Err(EngineError::NotRatable(current.status));
        }
        if current.ratings.get(side).is_some() {
            return Err(EngineError::AlreadyRated { id, side });
        }

        let event = Event::RatingAttached {
            id,
            tool_id: guard.tool_id,
            side,
            rated_user_id: current.rated_party(side),
            entry,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Clear the pending-propagation marker of a picked booking. No-op if
    /// nothing is pending.
    pub async fn complete_propagation(&self, booking_id: BookingId) -> Result<(), EngineError> {
        if self.store.pending(&booking_id).is_none() {
            return Ok(());
        }
        self.persist_and_apply_store(&Event::PropagationCompleted { booking_id })
            .await
    }

    /// Rewrite the WAL as one snapshot per booking plus outstanding
    /// propagation markers.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;
        let mut events = Vec::with_capacity(self.store.booking_count());
        for tool_id in self.store.tool_ids() {
            let Some(tb) = self.store.get_tool(&tool_id) else { continue };
            let guard = tb.read().await;
            events.extend(
                guard
                    .bookings
                    .iter()
                    .map(|b| Event::BookingCreated { booking: b.clone() }),
            );
        }
        events.extend(self.store.all_pending().into_iter().map(Event::PropagationPending));

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

use tracing::{debug, info, warn};

use crate::engine::{today, EngineError};
use crate::model::*;
use crate::notify::NotificationKind;
use crate::observability;

use super::BookingService;

impl BookingService {
    /// Steps (2)–(4) of a pickup. The PICKED status change already recorded
    /// the propagation as pending, so anything left undone here is picked up
    /// again by `resume_propagation`.
    ///
    /// Fails only if the holder pointer could not be set. Once it is set the
    /// pickup is reported as done and booking rewrites may be finished later.
    pub(super) async fn finish_pickup(&self, picked: &Booking, tool: Tool) -> Result<(), EngineError> {
        let pending = PendingPropagation {
            booking_id: picked.id,
            tool_id: picked.tool_id,
            holder_id: picked.from_user_id,
        };
        self.assign_holder(&tool, pending.holder_id).await?;
        if let Err(e) = self.rewrite_future_bookings(&tool, pending).await {
            warn!("propagation for booking {} left pending: {e}", picked.id);
        }
        Ok(())
    }

    /// Re-run an unfinished propagation. Returns false when nothing was
    /// pending for `booking_id`. Safe to call any number of times.
    pub async fn resume_propagation(&self, booking_id: BookingId) -> Result<bool, EngineError> {
        let Some(pending) = self.engine.pending_propagation(&booking_id) else {
            return Ok(false);
        };
        let tool = self.require_tool(pending.tool_id).await?;
        self.assign_holder(&tool, pending.holder_id).await?;
        self.rewrite_future_bookings(&tool, pending).await?;
        info!("resumed propagation for booking {booking_id}");
        Ok(true)
    }

    async fn assign_holder(&self, tool: &Tool, holder: UserId) -> Result<(), EngineError> {
        self.call("set holder", || self.tools.set_actual_holder(tool.id, holder))
            .await?;
        debug!("tool {} now held by {holder}", tool.id);
        Ok(())
    }

    /// Point the tool's future bookings at the new holder, mark the
    /// propagation complete, then tell each new counterparty.
    async fn rewrite_future_bookings(
        &self,
        tool: &Tool,
        pending: PendingPropagation,
    ) -> Result<usize, EngineError> {
        let changed = self
            .store("rewrite future bookings", || {
                self.engine.retarget_future_bookings(
                    pending.tool_id,
                    pending.booking_id,
                    pending.holder_id,
                    today(),
                )
            })
            .await?;
        self.store("complete propagation", || {
            self.engine.complete_propagation(pending.booking_id)
        })
        .await?;

        metrics::counter!(observability::HOLDER_REWRITES_TOTAL).increment(changed.len() as u64);
        metrics::gauge!(observability::PROPAGATIONS_PENDING)
            .set(self.engine.pending_propagations().len() as f64);

        if !changed.is_empty() {
            let holder_name = self.display_name(pending.holder_id).await;
            let notes = changed
                .iter()
                .map(|b| {
                    self.notification(
                        b.to_user_id,
                        NotificationKind::HolderChanged,
                        b,
                        &tool.name,
                        Some(holder_name.clone()),
                    )
                })
                .collect();
            self.deliver(notes).await;
        }
        Ok(changed.len())
    }
}

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::limits::*;
use crate::model::*;

use super::conflict::find_conflict;
use super::{Engine, EngineError};

/// PENDING first, then newest `created_at` first. Ids break exact ties.
pub fn request_order(a: &Booking, b: &Booking) -> Ordering {
    let a_rest = a.status != BookingStatus::Pending;
    let b_rest = b.status != BookingStatus::Pending;
    a_rest
        .cmp(&b_rest)
        .then(b.created_at.cmp(&a.created_at))
        .then(b.id.cmp(&a.id))
}

impl Engine {
    pub async fn get_booking(&self, id: BookingId) -> Result<Booking, EngineError> {
        let tool_id = self
            .store
            .tool_for_booking(&id)
            .ok_or(EngineError::NotFound(id))?;
        let tb = self
            .store
            .get_tool(&tool_id)
            .ok_or(EngineError::NotFound(tool_id))?;
        let guard = tb.read().await;
        guard.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// All bookings of a tool in start order. Unknown tools have none.
    pub async fn bookings_for_tool(&self, tool_id: ToolId) -> Vec<Booking> {
        match self.store.get_tool(&tool_id) {
            Some(tb) => tb.read().await.bookings.clone(),
            None => Vec::new(),
        }
    }

    /// Bookings a user received (`Incoming`) or made (`Outgoing`).
    pub async fn bookings_for_user(&self, user_id: UserId, direction: Direction) -> Vec<Booking> {
        let ids = match direction {
            Direction::Incoming => self.store.incoming_ids(&user_id),
            Direction::Outgoing => self.store.outgoing_ids(&user_id),
        };

        let mut by_tool: HashMap<ToolId, Vec<BookingId>> = HashMap::new();
        for id in ids {
            if let Some(tool_id) = self.store.tool_for_booking(&id) {
                by_tool.entry(tool_id).or_default().push(id);
            }
        }

        let mut out = Vec::new();
        for (tool_id, ids) in by_tool {
            let Some(tb) = self.store.get_tool(&tool_id) else { continue };
            let guard = tb.read().await;
            out.extend(
                ids.iter()
                    .filter_map(|id| guard.get(id))
                    // Ids were read before taking the lock; recheck ownership under it.
                    .filter(|b| match direction {
                        Direction::Incoming => b.to_user_id == user_id,
                        Direction::Outgoing => b.from_user_id == user_id,
                    })
                    .cloned(),
            );
        }
        out
    }

    /// Every booking matching `filter`, in request order.
    pub(super) async fn query_bookings(&self, filter: &ListFilter) -> Vec<Booking> {
        let candidates = match filter.subject {
            Subject::Tool(tool_id) => self.bookings_for_tool(tool_id).await,
            Subject::User { user_id, direction } => {
                self.bookings_for_user(user_id, direction).await
            }
        };
        let mut matching: Vec<Booking> =
            candidates.into_iter().filter(|b| filter.matches(b)).collect();
        matching.sort_by(request_order);
        matching
    }

    pub async fn list_bookings(
        &self,
        filter: &ListFilter,
        page: PageRequest,
    ) -> Result<Page<Booking>, EngineError> {
        if page.limit == 0 || page.limit > MAX_PAGE_SIZE {
            return Err(EngineError::Invalid("page size out of range"));
        }
        if let Some(range) = &filter.range {
            range.ensure_ordered()?;
        }
        let matching = self.query_bookings(filter).await;
        let total = matching.len();
        let items = matching.into_iter().skip(page.offset).take(page.limit).collect();
        Ok(Page { items, total })
    }

    /// Whether a committed booking of `tool_id` overlaps `range`.
    pub async fn has_conflict(&self, tool_id: ToolId, range: &DateRange) -> Result<bool, EngineError> {
        range.ensure_ordered()?;
        Ok(match self.store.get_tool(&tool_id) {
            Some(tb) => find_conflict(&*tb.read().await, range, None).is_some(),
            None => false,
        })
    }

    /// Scores of every rating `user_id` has received.
    pub fn ratings_received(&self, user_id: &UserId) -> Vec<u8> {
        self.store.ratings_received(user_id)
    }

    pub fn pending_propagation(&self, booking_id: &BookingId) -> Option<PendingPropagation> {
        self.store.pending(booking_id)
    }

    pub fn pending_propagations(&self) -> Vec<PendingPropagation> {
        self.store.all_pending()
    }

    pub fn booking_count(&self) -> usize {
        self.store.booking_count()
    }

    pub fn tool_count(&self) -> usize {
        self.store.tool_ids().len()
    }

    /// Pairs of committed bookings on the same tool whose ranges overlap.
    /// Empty whenever the store is consistent.
    pub async fn audit_overlaps(&self) -> Vec<(BookingId, BookingId)> {
        let mut violations = Vec::new();
        for tool_id in self.store.tool_ids() {
            let Some(tb) = self.store.get_tool(&tool_id) else { continue };
            let guard = tb.read().await;
            let committed: Vec<&Booking> =
                guard.bookings.iter().filter(|b| b.status.is_committed()).collect();
            for (i, a) in committed.iter().enumerate() {
                for b in &committed[i + 1..] {
                    if a.range.overlaps(&b.range) {
                        violations.push((a.id, b.id));
                    }
                }
            }
        }
        violations
    }
}

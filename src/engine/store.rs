use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::model::*;

/// Every booking ever made for one tool, sorted by `range.start`.
#[derive(Debug, Clone)]
pub struct ToolBookings {
    pub tool_id: ToolId,
    pub bookings: Vec<Booking>,
}

impl ToolBookings {
    pub fn new(tool_id: ToolId) -> Self {
        Self {
            tool_id,
            bookings: Vec::new(),
        }
    }

    pub fn get(&self, id: &BookingId) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn get_mut(&mut self, id: &BookingId) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }

    /// Insert keeping start order; equal starts keep insertion order.
    pub fn insert(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.range.start <= booking.range.start);
        self.bookings.insert(pos, booking);
    }

    /// Bookings whose range shares at least one day with `range`.
    pub fn overlapping(&self, range: &DateRange) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.range.start <= range.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.range.end >= range.start)
    }
}

pub type SharedToolBookings = Arc<RwLock<ToolBookings>>;

/// Bookings grouped per tool plus the secondary indexes used by lookups.
///
/// Per-tool locks serialize every conditional update on that tool; the
/// indexes are only touched while the owning tool's write lock is held.
pub struct BookingStore {
    tools: DashMap<ToolId, SharedToolBookings>,
    booking_to_tool: DashMap<BookingId, ToolId>,
    outgoing: DashMap<UserId, Vec<BookingId>>,
    incoming: DashMap<UserId, Vec<BookingId>>,
    /// Rated user → (booking, side it came from, score).
    ratings_received: DashMap<UserId, Vec<(BookingId, RatingSide, u8)>>,
    pending: DashMap<BookingId, PendingPropagation>,
}

impl Default for BookingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingStore {
    pub fn new() -> Self {
        Self {
            tools: DashMap::new(),
            booking_to_tool: DashMap::new(),
            outgoing: DashMap::new(),
            incoming: DashMap::new(),
            ratings_received: DashMap::new(),
            pending: DashMap::new(),
        }
    }

    // ── Tools ────────────────────────────────────────────────

    pub fn get_tool(&self, id: &ToolId) -> Option<SharedToolBookings> {
        self.tools.get(id).map(|e| e.value().clone())
    }

    /// Tools get their booking set lazily on first request.
    pub fn tool_or_insert(&self, id: ToolId) -> SharedToolBookings {
        self.tools
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(ToolBookings::new(id))))
            .value()
            .clone()
    }

    pub fn tool_ids(&self) -> Vec<ToolId> {
        self.tools.iter().map(|e| *e.key()).collect()
    }

    // ── Booking index ────────────────────────────────────────

    pub fn booking_count(&self) -> usize {
        self.booking_to_tool.len()
    }

    pub fn tool_for_booking(&self, id: &BookingId) -> Option<ToolId> {
        self.booking_to_tool.get(id).map(|e| *e.value())
    }

    pub fn index_booking(&self, booking: &Booking) {
        self.booking_to_tool.insert(booking.id, booking.tool_id);
        push_unique(&self.outgoing, booking.from_user_id, booking.id);
        push_unique(&self.incoming, booking.to_user_id, booking.id);
    }

    pub fn move_incoming(&self, id: BookingId, old: UserId, new: UserId) {
        if let Some(mut ids) = self.incoming.get_mut(&old) {
            ids.retain(|b| *b != id);
        }
        push_unique(&self.incoming, new, id);
    }

    pub fn outgoing_ids(&self, user: &UserId) -> Vec<BookingId> {
        self.outgoing.get(user).map(|e| e.value().clone()).unwrap_or_default()
    }

    pub fn incoming_ids(&self, user: &UserId) -> Vec<BookingId> {
        self.incoming.get(user).map(|e| e.value().clone()).unwrap_or_default()
    }

    // ── Ratings ──────────────────────────────────────────────

    /// Record a received rating once per (booking, side).
    pub fn record_rating(&self, rated: UserId, id: BookingId, side: RatingSide, score: u8) {
        let mut received = self.ratings_received.entry(rated).or_default();
        if !received.iter().any(|(b, s, _)| *b == id && *s == side) {
            received.push((id, side, score));
        }
    }

    pub fn ratings_received(&self, user: &UserId) -> Vec<u8> {
        self.ratings_received
            .get(user)
            .map(|e| e.value().iter().map(|(_, _, score)| *score).collect())
            .unwrap_or_default()
    }

    // ── Pending propagations ─────────────────────────────────

    /// A newer pickup of the same tool supersedes any older pending one:
    /// its rewrite covers the same bookings with the latest holder.
    pub fn mark_pending(&self, pending: PendingPropagation) {
        self.pending
            .retain(|_, p| p.tool_id != pending.tool_id || p.booking_id == pending.booking_id);
        self.pending.insert(pending.booking_id, pending);
    }

    pub fn clear_pending(&self, booking_id: &BookingId) -> bool {
        self.pending.remove(booking_id).is_some()
    }

    pub fn pending(&self, booking_id: &BookingId) -> Option<PendingPropagation> {
        self.pending.get(booking_id).map(|e| *e.value())
    }

    pub fn all_pending(&self) -> Vec<PendingPropagation> {
        self.pending.iter().map(|e| *e.value()).collect()
    }
}

fn push_unique(index: &DashMap<UserId, Vec<BookingId>>, user: UserId, id: BookingId) {
    let mut ids = index.entry(user).or_default();
    if !ids.contains(&id) {
        ids.push(id);
    }
}

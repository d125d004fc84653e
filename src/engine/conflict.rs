use chrono::{NaiveDate, Utc};

use crate::model::*;

use super::store::ToolBookings;

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

/// The current calendar day, UTC.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// First committed (ACCEPTED/PICKED) booking overlapping `range`, skipping
/// `exclude`. Pending bookings never conflict with anything.
pub fn find_conflict(
    tb: &ToolBookings,
    range: &DateRange,
    exclude: Option<BookingId>,
) -> Option<BookingId> {
    tb.overlapping(range)
        .find(|b| b.status.is_committed() && Some(b.id) != exclude)
        .map(|b| b.id)
}

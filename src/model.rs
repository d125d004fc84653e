use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;

/// Unix milliseconds, used for creation and update stamps.
pub type Ms = i64;

pub type BookingId = Ulid;
pub type ToolId = Ulid;
pub type UserId = Ulid;
pub type CommunityId = Ulid;

/// Parse a textual identifier coming from the API layer.
pub fn parse_id(raw: &str) -> Result<Ulid, EngineError> {
    Ulid::from_string(raw.trim()).map_err(|_| EngineError::Invalid("malformed id"))
}

/// Inclusive calendar interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateRange start must not be after end");
        Self { start, end }
    }

    /// Like `new`, but returns `None` when `start > end`.
    pub fn checked(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// The fields are public, so a range can arrive inverted. Repository
    /// entry points call this before touching any state.
    pub fn ensure_ordered(&self) -> Result<(), EngineError> {
        if self.start > self.end {
            return Err(EngineError::Invalid("start date is after end date"));
        }
        Ok(())
    }

    /// Both bounds are inclusive, so sharing a boundary day is an overlap.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Number of calendar days covered, both ends counted.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
    Returned,
    Picked,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 6] = [
        BookingStatus::Pending,
        BookingStatus::Accepted,
        BookingStatus::Rejected,
        BookingStatus::Cancelled,
        BookingStatus::Returned,
        BookingStatus::Picked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Accepted => "ACCEPTED",
            BookingStatus::Rejected => "REJECTED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Returned => "RETURNED",
            BookingStatus::Picked => "PICKED",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        Self::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(raw.trim()))
            .ok_or(EngineError::Invalid("unknown booking status"))
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Rejected | BookingStatus::Cancelled | BookingStatus::Returned
        )
    }

    /// Statuses that occupy the tool's calendar and take part in conflicts.
    pub fn is_committed(&self) -> bool {
        matches!(self, BookingStatus::Accepted | BookingStatus::Picked)
    }

    /// Statuses in which either party may leave a rating.
    pub fn is_ratable(&self) -> bool {
        matches!(self, BookingStatus::Returned | BookingStatus::Picked)
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which party of a booking a rating comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RatingSide {
    /// Submitted by the recipient (`to_user_id`).
    Owner,
    /// Submitted by the requester (`from_user_id`).
    Requester,
}

impl RatingSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            RatingSide::Owner => "owner",
            RatingSide::Requester => "requester",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingEntry {
    pub rating: u8,
    pub comment: Option<String>,
    /// Content hashes of attached images.
    pub images: Vec<String>,
    pub rated_at: Ms,
}

/// At most one entry per party.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ratings {
    pub owner: Option<RatingEntry>,
    pub requester: Option<RatingEntry>,
}

impl Ratings {
    pub fn get(&self, side: RatingSide) -> Option<&RatingEntry> {
        match side {
            RatingSide::Owner => self.owner.as_ref(),
            RatingSide::Requester => self.requester.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, side: RatingSide) -> &mut Option<RatingEntry> {
        match side {
            RatingSide::Owner => &mut self.owner,
            RatingSide::Requester => &mut self.requester,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub tool_id: ToolId,
    /// The requester.
    pub from_user_id: UserId,
    /// The current counterparty: owner, or the actual holder of a nomadic tool.
    pub to_user_id: UserId,
    pub range: DateRange,
    pub status: BookingStatus,
    pub contact: String,
    pub comments: Option<String>,
    pub ratings: Ratings,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    /// The side a user rates from. The recipient side wins when a user
    /// booked their own tool.
    pub fn side_of(&self, user_id: UserId) -> Option<RatingSide> {
        if user_id == self.to_user_id {
            Some(RatingSide::Owner)
        } else if user_id == self.from_user_id {
            Some(RatingSide::Requester)
        } else {
            None
        }
    }

    /// The user who receives a rating submitted from `side`.
    pub fn rated_party(&self, side: RatingSide) -> UserId {
        match side {
            RatingSide::Owner => self.from_user_id,
            RatingSide::Requester => self.to_user_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    const EARTH_RADIUS_KM: f64 = 6_371.0;

    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance (haversine) in kilometres.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * Self::EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

/// The slice of a tool this crate reads and writes. Tools are owned elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct Tool {
    pub id: ToolId,
    pub name: String,
    pub owner_id: UserId,
    pub is_nomadic: bool,
    pub actual_holder_id: Option<UserId>,
    pub community_id: Option<CommunityId>,
    pub max_distance_km: Option<f64>,
    pub location: Option<GeoPoint>,
}

impl Tool {
    /// Who new requests for this tool are addressed to.
    pub fn recipient(&self) -> UserId {
        if self.is_nomadic {
            self.actual_holder_id.unwrap_or(self.owner_id)
        } else {
            self.owner_id
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub active: bool,
    pub location: Option<GeoPoint>,
    /// Integer percentage, 20 per star.
    pub reputation: u8,
    pub rating_count: u32,
}

/// A user's standing derived from every rating they received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reputation {
    pub score: u8,
    pub count: u32,
}

/// A rating as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rating {
    pub booking_id: BookingId,
    pub rater_id: UserId,
    pub rated_user_id: UserId,
    pub side: RatingSide,
    pub entry: RatingEntry,
}

/// A holder change that has been decided but not yet fully applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPropagation {
    pub booking_id: BookingId,
    pub tool_id: ToolId,
    pub holder_id: UserId,
}

// ── Listing ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Requests addressed to the user.
    Incoming,
    /// Requests the user made.
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Tool(ToolId),
    User { user_id: UserId, direction: Direction },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListFilter {
    pub subject: Subject,
    /// Empty means every status.
    pub statuses: Vec<BookingStatus>,
    /// Keep only bookings overlapping this range.
    pub range: Option<DateRange>,
}

impl ListFilter {
    pub fn tool(tool_id: ToolId) -> Self {
        Self {
            subject: Subject::Tool(tool_id),
            statuses: Vec::new(),
            range: None,
        }
    }

    pub fn incoming(user_id: UserId) -> Self {
        Self {
            subject: Subject::User { user_id, direction: Direction::Incoming },
            statuses: Vec::new(),
            range: None,
        }
    }

    pub fn outgoing(user_id: UserId) -> Self {
        Self {
            subject: Subject::User { user_id, direction: Direction::Outgoing },
            statuses: Vec::new(),
            range: None,
        }
    }

    pub fn with_statuses(mut self, statuses: &[BookingStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn with_range(mut self, range: DateRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn matches(&self, booking: &Booking) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&booking.status))
            && self.range.is_none_or(|r| r.overlaps(&booking.range))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { offset: 0, limit: 50 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Matching items before paging.
    pub total: usize,
}

// ── WAL records ──────────────────────────────────────────────────

/// Flat event records; this is the WAL format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// A new booking, or a full snapshot of one after compaction.
    BookingCreated { booking: Booking },
    StatusChanged {
        id: BookingId,
        tool_id: ToolId,
        from: BookingStatus,
        to: BookingStatus,
        at: Ms,
    },
    RecipientChanged {
        id: BookingId,
        tool_id: ToolId,
        to_user_id: UserId,
        at: Ms,
    },
    RatingAttached {
        id: BookingId,
        tool_id: ToolId,
        side: RatingSide,
        rated_user_id: UserId,
        entry: RatingEntry,
    },
    /// Re-asserts a propagation still owed after compaction.
    PropagationPending(PendingPropagation),
    PropagationCompleted { booking_id: BookingId },
}

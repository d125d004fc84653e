use crate::engine::EngineError;
use crate::model::*;

/// The part a user plays in a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// `from_user_id`: asked for the tool.
    Requester,
    /// `to_user_id`: owner, or current holder of a nomadic tool.
    Recipient,
}

impl Role {
    pub fn held_by(&self, booking: &Booking, user: UserId) -> bool {
        match self {
            Role::Requester => booking.from_user_id == user,
            Role::Recipient => booking.to_user_id == user,
        }
    }
}

/// The transition table. `None` means `from → to` is not a legal move.
///
/// | to        | from               | actor     |
/// |-----------|--------------------|-----------|
/// | ACCEPTED  | PENDING            | recipient |
/// | REJECTED  | PENDING            | recipient |
/// | CANCELLED | PENDING, ACCEPTED  | requester |
/// | RETURNED  | ACCEPTED, PICKED   | recipient |
/// | PICKED    | ACCEPTED           | recipient |
pub fn required_role(from: BookingStatus, to: BookingStatus) -> Option<Role> {
    use crate::model::BookingStatus::*;
    match (from, to) {
        (Pending, Accepted) | (Pending, Rejected) => Some(Role::Recipient),
        (Pending, Cancelled) | (Accepted, Cancelled) => Some(Role::Requester),
        (Accepted, Returned) | (Picked, Returned) => Some(Role::Recipient),
        (Accepted, Picked) => Some(Role::Recipient),
        _ => None,
    }
}

/// Statuses reachable from `from` in one step.
pub fn next_statuses(from: BookingStatus) -> Vec<BookingStatus> {
    BookingStatus::ALL
        .into_iter()
        .filter(|to| required_role(from, *to).is_some())
        .collect()
}

/// Check that `actor` may move `booking` to `to` from its current status.
pub fn authorize(booking: &Booking, actor: UserId, to: BookingStatus) -> Result<Role, EngineError> {
    let role = required_role(booking.status, to).ok_or(EngineError::InvalidTransition {
        from: booking.status,
        to,
    })?;
    if !role.held_by(booking, actor) {
        return Err(EngineError::Forbidden(match role {
            Role::Requester => "only the requester can make this change",
            Role::Recipient => "only the recipient can make this change",
        }));
    }
    Ok(role)
}

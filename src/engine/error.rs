use ulid::Ulid;

use crate::model::{BookingStatus, RatingSide};

/// Coarse classification surfaced to the API layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Forbidden,
    NotFound,
    InvalidTransition,
    Transient,
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    Invalid(&'static str),
    Forbidden(&'static str),
    NotNomadic(Ulid),
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    /// Overlaps a committed booking for the same tool.
    Conflict(Ulid),
    /// A concurrent transition got there first.
    StaleStatus {
        id: Ulid,
        expected: BookingStatus,
        actual: BookingStatus,
    },
    AlreadyRated {
        id: Ulid,
        side: RatingSide,
    },
    NotRatable(BookingStatus),
    StoreTimeout,
    Unavailable(String),
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Invalid(_) => ErrorKind::Validation,
            EngineError::Forbidden(_)
            | EngineError::NotNomadic(_)
            | EngineError::NotRatable(_) => ErrorKind::Forbidden,
            EngineError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            EngineError::Conflict(_)
            | EngineError::StaleStatus { .. }
            | EngineError::AlreadyRated { .. } => ErrorKind::Conflict,
            EngineError::StoreTimeout
            | EngineError::Unavailable(_)
            | EngineError::WalError(_) => ErrorKind::Transient,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Invalid(msg) => write!(f, "invalid input: {msg}"),
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::NotNomadic(id) => write!(f, "tool {id} is not nomadic"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "cannot move booking from {from} to {to}")
            }
            EngineError::Conflict(id) => write!(f, "conflict with booking: {id}"),
            EngineError::StaleStatus { id, expected, actual } => write!(
                f,
                "booking {id} changed concurrently: expected {expected}, found {actual}"
            ),
            EngineError::AlreadyRated { id, side } => {
                write!(f, "booking {id} already rated by the {} side", side.as_str())
            }
            EngineError::NotRatable(status) => {
                write!(f, "bookings in status {status} cannot be rated")
            }
            EngineError::StoreTimeout => write!(f, "store operation timed out"),
            EngineError::Unavailable(e) => write!(f, "collaborator unavailable: {e}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

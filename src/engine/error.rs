use chrono::NaiveDate;
use ulid::Ulid;

use crate::lifecycle::TransitionError;
use crate::model::{DayOfWeek, TimeOfDay};

/// Why a requested start time can't be booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    /// The stylist has no active window on that weekday.
    NoWindow,
    /// The booking doesn't fit inside the window.
    OutsideWindow,
    /// Overlaps the given non-cancelled reservation.
    Overlaps(Ulid),
}

impl std::fmt::Display for Unavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unavailable::NoWindow => f.write_str("no working hours that day"),
            Unavailable::OutsideWindow => f.write_str("outside working hours"),
            Unavailable::Overlaps(id) => write!(f, "overlaps booking {id}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid service: {0}")]
    InvalidService(Ulid),
    #[error("invalid stylist: {0}")]
    InvalidStylist(Ulid),
    #[error("slot unavailable for stylist {stylist_id} on {date} at {start}: {reason}")]
    SlotUnavailable {
        stylist_id: Ulid,
        date: NaiveDate,
        start: TimeOfDay,
        reason: Unavailable,
    },
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error("access denied: {0}")]
    AccessDenied(Ulid),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("stylist {stylist_id} already has active window {existing} on {day}")]
    DuplicateWindow {
        stylist_id: Ulid,
        day: DayOfWeek,
        existing: Ulid,
    },
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

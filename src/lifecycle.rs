//! Booking status state machine.
//!
//! Every status change in the engine goes through [`check_transition`]; the
//! allowed pairs live in [`ADMIN_TRANSITIONS`] and nowhere else.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 4] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown booking status {0:?}")]
pub struct ParseStatusError(pub String);

impl FromStr for BookingStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookingStatus::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

/// How a status change was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Explicit status update by an administrator.
    AdminUpdate,
    /// The dedicated cancel operation (owner or administrator).
    Cancel,
}

/// Pairs an administrator may apply through a status update.
pub const ADMIN_TRANSITIONS: [(BookingStatus, BookingStatus); 4] = [
    (BookingStatus::Pending, BookingStatus::Confirmed),
    (BookingStatus::Pending, BookingStatus::Cancelled),
    (BookingStatus::Confirmed, BookingStatus::Completed),
    (BookingStatus::Confirmed, BookingStatus::Cancelled),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid status transition {from} -> {to}")]
pub struct TransitionError {
    pub from: BookingStatus,
    pub to: BookingStatus,
}

pub fn is_allowed(from: BookingStatus, to: BookingStatus, trigger: Trigger) -> bool {
    match trigger {
        Trigger::AdminUpdate => ADMIN_TRANSITIONS.contains(&(from, to)),
        Trigger::Cancel => to == BookingStatus::Cancelled && is_cancellable(from),
    }
}

pub fn check_transition(
    from: BookingStatus,
    to: BookingStatus,
    trigger: Trigger,
) -> Result<(), TransitionError> {
    if is_allowed(from, to, trigger) {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}

pub fn is_cancellable(status: BookingStatus) -> bool {
    matches!(status, BookingStatus::Pending | BookingStatus::Confirmed)
}

/// Strictly after `today` and still live.
pub fn is_upcoming(status: BookingStatus, date: NaiveDate, today: NaiveDate) -> bool {
    date > today && is_cancellable(status)
}

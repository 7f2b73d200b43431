use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::error::Unavailable;
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Local calendar date; dates carry no timezone.
pub(crate) fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// `[start, start + duration)`, rejecting zero length and midnight rollover.
pub(crate) fn booking_span(start: TimeOfDay, duration: Minutes) -> Result<(TimeOfDay, Span), EngineError> {
    if duration == 0 {
        return Err(EngineError::InvalidInput("booking duration must be positive"));
    }
    let end = start
        .checked_add(duration)
        .ok_or(EngineError::InvalidInput("booking crosses midnight"))?;
    Ok((end, Span::between(start, end)))
}

pub(crate) fn validate_window_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::InvalidInput("window start must be before end"));
    }
    Ok(())
}

pub(crate) fn validate_text(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

pub(crate) fn validate_name(name: Option<&str>) -> Result<(), EngineError> {
    match name {
        Some(n) => validate_text(n, MAX_NAME_LEN, "name too long"),
        None => Ok(()),
    }
}

/// Whether `span` on `date` fits the stylist's working window and collides
/// with no live reservation. The caller holds the stylist lock.
pub(crate) fn check_bookable(rs: &StylistState, date: NaiveDate, span: Span) -> Result<(), Unavailable> {
    let window = rs
        .active_window(DayOfWeek::of(date))
        .ok_or(Unavailable::NoWindow)?;
    if !window.span.contains_span(&span) {
        return Err(Unavailable::OutsideWindow);
    }
    if let Some(existing) = rs.overlapping(date, span).next() {
        return Err(Unavailable::Overlaps(existing.id));
    }
    Ok(())
}

/// Another active window on the same weekday, other than `exclude`.
pub(crate) fn find_active_duplicate(
    rs: &StylistState,
    day: DayOfWeek,
    exclude: Option<ulid::Ulid>,
) -> Option<ulid::Ulid> {
    rs.windows
        .iter()
        .find(|w| w.day == day && w.active && Some(w.id) != exclude)
        .map(|w| w.id)
}

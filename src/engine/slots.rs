use crate::model::*;

/// One candidate start time. Advisory: availability can change before a
/// booking is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub start: TimeOfDay,
    pub available: bool,
}

/// Lazy walk over candidate start times inside one working window.
///
/// Candidates start at the window start and advance by `granularity` while
/// `candidate + duration <= window end`; a trailing partial slot is dropped.
/// A candidate is unavailable when `[candidate, candidate + duration)`
/// overlaps any busy span.
#[derive(Debug, Clone)]
pub struct Slots {
    /// Occupied spans sorted by start.
    busy: Vec<Span>,
    /// First busy span that can still overlap a future candidate.
    busy_from: usize,
    cursor: Minutes,
    window_end: Minutes,
    duration: Minutes,
    granularity: Minutes,
}

impl Slots {
    pub fn new(window: Span, mut busy: Vec<Span>, duration: Minutes, granularity: Minutes) -> Self {
        busy.sort_by_key(|s| s.start);
        Self {
            busy,
            busy_from: 0,
            cursor: window.start,
            window_end: window.end,
            duration,
            granularity,
        }
    }

    pub fn empty() -> Self {
        Self {
            busy: Vec::new(),
            busy_from: 0,
            cursor: 0,
            window_end: 0,
            duration: 0,
            granularity: 0,
        }
    }
}

impl Iterator for Slots {
    type Item = Slot;

    fn next(&mut self) -> Option<Slot> {
        if self.duration == 0 || self.granularity == 0 {
            return None;
        }
        let end = self.cursor.checked_add(self.duration)?;
        if end > self.window_end {
            return None;
        }
        let candidate = Span::new(self.cursor, end);

        // Candidates only move forward, so spans ending at or before this
        // candidate's start are done for good.
        while self
            .busy
            .get(self.busy_from)
            .is_some_and(|b| b.end <= candidate.start)
        {
            self.busy_from += 1;
        }
        let available = !self.busy[self.busy_from..]
            .iter()
            .take_while(|b| b.start < candidate.end)
            .any(|b| b.overlaps(&candidate));

        let start = TimeOfDay::from_minutes(self.cursor)?;
        self.cursor = self.cursor.saturating_add(self.granularity);
        Some(Slot { start, available })
    }
}

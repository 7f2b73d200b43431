use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::lifecycle::{self, BookingStatus};

/// Minutes since midnight. All scheduling math happens in this unit.
pub type Minutes = u32;

pub const MINUTES_PER_DAY: Minutes = 24 * 60;

/// Unix milliseconds, used only for audit timestamps.
pub type Ms = i64;

// ── Wall-clock time ──────────────────────────────────────────────

/// Wall-clock time of day at minute precision (`00:00`..=`23:59`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeOfDay(Minutes);

impl TimeOfDay {
    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self(hour * 60 + minute))
        } else {
            None
        }
    }

    pub fn from_minutes(minutes: Minutes) -> Option<Self> {
        (minutes < MINUTES_PER_DAY).then_some(Self(minutes))
    }

    pub fn minutes(self) -> Minutes {
        self.0
    }

    /// `None` when the result would land on or past midnight.
    pub fn checked_add(self, duration: Minutes) -> Option<Self> {
        self.0.checked_add(duration).and_then(Self::from_minutes)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid time of day {0:?}, expected HH:MM")]
pub struct ParseTimeError(pub String);

impl FromStr for TimeOfDay {
    type Err = ParseTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTimeError(s.to_string());
        let bytes = s.as_bytes();
        if bytes.len() != 5 || bytes[2] != b':' {
            return Err(err());
        }
        let digits = |range: std::ops::Range<usize>| -> Option<u32> {
            let part = &s[range];
            if part.bytes().all(|b| b.is_ascii_digit()) {
                part.parse().ok()
            } else {
                None
            }
        };
        let hour = digits(0..2).ok_or_else(err)?;
        let minute = digits(3..5).ok_or_else(err)?;
        Self::from_hm(hour, minute).ok_or_else(err)
    }
}

/// Half-open minute interval `[start, end)` inside one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Minutes,
    pub end: Minutes,
}

impl Span {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn between(start: TimeOfDay, end: TimeOfDay) -> Self {
        Self::new(start.minutes(), end.minutes())
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Day of week, 0 = Sunday .. 6 = Saturday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DayOfWeek(u8);

impl DayOfWeek {
    pub fn new(day: u8) -> Option<Self> {
        (day < 7).then_some(Self(day))
    }

    pub fn of(date: NaiveDate) -> Self {
        Self(date.weekday().num_days_from_sunday() as u8)
    }

    pub fn number(self) -> u8 {
        self.0
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [&str; 7] = ["Sunday", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday"];
        f.write_str(NAMES[self.0 as usize])
    }
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

// ── Schedule ─────────────────────────────────────────────────────

/// One recurring block of working time on one weekday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyWindow {
    pub id: Ulid,
    pub stylist_id: Ulid,
    pub day: DayOfWeek,
    pub span: Span,
    pub active: bool,
}

impl WeeklyWindow {
    pub fn start(&self) -> TimeOfDay {
        TimeOfDay(self.span.start)
    }

    pub fn end(&self) -> TimeOfDay {
        TimeOfDay(self.span.end)
    }
}

// ── Reservations ─────────────────────────────────────────────────

/// Price and duration of a catalog service, frozen at booking time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSelection {
    pub id: Ulid,
    pub name: String,
    pub price: u64,
    pub duration: Minutes,
}

/// Sum of durations and prices over a selection list.
pub fn totals(selections: &[ServiceSelection]) -> (Minutes, u64) {
    selections.iter().fold((0, 0), |(duration, price), s| {
        (duration.saturating_add(s.duration), price.saturating_add(s.price))
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub stylist_id: Ulid,
    pub customer_id: Ulid,
    pub services: Vec<ServiceSelection>,
    pub date: NaiveDate,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub total_duration: Minutes,
    pub total_price: u64,
    pub status: BookingStatus,
    pub notes: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: String,
    pub created_at: Ms,
}

impl Reservation {
    pub fn span(&self) -> Span {
        Span::between(self.start, self.end)
    }

    /// Cancelled reservations never hold a slot.
    pub fn occupies_slot(&self) -> bool {
        self.status != BookingStatus::Cancelled
    }

    pub fn is_upcoming(&self, today: NaiveDate) -> bool {
        lifecycle::is_upcoming(self.status, self.date, today)
    }
}

/// Contact fields that take precedence over the customer profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactOverrides {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Ulid,
    pub customer_id: Ulid,
    pub stylist_id: Ulid,
    pub service_ids: Vec<Ulid>,
    pub date: NaiveDate,
    pub start: TimeOfDay,
    pub notes: String,
    pub contact: ContactOverrides,
}

/// Who is asking. Admins see and mutate everything; customers only their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    Admin,
    Customer(Ulid),
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        matches!(self, Caller::Admin)
    }

    pub fn can_access(&self, customer_id: Ulid) -> bool {
        match self {
            Caller::Admin => true,
            Caller::Customer(id) => *id == customer_id,
        }
    }
}

// ── Per-stylist state ────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StylistState {
    pub id: Ulid,
    pub name: Option<String>,
    pub active: bool,
    /// Sorted by `(day, span.start)`.
    pub windows: Vec<WeeklyWindow>,
    /// Reservations per date, each list sorted by `start`.
    pub days: BTreeMap<NaiveDate, Vec<Reservation>>,
}

impl StylistState {
    pub fn new(id: Ulid, name: Option<String>) -> Self {
        Self {
            id,
            name,
            active: true,
            windows: Vec::new(),
            days: BTreeMap::new(),
        }
    }

    pub fn insert_window(&mut self, window: WeeklyWindow) {
        let key = (window.day, window.span.start);
        let pos = self
            .windows
            .partition_point(|w| (w.day, w.span.start) <= key);
        self.windows.insert(pos, window);
    }

    pub fn remove_window(&mut self, id: Ulid) -> Option<WeeklyWindow> {
        let pos = self.windows.iter().position(|w| w.id == id)?;
        Some(self.windows.remove(pos))
    }

    pub fn window(&self, id: Ulid) -> Option<&WeeklyWindow> {
        self.windows.iter().find(|w| w.id == id)
    }

    /// First active window for `day`, in start order.
    pub fn active_window(&self, day: DayOfWeek) -> Option<&WeeklyWindow> {
        self.windows.iter().find(|w| w.day == day && w.active)
    }

    pub fn active_windows(&self) -> impl Iterator<Item = &WeeklyWindow> {
        self.windows.iter().filter(|w| w.active)
    }

    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let list = self.days.entry(reservation.date).or_default();
        let pos = list.partition_point(|r| r.start <= reservation.start);
        list.insert(pos, reservation);
    }

    pub fn reservation(&self, date: NaiveDate, id: Ulid) -> Option<&Reservation> {
        self.days.get(&date)?.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, date: NaiveDate, id: Ulid) -> Option<&mut Reservation> {
        self.days.get_mut(&date)?.iter_mut().find(|r| r.id == id)
    }

    /// Non-cancelled reservations on `date`, in start order.
    pub fn occupied(&self, date: NaiveDate) -> impl Iterator<Item = &Reservation> {
        self.days
            .get(&date)
            .map(|list| list.as_slice())
            .unwrap_or_default()
            .iter()
            .filter(|r| r.occupies_slot())
    }

    /// Non-cancelled reservations on `date` whose span overlaps `query`.
    pub fn overlapping(&self, date: NaiveDate, query: Span) -> impl Iterator<Item = &Reservation> {
        let list = self
            .days
            .get(&date)
            .map(|list| list.as_slice())
            .unwrap_or_default();
        // Everything at index >= right_bound starts at or after query.end.
        let right_bound = list.partition_point(|r| r.start.minutes() < query.end);
        list[..right_bound]
            .iter()
            .filter(move |r| r.occupies_slot() && r.span().overlaps(&query))
    }

    pub fn reservations(&self) -> impl Iterator<Item = &Reservation> {
        self.days.values().flatten()
    }
}

/// WAL record format. Flat, one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    StylistCreated {
        id: Ulid,
        name: Option<String>,
    },
    StylistUpdated {
        id: Ulid,
        name: Option<String>,
        active: bool,
    },
    WindowAdded(WeeklyWindow),
    WindowUpdated(WeeklyWindow),
    WindowRemoved {
        id: Ulid,
        stylist_id: Ulid,
    },
    BookingCreated(Reservation),
    BookingStatusChanged {
        id: Ulid,
        stylist_id: Ulid,
        date: NaiveDate,
        status: BookingStatus,
    },
}

impl Event {
    pub fn stylist_id(&self) -> Ulid {
        match self {
            Event::StylistCreated { id, .. } | Event::StylistUpdated { id, .. } => *id,
            Event::WindowAdded(w) | Event::WindowUpdated(w) => w.stylist_id,
            Event::WindowRemoved { stylist_id, .. } | Event::BookingStatusChanged { stylist_id, .. } => *stylist_id,
            Event::BookingCreated(r) => r.stylist_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StylistInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub active: bool,
}

/// Optional patch applied by `update_stylist`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StylistPatch {
    pub name: Option<String>,
    pub active: Option<bool>,
}

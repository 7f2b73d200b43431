use std::cmp::Reverse;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::lifecycle::BookingStatus;
use crate::limits::*;
use crate::model::*;

use super::conflict::today;
use super::{Engine, EngineError, Slots};

/// Filters for [`Engine::list_bookings`]. Unset fields don't filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub status: Option<BookingStatus>,
    /// Inclusive.
    pub from: Option<NaiveDate>,
    /// Inclusive.
    pub to: Option<NaiveDate>,
    pub stylist_id: Option<Ulid>,
    pub customer_id: Option<Ulid>,
    pub upcoming: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl BookingFilter {
    fn matches(&self, r: &Reservation, today: NaiveDate) -> bool {
        self.status.is_none_or(|s| r.status == s)
            && self.from.is_none_or(|d| r.date >= d)
            && self.to.is_none_or(|d| r.date <= d)
            && self.stylist_id.is_none_or(|id| r.stylist_id == id)
            && self.customer_id.is_none_or(|id| r.customer_id == id)
            && (!self.upcoming || r.is_upcoming(today))
    }
}

impl Engine {
    /// Candidate start times for `duration` minutes on `date`.
    ///
    /// No active window that weekday (or an inactive stylist) gives an empty
    /// sequence. The read lock is released before the iterator is returned.
    pub async fn compute_slots(
        &self,
        stylist_id: Ulid,
        date: NaiveDate,
        duration: Minutes,
        granularity: Option<Minutes>,
    ) -> Result<Slots, EngineError> {
        if duration == 0 {
            return Err(EngineError::InvalidInput("slot duration must be positive"));
        }
        let granularity = granularity.unwrap_or(self.granularity());
        if granularity == 0 {
            return Err(EngineError::InvalidInput("slot granularity must be positive"));
        }
        let rs = self
            .store
            .get_stylist(&stylist_id)
            .ok_or(EngineError::InvalidStylist(stylist_id))?;
        let guard = rs.read().await;
        if !guard.active {
            return Ok(Slots::empty());
        }
        let Some(window) = guard.active_window(DayOfWeek::of(date)) else {
            return Ok(Slots::empty());
        };
        let busy = guard.occupied(date).map(Reservation::span).collect();
        Ok(Slots::new(window.span, busy, duration, granularity))
    }

    pub async fn active_windows(&self, stylist_id: Ulid) -> Result<Vec<WeeklyWindow>, EngineError> {
        let rs = self
            .store
            .get_stylist(&stylist_id)
            .ok_or(EngineError::InvalidStylist(stylist_id))?;
        let guard = rs.read().await;
        Ok(guard.active_windows().cloned().collect())
    }

    pub async fn get_window(&self, id: Ulid) -> Result<WeeklyWindow, EngineError> {
        let stylist_id = self.store.stylist_for_window(&id).ok_or(EngineError::NotFound(id))?;
        let rs = self
            .store
            .get_stylist(&stylist_id)
            .ok_or(EngineError::NotFound(stylist_id))?;
        let guard = rs.read().await;
        guard.window(id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn list_stylists(&self) -> Vec<StylistInfo> {
        let mut out = Vec::new();
        for id in self.store.stylist_ids() {
            if let Some(rs) = self.store.get_stylist(&id) {
                let guard = rs.read().await;
                out.push(StylistInfo {
                    id: guard.id,
                    name: guard.name.clone(),
                    active: guard.active,
                });
            }
        }
        out
    }

    pub async fn get_booking(&self, caller: Caller, id: Ulid) -> Result<Reservation, EngineError> {
        let reservation = self.read_reservation(id).await?;
        if !caller.can_access(reservation.customer_id) {
            return Err(EngineError::AccessDenied(id));
        }
        Ok(reservation)
    }

    /// Filtered page of reservations, newest date first, later starts first
    /// within a date. Customers only ever see their own.
    pub async fn list_bookings(&self, caller: Caller, mut filter: BookingFilter) -> Result<Vec<Reservation>, EngineError> {
        let limit = match filter.limit {
            Some(0) => return Err(EngineError::InvalidInput("page size must be positive")),
            Some(n) => n.min(MAX_LIST_LIMIT),
            None => DEFAULT_LIST_LIMIT,
        };
        if let Caller::Customer(own) = caller {
            if filter.customer_id.is_some_and(|id| id != own) {
                return Ok(Vec::new());
            }
            filter.customer_id = Some(own);
        }

        let today = today();
        let mut found = match filter.customer_id {
            Some(customer_id) => self.reservations_of(customer_id).await,
            None => self.scan_reservations(&filter).await,
        };
        found.retain(|r| filter.matches(r, today));
        found.sort_by_key(|r| Reverse((r.date, r.start, r.id)));
        Ok(found.into_iter().skip(filter.offset).take(limit).collect())
    }

    /// A customer's reservations in chronological order.
    pub async fn customer_bookings(
        &self,
        caller: Caller,
        customer_id: Ulid,
        upcoming_only: bool,
    ) -> Result<Vec<Reservation>, EngineError> {
        if !caller.can_access(customer_id) {
            return Err(EngineError::AccessDenied(customer_id));
        }
        let today = today();
        let mut found = self.reservations_of(customer_id).await;
        if upcoming_only {
            found.retain(|r| r.is_upcoming(today));
        }
        found.sort_by_key(|r| (r.date, r.start, r.id));
        Ok(found)
    }

    /// Non-cancelled reservations of one stylist on one date, by start time.
    pub async fn stylist_bookings(&self, stylist_id: Ulid, date: NaiveDate) -> Result<Vec<Reservation>, EngineError> {
        let rs = self
            .store
            .get_stylist(&stylist_id)
            .ok_or(EngineError::InvalidStylist(stylist_id))?;
        let guard = rs.read().await;
        Ok(guard.occupied(date).cloned().collect())
    }

    async fn read_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let (stylist_id, date) = self
            .store
            .locate_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let rs = self
            .store
            .get_stylist(&stylist_id)
            .ok_or(EngineError::NotFound(stylist_id))?;
        let guard = rs.read().await;
        guard.reservation(date, id).cloned().ok_or(EngineError::NotFound(id))
    }

    async fn reservations_of(&self, customer_id: Ulid) -> Vec<Reservation> {
        let mut out = Vec::new();
        for id in self.store.customer_reservations(&customer_id) {
            if let Ok(r) = self.read_reservation(id).await {
                out.push(r);
            }
        }
        out
    }

    /// Walk stylists, narrowing by stylist and date range before cloning.
    async fn scan_reservations(&self, filter: &BookingFilter) -> Vec<Reservation> {
        let stylist_ids = match filter.stylist_id {
            Some(id) => vec![id],
            None => self.store.stylist_ids(),
        };
        let from = filter.from.unwrap_or(NaiveDate::MIN);
        let to = filter.to.unwrap_or(NaiveDate::MAX);
        if from > to {
            return Vec::new();
        }

        let mut out = Vec::new();
        for stylist_id in stylist_ids {
            let Some(rs) = self.store.get_stylist(&stylist_id) else {
                continue;
            };
            let guard = rs.read().await;
            for (_, day) in guard.days.range(from..=to) {
                out.extend(day.iter().cloned());
            }
        }
        out
    }
}

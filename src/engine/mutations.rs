use tokio::sync::oneshot;
use tracing::{debug, info};
use ulid::Ulid;

use crate::lifecycle::{self, BookingStatus, Trigger};
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{
    booking_span, check_bookable, find_active_duplicate, now_ms, validate_name, validate_text,
    validate_window_span,
};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    // ── Stylists ─────────────────────────────────────────────

    pub async fn create_stylist(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        validate_name(name.as_deref())?;
        let _gate = self.begin_write().await;
        if self.store.stylist_count() >= MAX_STYLISTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many stylists"));
        }
        if self.store.contains_stylist(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::StylistCreated { id, name: name.clone() };
        self.wal_append(&event).await?;
        self.store.insert_stylist(StylistState::new(id, name));
        info!(stylist_id = %id, "stylist created");
        Ok(())
    }

    /// Fields left `None` in the patch keep their current value.
    pub async fn update_stylist(&self, id: Ulid, patch: StylistPatch) -> Result<StylistInfo, EngineError> {
        validate_name(patch.name.as_deref())?;
        let _gate = self.begin_write().await;
        let rs = self.store.get_stylist(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        let name = patch.name.or_else(|| guard.name.clone());
        let active = patch.active.unwrap_or(guard.active);
        let event = Event::StylistUpdated { id, name: name.clone(), active };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(StylistInfo { id, name, active })
    }

    // ── Weekly windows ───────────────────────────────────────

    pub async fn add_window(&self, window: WeeklyWindow) -> Result<(), EngineError> {
        validate_window_span(&window.span)?;
        let _gate = self.begin_write().await;
        if self.store.stylist_for_window(&window.id).is_some() {
            return Err(EngineError::AlreadyExists(window.id));
        }
        let rs = self
            .store
            .get_stylist(&window.stylist_id)
            .ok_or(EngineError::NotFound(window.stylist_id))?;
        let mut guard = rs.write().await;
        if guard.windows.len() >= MAX_WINDOWS_PER_STYLIST {
            return Err(EngineError::LimitExceeded("too many windows for stylist"));
        }
        if window.active
            && let Some(existing) = find_active_duplicate(&guard, window.day, None)
        {
            return Err(EngineError::DuplicateWindow {
                stylist_id: window.stylist_id,
                day: window.day,
                existing,
            });
        }

        debug!(window_id = %window.id, stylist_id = %window.stylist_id, day = %window.day, "window added");
        let event = Event::WindowAdded(window);
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Replace a window's span and active flag; weekday and stylist are fixed.
    pub async fn update_window(&self, id: Ulid, span: Span, active: bool) -> Result<WeeklyWindow, EngineError> {
        validate_window_span(&span)?;
        let _gate = self.begin_write().await;
        let mut guard = self.resolve_window_write(&id).await?;
        let current = guard.window(id).cloned().ok_or(EngineError::NotFound(id))?;

        if active
            && let Some(existing) = find_active_duplicate(&guard, current.day, Some(id))
        {
            return Err(EngineError::DuplicateWindow {
                stylist_id: current.stylist_id,
                day: current.day,
                existing,
            });
        }

        let updated = WeeklyWindow { span, active, ..current };
        let event = Event::WindowUpdated(updated.clone());
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(updated)
    }

    /// Drop a window from the schedule. The log keeps its history.
    pub async fn remove_window(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let _gate = self.begin_write().await;
        let mut guard = self.resolve_window_write(&id).await?;
        let stylist_id = guard.id;
        let event = Event::WindowRemoved { id, stylist_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(stylist_id)
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Create a reservation in `pending`.
    ///
    /// Catalog and customer lookups happen first, outside any lock. The
    /// window/overlap re-check and the write then run under the stylist's
    /// write lock, so two overlapping requests can't both commit.
    pub async fn create_booking(&self, caller: Caller, req: BookingRequest) -> Result<Reservation, EngineError> {
        if !caller.can_access(req.customer_id) {
            return Err(EngineError::AccessDenied(req.customer_id));
        }
        if req.service_ids.is_empty() {
            return Err(EngineError::InvalidInput("at least one service is required"));
        }
        if req.service_ids.len() > MAX_SERVICES_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many services in one booking"));
        }
        validate_text(&req.notes, MAX_NOTES_LEN, "notes too long")?;
        for field in [&req.contact.name, &req.contact.phone, &req.contact.email]
            .into_iter()
            .flatten()
        {
            validate_text(field, MAX_CONTACT_LEN, "contact field too long")?;
        }
        // Held until the reservation is indexed, so the same id can't commit
        // under two different stylists.
        let _claim = self
            .store
            .claim_booking_id(req.id)
            .ok_or(EngineError::AlreadyExists(req.id))?;

        let mut services = Vec::with_capacity(req.service_ids.len());
        for service_id in &req.service_ids {
            let service = self
                .catalog
                .get_service(*service_id)
                .await
                .filter(|s| s.active)
                .ok_or(EngineError::InvalidService(*service_id))?;
            services.push(ServiceSelection {
                id: service.id,
                name: service.name,
                price: service.price,
                duration: service.duration,
            });
        }
        let (total_duration, total_price) = totals(&services);
        let (end, span) = booking_span(req.start, total_duration)?;

        let profile = self
            .customers
            .get_customer(req.customer_id)
            .await
            .ok_or(EngineError::NotFound(req.customer_id))?;
        let contact = req.contact;

        let _gate = self.begin_write().await;
        let rs = self
            .store
            .get_stylist(&req.stylist_id)
            .ok_or(EngineError::InvalidStylist(req.stylist_id))?;
        let mut guard = rs.write().await;
        if !guard.active {
            return Err(EngineError::InvalidStylist(req.stylist_id));
        }
        if let Err(reason) = check_bookable(&guard, req.date, span) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            debug!(stylist_id = %req.stylist_id, date = %req.date, start = %req.start, %reason, "slot unavailable");
            return Err(EngineError::SlotUnavailable {
                stylist_id: req.stylist_id,
                date: req.date,
                start: req.start,
                reason,
            });
        }

        let reservation = Reservation {
            id: req.id,
            stylist_id: req.stylist_id,
            customer_id: req.customer_id,
            services,
            date: req.date,
            start: req.start,
            end,
            total_duration,
            total_price,
            status: BookingStatus::Pending,
            notes: req.notes,
            customer_name: contact.name.unwrap_or(profile.name),
            customer_phone: contact.phone.or(profile.phone).unwrap_or_default(),
            customer_email: contact.email.unwrap_or(profile.email),
            created_at: now_ms(),
        };
        let event = Event::BookingCreated(reservation.clone());
        self.persist_and_apply(&mut guard, &event).await?;

        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        info!(
            booking_id = %reservation.id,
            stylist_id = %reservation.stylist_id,
            date = %reservation.date,
            start = %reservation.start,
            end = %reservation.end,
            "booking created"
        );
        Ok(reservation)
    }

    /// Administrator status change along the transition table.
    pub async fn update_status(&self, caller: Caller, id: Ulid, status: BookingStatus) -> Result<Reservation, EngineError> {
        if !caller.is_admin() {
            return Err(EngineError::AccessDenied(id));
        }
        self.apply_transition(caller, id, status, Trigger::AdminUpdate).await
    }

    /// Cancel a pending or confirmed reservation. Owner or administrator.
    pub async fn cancel_booking(&self, caller: Caller, id: Ulid) -> Result<Reservation, EngineError> {
        self.apply_transition(caller, id, BookingStatus::Cancelled, Trigger::Cancel).await
    }

    async fn apply_transition(
        &self,
        caller: Caller,
        id: Ulid,
        to: BookingStatus,
        trigger: Trigger,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.begin_write().await;
        let (date, mut guard) = self.resolve_booking_write(&id).await?;
        let current = guard.reservation(date, id).ok_or(EngineError::NotFound(id))?;
        if !caller.can_access(current.customer_id) {
            return Err(EngineError::AccessDenied(id));
        }
        let from = current.status;
        lifecycle::check_transition(from, to, trigger)?;

        let event = Event::BookingStatusChanged {
            id,
            stylist_id: guard.id,
            date,
            status: to,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        metrics::counter!(
            observability::STATUS_TRANSITIONS_TOTAL,
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
        info!(booking_id = %id, %from, %to, "booking status changed");

        guard
            .reservation(date, id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to rebuild current state.
    /// Mutations wait until the swap is done.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.lock_compaction().await;

        let mut events = Vec::new();
        for stylist_id in self.store.stylist_ids() {
            let Some(rs) = self.store.get_stylist(&stylist_id) else {
                continue;
            };
            let guard = rs.read().await;
            events.push(Event::StylistCreated {
                id: guard.id,
                name: guard.name.clone(),
            });
            if !guard.active {
                events.push(Event::StylistUpdated {
                    id: guard.id,
                    name: guard.name.clone(),
                    active: false,
                });
            }
            events.extend(guard.windows.iter().cloned().map(Event::WindowAdded));
            // Current status travels inside the reservation itself.
            events.extend(guard.reservations().cloned().map(Event::BookingCreated));
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        debug!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::SharedStylistState;

/// Per-tenant reservation and schedule store.
///
/// Stylist state sits behind its own `RwLock`; the indexes here are
/// lock-free lookups from an entity id to the stylist that owns it.
pub struct ReservationStore {
    stylists: DashMap<Ulid, SharedStylistState>,
    /// booking id → (stylist, date)
    reservation_index: DashMap<Ulid, (Ulid, NaiveDate)>,
    /// window id → stylist
    window_index: DashMap<Ulid, Ulid>,
    /// customer id → booking ids, in creation order
    by_customer: DashMap<Ulid, Vec<Ulid>>,
    /// booking ids claimed by an in-flight `create_booking`
    claimed_ids: DashMap<Ulid, ()>,
}

/// Holds a booking id for one in-flight create; released on drop.
pub struct ClaimedId<'a> {
    claimed: &'a DashMap<Ulid, ()>,
    id: Ulid,
}

impl Drop for ClaimedId<'_> {
    fn drop(&mut self) {
        self.claimed.remove(&self.id);
    }
}

impl Default for ReservationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReservationStore {
    pub fn new() -> Self {
        Self {
            stylists: DashMap::new(),
            reservation_index: DashMap::new(),
            window_index: DashMap::new(),
            by_customer: DashMap::new(),
            claimed_ids: DashMap::new(),
        }
    }

    // ── Stylists ─────────────────────────────────────────────

    pub fn stylist_count(&self) -> usize {
        self.stylists.len()
    }

    pub fn contains_stylist(&self, id: &Ulid) -> bool {
        self.stylists.contains_key(id)
    }

    pub fn get_stylist(&self, id: &Ulid) -> Option<SharedStylistState> {
        self.stylists.get(id).map(|e| e.value().clone())
    }

    pub fn insert_stylist(&self, state: StylistState) {
        self.stylists.insert(state.id, Arc::new(RwLock::new(state)));
    }

    pub fn stylist_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.stylists.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    // ── Indexes ──────────────────────────────────────────────

    pub fn locate_reservation(&self, id: &Ulid) -> Option<(Ulid, NaiveDate)> {
        self.reservation_index.get(id).map(|e| *e.value())
    }

    /// Claim a booking id across every stylist. `None` if the id is already
    /// committed or another create holds it.
    ///
    /// The claim must outlive the commit: once it drops, the id is visible in
    /// the reservation index instead.
    pub fn claim_booking_id(&self, id: Ulid) -> Option<ClaimedId<'_>> {
        match self.claimed_ids.entry(id) {
            Entry::Occupied(_) => return None,
            Entry::Vacant(e) => {
                e.insert(());
            }
        }
        let claim = ClaimedId {
            claimed: &self.claimed_ids,
            id,
        };
        if self.reservation_index.contains_key(&id) {
            return None;
        }
        Some(claim)
    }

    pub fn stylist_for_window(&self, id: &Ulid) -> Option<Ulid> {
        self.window_index.get(id).map(|e| *e.value())
    }

    pub fn customer_reservations(&self, customer_id: &Ulid) -> Vec<Ulid> {
        self.by_customer
            .get(customer_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    // ── Event application ────────────────────────────────────

    /// Apply a stylist-scoped event. The caller holds the stylist's write
    /// lock; `StylistCreated` is handled by [`ReservationStore::insert_stylist`].
    pub fn apply_event(&self, rs: &mut StylistState, event: &Event) {
        match event {
            Event::StylistCreated { .. } => {}
            Event::StylistUpdated { name, active, .. } => {
                rs.name = name.clone();
                rs.active = *active;
            }
            Event::WindowAdded(window) => {
                self.window_index.insert(window.id, window.stylist_id);
                rs.insert_window(window.clone());
            }
            Event::WindowUpdated(window) => {
                rs.remove_window(window.id);
                rs.insert_window(window.clone());
            }
            Event::WindowRemoved { id, .. } => {
                rs.remove_window(*id);
                self.window_index.remove(id);
            }
            Event::BookingCreated(reservation) => {
                self.reservation_index
                    .insert(reservation.id, (reservation.stylist_id, reservation.date));
                self.by_customer
                    .entry(reservation.customer_id)
                    .or_default()
                    .push(reservation.id);
                rs.insert_reservation(reservation.clone());
            }
            Event::BookingStatusChanged { id, date, status, .. } => {
                if let Some(r) = rs.reservation_mut(*date, *id) {
                    r.status = *status;
                }
            }
        }
    }
}

use slotmap::{SlotMap, new_key_type};
use std::collections::HashMap;

use crate::domain::reservation_pool::reservation::reservation::Reservation;
use crate::domain::reservation_pool::utils::id::ReservationName;

new_key_type! {
    /// Opaque reference to a tracked reservation. Stays valid until the
    /// reservation is untracked; a stale key never aliases a newer reservation.
    pub struct ReservationId;
}

/// Owner of every reservation tracked by one pool.
///
/// The pool is driven by a single control loop, so the store needs no locking.
#[derive(Debug, Default)]
pub struct ReservationStore {
    /// Reservation storage.
    slots: SlotMap<ReservationId, Reservation>,

    /// Lookup of the internal key by reservation name.
    name_index: HashMap<ReservationName, ReservationId>,
}

impl ReservationStore {
    pub fn new() -> Self {
        Self { slots: SlotMap::with_key(), name_index: HashMap::new() }
    }

    /// Adds a reservation and returns its internal key.
    pub fn add(&mut self, reservation: Reservation) -> ReservationId {
        let name = reservation.name().clone();
        let key = self.slots.insert(reservation);
        self.name_index.insert(name, key);
        key
    }

    pub fn get(&self, key: ReservationId) -> Option<&Reservation> {
        self.slots.get(key)
    }

    pub fn get_mut(&mut self, key: ReservationId) -> Option<&mut Reservation> {
        self.slots.get_mut(key)
    }

    pub fn get_by_name(&self, name: &ReservationName) -> Option<ReservationId> {
        self.name_index.get(name).copied()
    }

    /// Untracks a reservation.
    pub fn remove(&mut self, key: ReservationId) -> Option<Reservation> {
        let reservation = self.slots.remove(key)?;
        self.name_index.remove(reservation.name());
        Some(reservation)
    }

    pub fn contains(&self, key: ReservationId) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ReservationId, &Reservation)> {
        self.slots.iter()
    }
}

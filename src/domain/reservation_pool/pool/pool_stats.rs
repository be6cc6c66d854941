use serde::Serialize;
use std::collections::HashMap;

use crate::domain::reservation_pool::reservation::reservation::ReservationState;
use crate::domain::reservation_pool::resource::resource_spec::ResourceSpec;

/// Number of reservations per state, plus requests deferred by admission control.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub staging: usize,
    pub ready: usize,
    pub in_use: usize,
    pub cached: usize,
    pub pending_removal: usize,
    pub queued: usize,
}

impl StateCounts {
    pub(crate) fn add(&mut self, state: ReservationState) {
        match state {
            ReservationState::Staging => self.staging += 1,
            ReservationState::Ready => self.ready += 1,
            ReservationState::InUse => self.in_use += 1,
            ReservationState::Cached => self.cached += 1,
            ReservationState::PendingRemoval => self.pending_removal += 1,
        }
    }

    pub fn get(&self, state: ReservationState) -> usize {
        match state {
            ReservationState::Staging => self.staging,
            ReservationState::Ready => self.ready,
            ReservationState::InUse => self.in_use,
            ReservationState::Cached => self.cached,
            ReservationState::PendingRemoval => self.pending_removal,
        }
    }

    /// Staging + Ready, the quantity bounded by admission control.
    pub fn outstanding(&self) -> usize {
        self.staging + self.ready
    }

    /// Staging + Ready + InUse + Cached: reservations that represent demand.
    pub fn tracked(&self) -> usize {
        self.staging + self.ready + self.in_use + self.cached
    }

    /// Tracked reservations plus queued requests.
    pub fn demand(&self) -> usize {
        self.tracked() + self.queued
    }
}

/// Pull-based snapshot of the pool, taken by the executor once per tick.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub totals: StateCounts,
    pub by_spec: HashMap<ResourceSpec, StateCounts>,

    /// Time (ms) the most recent reservation entered Staging.
    pub latest_staging_start: Option<i64>,
}

impl PoolStats {
    pub fn for_spec(&self, spec: &ResourceSpec) -> StateCounts {
        self.by_spec.get(spec).copied().unwrap_or_default()
    }
}

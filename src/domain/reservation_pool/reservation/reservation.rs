use serde::Serialize;

use crate::domain::reservation_pool::backend::backend_trait::StagingHandle;
use crate::domain::reservation_pool::resource::resource_spec::{Bundle, ResourceSpec};
use crate::domain::reservation_pool::utils::id::{PlacementGroupId, ReservationName, TrialId};
use crate::error::AssociationError;

/// Lifecycle state of a placement group reservation tracked by the pool.
///
/// ```text
/// Staging -> Ready -> InUse -> Cached -> InUse ...
///    |         |        |        |
///    +---------+--------+--------+--> PendingRemoval -> (untracked)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ReservationState {
    /// Creation was requested from the backend and is not confirmed yet.
    Staging,

    /// The backend granted the placement group; no trial uses it yet.
    Ready,

    /// Backs exactly one running trial.
    InUse,

    /// Released by its trial and kept for a future trial with an identical spec.
    Cached,

    /// No longer needed. Removal is (re-)issued every cleanup tick until the
    /// backend confirms it.
    PendingRemoval,
}

impl ReservationState {
    pub fn can_transition_to(self, next: ReservationState) -> bool {
        use ReservationState::*;

        matches!(
            (self, next),
            (Staging, Ready)
                | (Ready, InUse)
                | (Cached, InUse)
                | (InUse, Cached)
                | (InUse, PendingRemoval)
                | (Staging, PendingRemoval)
                | (Ready, PendingRemoval)
                | (Cached, PendingRemoval)
        )
    }

    /// States that count against the admission limit.
    pub fn is_outstanding(self) -> bool {
        matches!(self, ReservationState::Staging | ReservationState::Ready)
    }

    /// States a trial can be assigned from.
    pub fn is_assignable(self) -> bool {
        matches!(self, ReservationState::Ready | ReservationState::Cached)
    }
}

/// One request against the backend, from staging until confirmed removal.
#[derive(Debug, Clone)]
pub struct Reservation {
    name: ReservationName,
    spec: ResourceSpec,
    state: ReservationState,

    /// Monotonic creation sequence number; orders Ready reservations fairly.
    pub(crate) seq: u64,

    /// Time (ms) the reservation entered Staging.
    created_at: i64,

    /// Time (ms) the reservation was last moved to Cached.
    cached_at: Option<i64>,

    /// Correlation handle while the creation is outstanding (or cancelled but
    /// not yet confirmed).
    pub(crate) staging_handle: Option<StagingHandle>,

    /// Backend id, known once the backend granted the placement group.
    pub(crate) placement_group_id: Option<PlacementGroupId>,

    pub(crate) trial: Option<TrialId>,

    /// Number of `create` calls issued for this reservation.
    pub(crate) creation_attempts: u32,

    /// Number of failed removal attempts.
    pub(crate) removal_failures: u32,

    /// Set by an audit that found the placement group gone while in use.
    /// A lost reservation is never cached.
    pub(crate) lost: bool,
}

impl Reservation {
    pub(crate) fn new_staging(name: ReservationName, spec: ResourceSpec, seq: u64, handle: StagingHandle, created_at: i64) -> Self {
        Reservation {
            name,
            spec,
            state: ReservationState::Staging,
            seq,
            created_at,
            cached_at: None,
            staging_handle: Some(handle),
            placement_group_id: None,
            trial: None,
            creation_attempts: 1,
            removal_failures: 0,
            lost: false,
        }
    }

    pub fn name(&self) -> &ReservationName {
        &self.name
    }

    pub fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    pub fn state(&self) -> ReservationState {
        self.state
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn cached_at(&self) -> Option<i64> {
        self.cached_at
    }

    pub fn placement_group_id(&self) -> Option<&PlacementGroupId> {
        self.placement_group_id.as_ref()
    }

    pub fn trial(&self) -> Option<&TrialId> {
        self.trial.as_ref()
    }

    pub fn creation_attempts(&self) -> u32 {
        self.creation_attempts
    }

    pub fn removal_failures(&self) -> u32 {
        self.removal_failures
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }

    /// Bundle reserved for the trial's head actor.
    pub fn head_bundle(&self) -> Option<&Bundle> {
        self.spec.head_bundle()
    }

    /// Bundles reserved for the trial's child actors, in placement order.
    pub fn child_bundles(&self) -> &[Bundle] {
        self.spec.child_bundles()
    }

    /// Moves the reservation to `next`, rejecting transitions the state machine
    /// does not allow.
    pub(crate) fn transition(&mut self, next: ReservationState, now: i64) -> Result<(), AssociationError> {
        if !self.state.can_transition_to(next) {
            return Err(AssociationError::InvalidTransition { from: self.state, to: next });
        }

        if next == ReservationState::Cached {
            self.cached_at = Some(now);
        }
        self.state = next;
        Ok(())
    }
}

use serde::Serialize;
use std::fmt;

use crate::domain::reservation_pool::resource::resource_spec::ResourceSpec;
use crate::domain::reservation_pool::utils::id::PlacementGroupId;
use crate::error::BackendError;

/// Correlates an outstanding `create` call with its later `poll` results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StagingHandle(pub u64);

impl fmt::Display for StagingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle-{}", self.0)
    }
}

/// Result of polling a staging handle.
#[derive(Debug, Clone, PartialEq)]
pub enum CreationStatus {
    /// The backend has not placed the group yet.
    Pending,

    /// The group was placed atomically. The handle is consumed.
    Ready(PlacementGroupId),

    /// The backend gave up on the group. The handle is consumed.
    Failed(String),

    /// The group can never be placed on this cluster, so a retry would fail
    /// the same way. The handle is consumed.
    Infeasible(String),
}

/// Backend view of a placement group, as reported by [`ReservationBackend::snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BackendReservationState {
    Created,
    Removed,
}

/// Request/response contract of the cluster resource backend.
///
/// Every call is non-blocking. Creations complete asynchronously and are
/// observed by polling, possibly in a different order than they were issued.
pub trait ReservationBackend: fmt::Debug + Send {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Starts reserving `spec` and returns immediately.
    fn create(&mut self, spec: &ResourceSpec) -> StagingHandle;

    /// Non-blocking status check of an outstanding creation.
    fn poll(&mut self, handle: StagingHandle) -> CreationStatus;

    /// Aborts an outstanding creation. If the group was already placed its
    /// resources are released as well. Cancelling an unknown handle is a no-op.
    fn cancel(&mut self, handle: StagingHandle) -> Result<(), BackendError>;

    /// Removes a placed group. Removing an already removed group is a no-op.
    fn remove(&mut self, id: &PlacementGroupId) -> Result<(), BackendError>;

    /// Every group the backend knows about, including removed ones.
    fn snapshot(&self) -> Vec<(PlacementGroupId, BackendReservationState)>;

    /// Number of placed groups that have not been removed.
    fn live_count(&self) -> usize {
        self.snapshot().iter().filter(|(_, state)| *state == BackendReservationState::Created).count()
    }
}

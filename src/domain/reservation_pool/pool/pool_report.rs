use crate::domain::reservation_pool::reservation::reservation_store::ReservationId;
use crate::domain::reservation_pool::resource::resource_spec::ResourceSpec;
use crate::domain::reservation_pool::utils::id::TrialId;
use crate::error::Error;

/// What `request` did with a spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Forwarded to the backend; the reservation is Staging.
    Staged(ReservationId),

    /// Deferred by admission control at the given position of the queue.
    Queued { position: usize },

    /// Existing supply for the spec (e.g. a Cached reservation) already covers
    /// every waiting request. No backend call was made.
    Covered,
}

/// What `release` did with the trial's reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Kept for reuse. `evicted` is the least-recently-cached reservation that
    /// made room, if the spec's cache was full.
    Cached { reservation: ReservationId, evicted: Option<ReservationId> },

    /// Scheduled for removal.
    Removal { reservation: ReservationId },
}

/// Result of one `reconcile` tick.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub promoted: Vec<ReservationId>,
    pub retried: usize,
    pub dequeued: usize,

    /// Creations that exhausted their retries. Every entry is an
    /// `Error::CreationFailure` consuming one waiting request of its spec.
    pub failures: Vec<(ResourceSpec, Error)>,
}

/// Result of one `cleanup` tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    pub retrying: usize,
}

/// Result of a snapshot based liveness audit.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AuditReport {
    /// Ready/Cached/PendingRemoval reservations whose placement group vanished
    /// from the backend; they were untracked.
    pub externally_removed: usize,

    /// Trials whose InUse reservation vanished from the backend.
    pub lost_in_use: Vec<TrialId>,

    /// Live backend placement groups no reservation knows about; removal was issued.
    pub orphans_removed: usize,
}

use thiserror::Error;

use crate::domain::reservation_pool::reservation::reservation::ReservationState;
use crate::domain::reservation_pool::utils::id::{PlacementGroupId, TrialId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("File not found or could not be read: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse run description JSON: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("Failed to write statistics: {0}")]
    StatisticsError(#[from] csv::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid resource spec: {0}")]
    SpecInvalid(String),

    #[error(transparent)]
    Association(#[from] AssociationError),

    #[error("Backend could not create placement group for {spec} after {attempts} attempt(s): {reason}")]
    CreationFailure { spec: String, reason: String, attempts: u32 },

    #[error("Backend failed to remove placement group {id}: {source}")]
    RemovalFailure {
        id: String,
        #[source]
        source: BackendError,
    },
}

/// Contract violations of assign/release and of the reservation state machine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssociationError {
    #[error("Trial {trial} already holds a reservation")]
    TrialAlreadyAssigned { trial: TrialId },

    #[error("Trial {trial} holds no reservation")]
    NoAssociation { trial: TrialId },

    #[error("Reservation is not tracked by this pool")]
    UnknownReservation,

    #[error("Reservation in state {state:?} cannot be assigned")]
    NotAssignable { state: ReservationState },

    #[error("Invalid reservation state transition {from:?} -> {to:?}")]
    InvalidTransition { from: ReservationState, to: ReservationState },

    #[error("No waiting request for spec {spec}")]
    NoWaitingRequest { spec: String },
}

/// Errors reported by a [`ReservationBackend`](crate::domain::reservation_pool::backend::backend_trait::ReservationBackend).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("Backend temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown placement group {0}")]
    UnknownPlacementGroup(PlacementGroupId),
}

pub type Result<T> = std::result::Result<T, Error>;

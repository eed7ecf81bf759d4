use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    state::pointer::{AbortError, ApplyError, PlanError},
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable or refused the request.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Invalid input provided by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// A participant tried to like themselves.
    #[error("players cannot like themselves")]
    SelfLike,
    /// The room handle was closed.
    #[error("room handle is closed")]
    Closed,
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
    /// A batch import stopped part way; already imported rows are kept.
    #[error("imported {imported} of {total} questions")]
    PartialImport {
        imported: usize,
        total: usize,
        #[source]
        source: Box<ServiceError>,
    },
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::InvalidInput(format!("validation failed: {err}"))
    }
}

impl From<PlanError> for ServiceError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::AlreadyPending => {
                ServiceError::InvalidState("pointer move already pending".into())
            }
        }
    }
}

impl From<ApplyError> for ServiceError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::NoPending => ServiceError::InvalidState("no pointer move is pending".into()),
            ApplyError::IdMismatch { .. } => {
                ServiceError::InvalidState("pending pointer move does not match".into())
            }
        }
    }
}

impl From<AbortError> for ServiceError {
    fn from(err: AbortError) -> Self {
        match err {
            AbortError::NoPending => ServiceError::InvalidState("no pending pointer move".into()),
            AbortError::IdMismatch { .. } => {
                ServiceError::InvalidState("pointer move plan does not match".into())
            }
        }
    }
}

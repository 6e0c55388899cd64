//! Storage-level error shared by every backend.

use jobmesh_core::OrchestrationError;
use jobmesh_jobs::TransitionError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    /// Compare-and-set lost: re-read and re-decide.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Write-once value already present.
    #[error("already exists")]
    AlreadyExists,

    /// Backend unreachable or misbehaving.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<TransitionError> for StoreError {
    fn from(value: TransitionError) -> Self {
        StoreError::Conflict(value.to_string())
    }
}

impl From<StoreError> for OrchestrationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound => OrchestrationError::NotFound,
            StoreError::Conflict(msg) => OrchestrationError::Conflict(msg),
            StoreError::AlreadyExists => OrchestrationError::AlreadyExists,
            StoreError::Unavailable(msg) => OrchestrationError::Unavailable(msg),
        }
    }
}

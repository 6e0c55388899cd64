//! Orchestration error model.

use thiserror::Error;

/// Result type used across the orchestration layer.
pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

/// Orchestration-level error.
///
/// Every variant is a distinct, stable error kind at the API boundary.
/// `Conflict` is the exception: it signals an optimistic-concurrency collision
/// and callers re-read state and re-decide instead of surfacing it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestrationError {
    /// Missing, invalid, expired or revoked credential (or wrong identity kind).
    #[error("unauthorized")]
    Unauthorized,

    /// Unknown id, or an id owned by another tenant / assigned to another worker.
    ///
    /// The two cases are deliberately indistinguishable.
    #[error("not found")]
    NotFound,

    /// A submission failed basic validation.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Compare-and-set lost a race, or the requested transition is illegal
    /// from the current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A write-once value was already written.
    #[error("already exists")]
    AlreadyExists,

    /// The job has not reached a state where the requested data exists yet.
    #[error("job is not terminal yet")]
    NotTerminal,

    /// Infrastructure fault (store or cache unavailable). Retried with backoff
    /// by background loops, never recorded as a job failure.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl OrchestrationError {
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    /// Whether the caller should re-read state and retry its decision.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Stable machine-readable code used by the transport layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::Conflict(_) => "conflict",
            Self::AlreadyExists => "already_exists",
            Self::NotTerminal => "not_terminal",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

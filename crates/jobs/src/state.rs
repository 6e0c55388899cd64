//! Job state machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use jobmesh_core::OrchestrationError;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for a worker.
    Pending,
    /// Handed to a worker that has not started it yet.
    Assigned,
    /// Worker reported it started executing.
    Running,
    /// Tenant asked to cancel while running; the worker aborts on its next heartbeat.
    CancelRequested,
    /// Finished with a result (terminal).
    Succeeded,
    /// Finished without a result (terminal).
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 6] = [
        JobState::Pending,
        JobState::Assigned,
        JobState::Running,
        JobState::CancelRequested,
        JobState::Succeeded,
        JobState::Failed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// States in which a worker holds the job.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobState::Assigned | JobState::Running | JobState::CancelRequested
        )
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Assigned)
                | (Pending, Failed)
                | (Assigned, Running)
                | (Assigned, Pending)
                | (Assigned, Failed)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Pending)
                | (Running, CancelRequested)
                | (CancelRequested, Succeeded)
                | (CancelRequested, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Assigned => "assigned",
            JobState::Running => "running",
            JobState::CancelRequested => "cancel_requested",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<JobState> {
        JobState::ALL.into_iter().find(|st| st.as_str() == s)
    }
}

impl core::fmt::Display for JobState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job ended in `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Attempt limit reached after lost assignments / executions.
    RetriesExhausted,
    /// Tenant-initiated.
    Cancelled,
    /// The worker ran the job and reported a failure.
    WorkerReported { diagnostic: String },
}

impl FailureReason {
    pub fn worker_reported(diagnostic: impl Into<String>) -> Self {
        Self::WorkerReported {
            diagnostic: diagnostic.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::RetriesExhausted => "retries_exhausted",
            FailureReason::Cancelled => "cancelled",
            FailureReason::WorkerReported { .. } => "worker_reported",
        }
    }

    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            FailureReason::WorkerReported { diagnostic } => Some(diagnostic),
            _ => None,
        }
    }

    /// Rebuild from the `(code, diagnostic)` pair used by row-oriented stores.
    pub fn from_parts(code: &str, diagnostic: Option<String>) -> Option<Self> {
        match code {
            "retries_exhausted" => Some(FailureReason::RetriesExhausted),
            "cancelled" => Some(FailureReason::Cancelled),
            "worker_reported" => Some(FailureReason::WorkerReported {
                diagnostic: diagnostic.unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

/// A compare-and-set transition was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The stored state did not match the caller's expectation.
    #[error("stale state: expected {expected}, found {actual}")]
    Stale { expected: JobState, actual: JobState },

    /// The requested edge does not exist in the state machine.
    #[error("illegal transition {from} -> {to}")]
    Illegal { from: JobState, to: JobState },
}

impl From<TransitionError> for OrchestrationError {
    fn from(value: TransitionError) -> Self {
        OrchestrationError::conflict(value.to_string())
    }
}

//! The job record and its compare-and-set transition function.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use jobmesh_core::{CapabilitySet, Entity, JobId, OrchestrationError, TenantId, WorkerId};

use crate::payload::JobPayload;
use crate::result::{JobResult, ResultRef};
use crate::state::{FailureReason, JobState, TransitionError};

/// A unit of asynchronous work owned by one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Owner; immutable after creation.
    pub tenant_id: TenantId,
    pub payload: JobPayload,
    pub state: JobState,
    pub assigned_worker: Option<WorkerId>,
    /// Lost attempts (assignment timeouts + worker losses).
    pub attempts: u32,
    pub failure: Option<FailureReason>,
    pub result: Option<ResultRef>,
    /// Bumped on every applied transition.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Entity for Job {
    type Id = JobId;

    fn id(&self) -> JobId {
        self.id
    }
}

/// A requested state change plus the fields that change with it.
///
/// Build one with the named constructors; stores apply it with
/// [`Job::apply`] only if the stored state still equals the caller's
/// expectation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub to: JobState,
    pub kind: TransitionKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionKind {
    Assign { worker: WorkerId },
    Start,
    /// Back to the queue after a lost attempt.
    Requeue,
    RequestCancel,
    Succeed { result: JobResult },
    Fail { reason: FailureReason, lost_attempt: bool },
}

impl Transition {
    pub fn assign(worker: WorkerId) -> Self {
        Self {
            to: JobState::Assigned,
            kind: TransitionKind::Assign { worker },
        }
    }

    pub fn start() -> Self {
        Self {
            to: JobState::Running,
            kind: TransitionKind::Start,
        }
    }

    pub fn requeue() -> Self {
        Self {
            to: JobState::Pending,
            kind: TransitionKind::Requeue,
        }
    }

    pub fn request_cancel() -> Self {
        Self {
            to: JobState::CancelRequested,
            kind: TransitionKind::RequestCancel,
        }
    }

    pub fn succeed(result: JobResult) -> Self {
        Self {
            to: JobState::Succeeded,
            kind: TransitionKind::Succeed { result },
        }
    }

    pub fn fail(reason: FailureReason) -> Self {
        Self {
            to: JobState::Failed,
            kind: TransitionKind::Fail {
                reason,
                lost_attempt: false,
            },
        }
    }

    /// Fail and count the attempt that was just lost.
    pub fn exhaust() -> Self {
        Self {
            to: JobState::Failed,
            kind: TransitionKind::Fail {
                reason: FailureReason::RetriesExhausted,
                lost_attempt: true,
            },
        }
    }

    /// Result carried by a `Succeed` transition, for stores that persist it
    /// alongside the state change.
    pub fn result(&self) -> Option<&JobResult> {
        match &self.kind {
            TransitionKind::Succeed { result } => Some(result),
            _ => None,
        }
    }
}

impl Job {
    /// Create a new `pending` job.
    pub fn new(tenant_id: TenantId, payload: JobPayload, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            tenant_id,
            payload,
            state: JobState::Pending,
            assigned_worker: None,
            attempts: 0,
            failure: None,
            result: None,
            version: 0,
            created_at: now,
            updated_at: now,
            assigned_at: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn requirement(&self) -> &CapabilitySet {
        &self.payload.requirement
    }

    /// Whether `worker` currently holds this job.
    pub fn is_held_by(&self, worker: WorkerId) -> bool {
        self.state.is_active() && self.assigned_worker == Some(worker)
    }

    /// Compare-and-set: produce the next version of this job if its state is
    /// still `expected` and `expected -> transition.to` is a legal edge.
    pub fn apply(
        &self,
        expected: JobState,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<Job, TransitionError> {
        if self.state != expected {
            return Err(TransitionError::Stale {
                expected,
                actual: self.state,
            });
        }
        if !self.state.can_transition_to(transition.to) {
            return Err(TransitionError::Illegal {
                from: self.state,
                to: transition.to,
            });
        }

        let mut next = self.clone();
        next.state = transition.to;
        next.version += 1;
        next.updated_at = now;

        match &transition.kind {
            TransitionKind::Assign { worker } => {
                next.assigned_worker = Some(*worker);
                next.assigned_at = Some(now);
                next.started_at = None;
            }
            TransitionKind::Start => {
                next.started_at = Some(now);
            }
            TransitionKind::Requeue => {
                next.assigned_worker = None;
                next.assigned_at = None;
                next.started_at = None;
                next.attempts += 1;
            }
            TransitionKind::RequestCancel => {}
            TransitionKind::Succeed { result } => {
                next.result = Some(result.reference());
                next.finished_at = Some(now);
            }
            TransitionKind::Fail {
                reason,
                lost_attempt,
            } => {
                if *lost_attempt {
                    next.attempts += 1;
                }
                next.failure = Some(reason.clone());
                next.finished_at = Some(now);
            }
        }

        Ok(next)
    }

    /// Decide what happens after the current holder lost the job
    /// (assignment timeout or worker loss).
    ///
    /// - `cancel_requested` jobs finish as `failed:Cancelled`
    /// - jobs whose next attempt would reach `max_attempts` finish as
    ///   `failed:RetriesExhausted`
    /// - everything else goes back to `pending`
    pub fn lost_attempt_transition(&self, max_attempts: u32) -> Transition {
        if self.state == JobState::CancelRequested {
            return Transition::fail(FailureReason::Cancelled);
        }
        if self.attempts.saturating_add(1) >= max_attempts {
            Transition::exhaust()
        } else {
            Transition::requeue()
        }
    }

    /// Decide how to honor a tenant cancellation.
    ///
    /// Returns `Ok(None)` when cancellation was already requested.
    pub fn cancel_transition(&self) -> Result<Option<Transition>, OrchestrationError> {
        match self.state {
            JobState::Pending | JobState::Assigned => {
                Ok(Some(Transition::fail(FailureReason::Cancelled)))
            }
            JobState::Running => Ok(Some(Transition::request_cancel())),
            JobState::CancelRequested => Ok(None),
            JobState::Succeeded | JobState::Failed => Err(OrchestrationError::conflict(format!(
                "job {} is already {}",
                self.id, self.state
            ))),
        }
    }
}

/// Per-tenant counts by state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub assigned: usize,
    pub running: usize,
    pub cancel_requested: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl JobStats {
    pub fn record(&mut self, state: JobState) {
        self.add(state, 1);
    }

    /// Add `n` jobs in `state`, e.g. one `GROUP BY` row.
    pub fn add(&mut self, state: JobState, n: usize) {
        let slot = match state {
            JobState::Pending => &mut self.pending,
            JobState::Assigned => &mut self.assigned,
            JobState::Running => &mut self.running,
            JobState::CancelRequested => &mut self.cancel_requested,
            JobState::Succeeded => &mut self.succeeded,
            JobState::Failed => &mut self.failed,
        };
        *slot += n;
    }
}

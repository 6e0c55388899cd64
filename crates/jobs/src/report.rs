//! Status reports sent by the worker holding a job.

use chrono::{DateTime, Utc};

use jobmesh_core::{OrchestrationError, WorkerId};

use crate::job::{Job, Transition};
use crate::result::JobResult;
use crate::state::{FailureReason, JobState};

/// What a worker says about the job it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerReport {
    Running,
    Succeeded { content: Vec<u8> },
    /// Execution error on the worker side; a normal terminal outcome.
    Failed { diagnostic: String },
}

impl Job {
    /// Decide how a report from `worker` moves this job.
    ///
    /// `Ok(None)` means the report is a repeat and nothing changes.
    /// A job the worker does not hold is `NotFound`, exactly like a job that
    /// does not exist.
    pub fn report_transition(
        &self,
        worker: WorkerId,
        report: &WorkerReport,
        now: DateTime<Utc>,
    ) -> Result<Option<Transition>, OrchestrationError> {
        if self.assigned_worker != Some(worker) {
            return Err(OrchestrationError::NotFound);
        }
        if !self.state.is_active() {
            if self.state.is_terminal() {
                return Err(OrchestrationError::conflict(format!(
                    "job {} is already {}",
                    self.id, self.state
                )));
            }
            return Err(OrchestrationError::NotFound);
        }

        match (report, self.state) {
            (WorkerReport::Running, JobState::Assigned) => Ok(Some(Transition::start())),
            (WorkerReport::Running, _) => Ok(None),

            (WorkerReport::Succeeded { content }, JobState::Running | JobState::CancelRequested) => {
                let result =
                    JobResult::new(self.id, content.clone(), now).with_run_time(self.started_at);
                Ok(Some(Transition::succeed(result)))
            }
            (WorkerReport::Succeeded { .. }, _) => Err(OrchestrationError::conflict(format!(
                "job {} must be running before it can succeed",
                self.id
            ))),

            (WorkerReport::Failed { .. }, JobState::CancelRequested) => {
                Ok(Some(Transition::fail(FailureReason::Cancelled)))
            }
            (WorkerReport::Failed { diagnostic }, _) => Ok(Some(Transition::fail(
                FailureReason::worker_reported(diagnostic.clone()),
            ))),
        }
    }
}

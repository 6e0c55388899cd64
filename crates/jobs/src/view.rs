use chrono::{DateTime, Utc};
use serde::Serialize;

use jobmesh_core::{CapabilitySet, JobId};

use crate::job::Job;
use crate::result::ResultRef;
use crate::state::{FailureReason, JobState};

/// What a tenant is allowed to see of its job.
///
/// Worker identity is deliberately absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobView {
    pub job_id: JobId,
    pub state: JobState,
    pub requirement: CapabilitySet,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            state: job.state,
            requirement: job.payload.requirement.clone(),
            attempts: job.attempts,
            failure: job.failure.clone(),
            result: job.result,
            created_at: job.created_at,
            updated_at: job.updated_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        JobView::from(&job)
    }
}

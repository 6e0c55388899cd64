//! Taking a job back from a holder that lost it.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use jobmesh_jobs::{FailureReason, Job, JobState};

use crate::error::StoreError;
use crate::job_store::JobStore;

/// Re-reads allowed after a lost compare-and-set before giving up for this cycle.
pub(crate) const MAX_REREADS: usize = 4;

/// Requeue (or exhaust, or finish as cancelled) a job whose holder is gone.
///
/// `still_lost` re-checks the precondition after every conflicting re-read;
/// once it no longer holds, someone else already handled the job and this
/// returns `Ok(None)`. `Ok(Some(job))` is the stored job after this actor
/// moved it.
pub(crate) async fn reclaim(
    jobs: &dyn JobStore,
    mut job: Job,
    max_attempts: u32,
    now: DateTime<Utc>,
    cause: &'static str,
    still_lost: impl Fn(&Job) -> bool + Send + Sync,
) -> Result<Option<Job>, StoreError> {
    for _ in 0..MAX_REREADS {
        if !still_lost(&job) {
            return Ok(None);
        }

        let transition = job.lost_attempt_transition(max_attempts);
        match jobs.transition(job.id, job.state, transition, now).await {
            Ok(updated) => {
                log_outcome(&job, &updated, cause);
                return Ok(Some(updated));
            }
            Err(e) if e.is_conflict() => {
                job = jobs.load(job.id).await?;
            }
            Err(e) => return Err(e),
        }
    }

    warn!(job_id = %job.id, cause, "gave up reclaiming job after repeated conflicts");
    Ok(None)
}

fn log_outcome(before: &Job, after: &Job, cause: &'static str) {
    match (after.state, &after.failure) {
        (JobState::Pending, _) => info!(
            job_id = %after.id,
            worker_id = ?before.assigned_worker,
            attempts = after.attempts,
            cause,
            "job returned to pending"
        ),
        (JobState::Failed, Some(FailureReason::RetriesExhausted)) => warn!(
            job_id = %after.id,
            tenant_id = %after.tenant_id,
            attempts = after.attempts,
            cause,
            "job failed: retries exhausted"
        ),
        _ => info!(
            job_id = %after.id,
            state = %after.state,
            cause,
            "job finished after losing its worker"
        ),
    }
}

//! Dispatcher: matches pending jobs to idle workers and owns the
//! timeout/attempt policy.
//!
//! ## Cycle
//!
//! 1. **Assignment timeout**: `assigned` jobs whose worker never reported
//!    `running` within the grace period go back to `pending` (or fail with
//!    `RetriesExhausted`), and the worker is released.
//! 2. **Matching**: walk pending jobs oldest first. For each, try the idle
//!    workers that satisfy its requirement in registry order: reserve the
//!    worker (CAS in the registry), then move the job `pending → assigned`
//!    (CAS in the Job Store). If the job CAS loses, release the worker and
//!    move on; another dispatcher got there first.
//!
//! Nothing here is locked across instances. Any number of dispatchers may run
//! the same cycle concurrently against shared stores.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use jobmesh_core::{CapabilitySet, JobId, WorkerId};
use jobmesh_jobs::{FailureReason, Job, JobState, Transition, Worker};

use crate::config::{OrchestratorConfig, to_chrono};
use crate::error::StoreError;
use crate::job_store::{JobStore, PendingScan};
use crate::notify::JobNotifier;
use crate::recovery::reclaim;
use crate::registry::WorkerRegistry;

/// What one dispatch cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub assigned: Vec<(JobId, WorkerId)>,
    /// Jobs returned to `pending` by the assignment timeout.
    pub timed_out: usize,
    /// Jobs failed with `RetriesExhausted` this cycle.
    pub exhausted: usize,
    /// Compare-and-set races lost to another actor.
    pub conflicts: usize,
}

#[derive(Clone)]
pub struct Dispatcher {
    jobs: Arc<dyn JobStore>,
    workers: Arc<dyn WorkerRegistry>,
    notifier: JobNotifier,
    assignment_grace: Duration,
    max_attempts: u32,
    page_size: usize,
}

impl Dispatcher {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        workers: Arc<dyn WorkerRegistry>,
        notifier: JobNotifier,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            jobs,
            workers,
            notifier,
            assignment_grace: to_chrono(config.assignment_grace),
            max_attempts: config.max_attempts,
            page_size: config.pending_page_size,
        }
    }

    /// Run one full cycle as of `now`.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<DispatchReport, StoreError> {
        let mut report = DispatchReport::default();
        self.expire_assignments(now, &mut report).await?;
        self.assign_pending(now, &mut report).await?;

        if !report.assigned.is_empty() || report.timed_out > 0 || report.exhausted > 0 {
            debug!(
                assigned = report.assigned.len(),
                timed_out = report.timed_out,
                exhausted = report.exhausted,
                conflicts = report.conflicts,
                "dispatch cycle complete"
            );
        }
        Ok(report)
    }

    async fn expire_assignments(
        &self,
        now: DateTime<Utc>,
        report: &mut DispatchReport,
    ) -> Result<(), StoreError> {
        let cutoff = now - self.assignment_grace;
        loop {
            let stale = self.jobs.assigned_before(cutoff, self.page_size).await?;
            let page_len = stale.len();
            let mut moved = 0;

            for job in stale {
                let Some(worker) = job.assigned_worker else {
                    continue;
                };
                let held_since = job.assigned_at;
                let outcome = reclaim(
                    self.jobs.as_ref(),
                    job,
                    self.max_attempts,
                    now,
                    "assignment timeout",
                    move |j: &Job| {
                        j.state == JobState::Assigned
                            && j.assigned_worker == Some(worker)
                            && j.assigned_at == held_since
                    },
                )
                .await?;

                match outcome {
                    Some(updated) => {
                        moved += 1;
                        self.workers.release(worker, updated.id, false, now).await?;
                        self.record_lost(&updated, report);
                        self.notifier.notify(updated.id);
                    }
                    None => report.conflicts += 1,
                }
            }

            // Moved jobs leave the `assigned` set, so the next page is fresh.
            if page_len < self.page_size || moved == 0 {
                return Ok(());
            }
        }
    }

    fn record_lost(&self, job: &Job, report: &mut DispatchReport) {
        match (job.state, &job.failure) {
            (JobState::Failed, Some(FailureReason::RetriesExhausted)) => report.exhausted += 1,
            (JobState::Pending, _) => report.timed_out += 1,
            _ => {}
        }
    }

    async fn assign_pending(
        &self,
        now: DateTime<Utc>,
        report: &mut DispatchReport,
    ) -> Result<(), StoreError> {
        let mut idle: Vec<Worker> = self.workers.eligible_workers(&CapabilitySet::new()).await?;
        if idle.is_empty() {
            return Ok(());
        }

        let mut scan = PendingScan::new(self.jobs.as_ref(), None, self.page_size);
        while let Some(job) = scan.next().await? {
            if idle.is_empty() {
                break;
            }

            if job.attempts >= self.max_attempts {
                self.exhaust_pending(&job, now, report).await?;
                continue;
            }

            self.assign_one(&job, &mut idle, now, report).await?;
        }
        Ok(())
    }

    /// Try the idle workers able to run `job`, in registry order, until one
    /// sticks or the job is taken elsewhere.
    async fn assign_one(
        &self,
        job: &Job,
        idle: &mut Vec<Worker>,
        now: DateTime<Utc>,
        report: &mut DispatchReport,
    ) -> Result<(), StoreError> {
        let mut i = 0;
        while i < idle.len() {
            if !idle[i].capabilities.satisfies(job.requirement()) {
                i += 1;
                continue;
            }

            // Either way this worker is no longer idle from our point of view.
            let worker = idle.remove(i);
            if !self.workers.reserve(worker.id, job.id, now).await? {
                report.conflicts += 1;
                continue;
            }

            match self
                .jobs
                .transition(job.id, JobState::Pending, Transition::assign(worker.id), now)
                .await
            {
                Ok(_) => {
                    info!(
                        job_id = %job.id,
                        tenant_id = %job.tenant_id,
                        worker_id = %worker.id,
                        attempts = job.attempts,
                        "job assigned"
                    );
                    report.assigned.push((job.id, worker.id));
                    self.notifier.notify(job.id);
                    return Ok(());
                }
                Err(e) => {
                    self.workers.release(worker.id, job.id, false, now).await?;
                    if e.is_conflict() {
                        report.conflicts += 1;
                        // Keep the worker for the next job.
                        idle.insert(i, worker);
                        return Ok(());
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn exhaust_pending(
        &self,
        job: &Job,
        now: DateTime<Utc>,
        report: &mut DispatchReport,
    ) -> Result<(), StoreError> {
        let transition = Transition::fail(FailureReason::RetriesExhausted);
        match self
            .jobs
            .transition(job.id, JobState::Pending, transition, now)
            .await
        {
            Ok(updated) => {
                warn!(
                    job_id = %updated.id,
                    tenant_id = %updated.tenant_id,
                    attempts = updated.attempts,
                    "job failed: retries exhausted"
                );
                report.exhausted += 1;
                self.notifier.notify(updated.id);
                Ok(())
            }
            Err(e) if e.is_conflict() => {
                report.conflicts += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

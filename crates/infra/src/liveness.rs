//! Liveness sweep: the only worker-crash recovery mechanism.
//!
//! Workers silent for longer than the liveness window are marked offline and
//! whatever the Job Store says they held is taken back. The registry's view of
//! the held job is only logged; the store decides.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, warn};

use jobmesh_core::WorkerId;
use jobmesh_jobs::{FailureReason, Job, JobState, WorkerStatus};

use crate::config::{OrchestratorConfig, to_chrono};
use crate::error::StoreError;
use crate::job_store::JobStore;
use crate::notify::JobNotifier;
use crate::recovery::reclaim;
use crate::registry::WorkerRegistry;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub workers_lost: Vec<WorkerId>,
    pub jobs_requeued: usize,
    pub jobs_exhausted: usize,
    pub jobs_cancelled: usize,
}

#[derive(Clone)]
pub struct LivenessSweeper {
    jobs: Arc<dyn JobStore>,
    workers: Arc<dyn WorkerRegistry>,
    notifier: JobNotifier,
    liveness_window: Duration,
    max_attempts: u32,
    /// Offline workers whose job could not be reclaimed yet (infra fault),
    /// keyed to the last heartbeat observed when they were declared lost.
    backlog: Arc<Mutex<HashMap<WorkerId, DateTime<Utc>>>>,
}

impl LivenessSweeper {
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
            liveness_window: to_chrono(config.liveness_window),
            max_attempts: config.max_attempts,
            backlog: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport::default();

        let newly_lost = self.workers.mark_stale_offline(now, self.liveness_window).await?;
        let mut pending: Vec<(WorkerId, DateTime<Utc>)> = self.take_backlog();
        for lost in newly_lost {
            warn!(
                worker_id = %lost.worker_id,
                held_job = ?lost.held_job,
                last_heartbeat = %lost.last_heartbeat,
                "worker missed its liveness window; marked offline"
            );
            report.workers_lost.push(lost.worker_id);
            pending.push((lost.worker_id, lost.last_heartbeat));
        }

        let mut first_error = None;
        for (worker_id, last_seen) in pending {
            let result = match self.still_lost(worker_id, last_seen).await {
                Ok(true) => self.reclaim_from(worker_id, now, &mut report).await,
                Ok(false) => {
                    debug!(worker_id = %worker_id, "worker came back before its job was reclaimed");
                    Ok(())
                }
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                error!(worker_id = %worker_id, error = %e, "failed to reclaim job from lost worker");
                self.defer(worker_id, last_seen);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// The worker is still offline with no heartbeat since `last_seen`. A
    /// worker removed by an operator never came back either.
    async fn still_lost(
        &self,
        worker_id: WorkerId,
        last_seen: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.workers.get(worker_id).await {
            Ok(worker) => {
                Ok(worker.status == WorkerStatus::Offline && worker.last_heartbeat == last_seen)
            }
            Err(StoreError::NotFound) => Ok(true),
            Err(e) => Err(e),
        }
    }

    async fn reclaim_from(
        &self,
        worker_id: WorkerId,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<(), StoreError> {
        let Some(job) = self.jobs.active_for_worker(worker_id).await? else {
            return Ok(());
        };

        let outcome = reclaim(
            self.jobs.as_ref(),
            job,
            self.max_attempts,
            now,
            "worker lost",
            move |j: &Job| j.is_held_by(worker_id),
        )
        .await?;

        if let Some(updated) = outcome {
            match (updated.state, &updated.failure) {
                (JobState::Pending, _) => report.jobs_requeued += 1,
                (JobState::Failed, Some(FailureReason::RetriesExhausted)) => {
                    report.jobs_exhausted += 1
                }
                (JobState::Failed, Some(FailureReason::Cancelled)) => report.jobs_cancelled += 1,
                _ => {}
            }
            self.notifier.notify(updated.id);
        }
        Ok(())
    }

    fn take_backlog(&self) -> Vec<(WorkerId, DateTime<Utc>)> {
        match self.backlog.lock() {
            Ok(mut backlog) => backlog.drain().collect(),
            Err(_) => Vec::new(),
        }
    }

    fn defer(&self, worker_id: WorkerId, last_seen: DateTime<Utc>) {
        if let Ok(mut backlog) = self.backlog.lock() {
            backlog.insert(worker_id, last_seen);
        }
    }
}

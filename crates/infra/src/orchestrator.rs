//! The orchestration facade called by the transport layer.
//!
//! Every operation re-reads the Job Store before acting; the facade keeps no
//! authoritative copy of job state. Identity has already been resolved by the
//! caller: tenant operations take a `TenantId`, worker operations a
//! `WorkerId`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use jobmesh_core::{CapabilitySet, JobId, OrchestrationError, OrchestrationResult, TenantId, WorkerId};
use jobmesh_jobs::{
    Job, JobPayload, JobResult, JobState, JobStats, JobView, Worker, WorkerReport,
};

use crate::config::OrchestratorConfig;
use crate::dispatcher::Dispatcher;
use crate::error::StoreError;
use crate::job_store::{InMemoryJobStore, JobStore};
use crate::liveness::LivenessSweeper;
use crate::notify::JobNotifier;
use crate::recovery::MAX_REREADS;
use crate::registry::{InMemoryWorkerRegistry, WorkerRegistry};
use crate::result_cache::{InMemoryResultCache, ResultCache};
use crate::runner::{self, BackgroundHandle};

/// Cap on a single tenant listing.
pub const MAX_LIST_LIMIT: usize = 500;

/// Answer to a worker heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeartbeatAck {
    /// The job this worker should be running, if any.
    pub job_id: Option<JobId>,
    /// The tenant asked to cancel that job; the worker should abort.
    pub cancel: bool,
}

#[derive(Clone)]
pub struct Orchestrator {
    jobs: Arc<dyn JobStore>,
    workers: Arc<dyn WorkerRegistry>,
    results: Arc<dyn ResultCache>,
    notifier: JobNotifier,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        workers: Arc<dyn WorkerRegistry>,
        results: Arc<dyn ResultCache>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            jobs,
            workers,
            results,
            notifier: JobNotifier::new(),
            config,
        }
    }

    /// Everything in process memory.
    pub fn in_memory(config: OrchestratorConfig) -> Self {
        let registry = InMemoryWorkerRegistry::new(
            config.worker_ordering,
            config.assignment_grace_chrono(),
        );
        let cache = InMemoryResultCache::with_ttl(config.result_cache_ttl);
        Self::new(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(registry),
            Arc::new(cache),
            config,
        )
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.jobs.clone(),
            self.workers.clone(),
            self.notifier.clone(),
            &self.config,
        )
    }

    pub fn sweeper(&self) -> LivenessSweeper {
        LivenessSweeper::new(
            self.jobs.clone(),
            self.workers.clone(),
            self.notifier.clone(),
            &self.config,
        )
    }

    /// Start the dispatcher and liveness loops on the current runtime.
    pub fn spawn_background(&self) -> BackgroundHandle {
        runner::spawn(
            self.dispatcher(),
            self.config.dispatch_interval,
            self.sweeper(),
            self.config.sweep_interval,
            self.config.infra_backoff.clone(),
        )
    }

    // ---- tenant operations ----

    pub async fn submit(
        &self,
        tenant_id: TenantId,
        data: Vec<u8>,
        requirement: CapabilitySet,
    ) -> OrchestrationResult<JobId> {
        let payload = JobPayload::new(data, requirement, self.config.max_payload_bytes)?;
        let job_id = self.jobs.submit(tenant_id, payload, Utc::now()).await?;
        info!(job_id = %job_id, tenant_id = %tenant_id, "job submitted");
        Ok(job_id)
    }

    pub async fn job(&self, tenant_id: TenantId, job_id: JobId) -> OrchestrationResult<JobView> {
        Ok(self.jobs.get(tenant_id, job_id).await?.into())
    }

    /// Long-poll: return once the job leaves the state observed at call time,
    /// reaches a terminal state, or `timeout` (capped by `max_wait`) elapses.
    pub async fn wait(
        &self,
        tenant_id: TenantId,
        job_id: JobId,
        timeout: Duration,
    ) -> OrchestrationResult<JobView> {
        let timeout = timeout.min(self.config.max_wait);
        // Subscribe before the first read so no change slips between the two.
        let mut changes = self.notifier.subscribe();
        let observed = self.jobs.get(tenant_id, job_id).await?;
        if observed.state.is_terminal() || timeout.is_zero() {
            return Ok(observed.into());
        }

        let recheck = self.config.heartbeat_interval.min(Duration::from_secs(1));
        let deadline = Instant::now() + timeout;
        let mut next_recheck = Instant::now() + recheck;
        loop {
            let now = Instant::now();
            let remaining = deadline.saturating_duration_since(now);
            if remaining.is_zero() {
                return Ok(observed.into());
            }

            let wake = remaining.min(next_recheck.saturating_duration_since(now));
            let reread = match tokio::time::timeout(wake, changes.recv()).await {
                // Traffic on other jobs must not starve the periodic re-read.
                Ok(Ok(id)) if id != job_id => Instant::now() >= next_recheck,
                // Our job changed, the channel lagged or closed, or the
                // periodic re-read is due.
                _ => true,
            };
            if !reread {
                continue;
            }
            next_recheck = Instant::now() + recheck;

            let current = self.jobs.get(tenant_id, job_id).await?;
            if current.state != observed.state || current.state.is_terminal() {
                return Ok(current.into());
            }
        }
    }

    pub async fn list(
        &self,
        tenant_id: TenantId,
        state: Option<JobState>,
        limit: usize,
    ) -> OrchestrationResult<Vec<JobView>> {
        let jobs = self
            .jobs
            .list(tenant_id, state, limit.clamp(1, MAX_LIST_LIMIT))
            .await?;
        Ok(jobs.iter().map(JobView::from).collect())
    }

    pub async fn stats(&self, tenant_id: TenantId) -> OrchestrationResult<JobStats> {
        Ok(self.jobs.stats(tenant_id).await?)
    }

    /// Result of a succeeded job: cache first, durable store on a miss (which
    /// also repopulates the cache).
    pub async fn result(&self, tenant_id: TenantId, job_id: JobId) -> OrchestrationResult<JobResult> {
        let job = self.jobs.get(tenant_id, job_id).await?;
        match job.state {
            JobState::Succeeded => {}
            // A failed job never has a result.
            JobState::Failed => return Err(OrchestrationError::NotFound),
            _ => return Err(OrchestrationError::NotTerminal),
        }

        match self.results.get(job_id).await {
            Ok(result) => return Ok(result),
            Err(StoreError::NotFound) => {}
            Err(e) => warn!(job_id = %job_id, error = %e, "result cache read failed; using durable store"),
        }

        let result = self.jobs.result(job_id).await?;
        self.cache_result(&result).await;
        Ok(result)
    }

    pub async fn cancel(&self, tenant_id: TenantId, job_id: JobId) -> OrchestrationResult<JobView> {
        for _ in 0..MAX_REREADS {
            let job = self.jobs.get(tenant_id, job_id).await?;
            let Some(transition) = job.cancel_transition()? else {
                return Ok(job.into());
            };

            let now = Utc::now();
            match self.jobs.transition(job_id, job.state, transition, now).await {
                Ok(updated) => {
                    info!(
                        job_id = %job_id,
                        tenant_id = %tenant_id,
                        from = %job.state,
                        to = %updated.state,
                        "job cancellation applied"
                    );
                    if updated.state.is_terminal() {
                        if let Some(worker) = job.assigned_worker {
                            self.workers.release(worker, job_id, false, now).await?;
                        }
                    }
                    self.notifier.notify(job_id);
                    return Ok(updated.into());
                }
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(OrchestrationError::conflict(format!(
            "job {job_id} kept changing; cancellation not applied"
        )))
    }

    // ---- worker operations ----

    /// Refresh liveness and tell the worker what it should be doing.
    ///
    /// The Job Store decides what the worker holds; the job id the worker
    /// reports is only compared against it.
    pub async fn heartbeat(
        &self,
        worker_id: WorkerId,
        capabilities: CapabilitySet,
        reported_job: Option<JobId>,
    ) -> OrchestrationResult<HeartbeatAck> {
        let now = Utc::now();
        let active = self.jobs.active_for_worker(worker_id).await?;
        let active_id = active.as_ref().map(|j| j.id);

        if reported_job.is_some() && reported_job != active_id {
            debug!(
                worker_id = %worker_id,
                reported = ?reported_job,
                assigned = ?active_id,
                "worker reported a job it does not hold"
            );
        }

        self.workers
            .heartbeat(worker_id, capabilities, active_id, now)
            .await?;

        Ok(HeartbeatAck {
            job_id: active_id,
            cancel: active.is_some_and(|j| j.state == JobState::CancelRequested),
        })
    }

    /// Apply a status report from the worker holding `job_id`.
    pub async fn report(
        &self,
        worker_id: WorkerId,
        job_id: JobId,
        report: WorkerReport,
    ) -> OrchestrationResult<JobView> {
        for _ in 0..MAX_REREADS {
            let job = self.jobs.load(job_id).await?;
            let now = Utc::now();
            let Some(transition) = job.report_transition(worker_id, &report, now)? else {
                return Ok(job.into());
            };
            let result = transition.result().cloned();

            match self.jobs.transition(job_id, job.state, transition, now).await {
                Ok(updated) => {
                    self.after_report(worker_id, &job, &updated, result, now).await?;
                    return Ok(updated.into());
                }
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(OrchestrationError::conflict(format!(
            "job {job_id} kept changing; report not applied"
        )))
    }

    async fn after_report(
        &self,
        worker_id: WorkerId,
        before: &Job,
        updated: &Job,
        result: Option<JobResult>,
        now: chrono::DateTime<Utc>,
    ) -> OrchestrationResult<()> {
        info!(
            job_id = %updated.id,
            worker_id = %worker_id,
            from = %before.state,
            to = %updated.state,
            "worker report applied"
        );

        if updated.state.is_terminal() {
            let completed = updated.state == JobState::Succeeded;
            self.workers.release(worker_id, updated.id, completed, now).await?;
        }
        if let Some(result) = result {
            self.cache_result(&result).await;
        }
        self.notifier.notify(updated.id);
        Ok(())
    }

    async fn cache_result(&self, result: &JobResult) {
        match self.results.put(result).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists) => {
                debug!(job_id = %result.job_id, "result already cached")
            }
            Err(e) => warn!(job_id = %result.job_id, error = %e, "failed to cache result"),
        }
    }

    // ---- operator operations ----

    /// Hard-delete an offline worker record.
    pub async fn remove_worker(&self, worker_id: WorkerId) -> OrchestrationResult<Worker> {
        let removed = self.workers.remove(worker_id).await?;
        info!(worker_id = %worker_id, "worker removed by operator");
        Ok(removed)
    }

    pub async fn workers(&self) -> OrchestrationResult<Vec<Worker>> {
        Ok(self.workers.list().await?)
    }
}

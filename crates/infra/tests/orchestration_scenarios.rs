//! End-to-end orchestration scenarios against the in-memory stores.
//!
//! Time-driven behavior (liveness window, assignment grace) is exercised by
//! handing the dispatcher and sweeper an explicit `now` in the future instead
//! of sleeping.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

use jobmesh_core::{CapabilitySet, JobId, OrchestrationError, TenantId, WorkerId};
use jobmesh_infra::{
    InMemoryJobStore, InMemoryResultCache, InMemoryWorkerRegistry, JobStore, Orchestrator,
    OrchestratorConfig, PendingCursor, ResultCache, StoreError, WorkerRegistry,
};
use jobmesh_jobs::{
    FailureReason, Job, JobResult, JobState, JobStats, Transition, WorkerReport, WorkerStatus,
};

struct Harness {
    orchestrator: Orchestrator,
    jobs: Arc<InMemoryJobStore>,
    workers: Arc<InMemoryWorkerRegistry>,
    cache: Arc<InMemoryResultCache>,
    config: OrchestratorConfig,
}

fn harness(config: OrchestratorConfig) -> Harness {
    let jobs = InMemoryJobStore::arc();
    let workers = Arc::new(InMemoryWorkerRegistry::new(
        config.worker_ordering,
        config.assignment_grace_chrono(),
    ));
    let cache = Arc::new(InMemoryResultCache::new());
    let orchestrator = Orchestrator::new(
        jobs.clone(),
        workers.clone(),
        cache.clone(),
        config.clone(),
    );
    Harness {
        orchestrator,
        jobs,
        workers,
        cache,
        config,
    }
}

fn default_harness() -> Harness {
    harness(OrchestratorConfig::default())
}

fn caps(tags: &[&str]) -> CapabilitySet {
    CapabilitySet::parse(tags.iter().copied()).unwrap()
}

fn past_liveness(config: &OrchestratorConfig) -> chrono::Duration {
    config.liveness_window_chrono() + chrono::Duration::seconds(1)
}

fn past_grace(config: &OrchestratorConfig) -> chrono::Duration {
    config.assignment_grace_chrono() + chrono::Duration::seconds(1)
}

impl Harness {
    async fn submit(&self, tenant: TenantId, tags: &[&str]) -> JobId {
        self.orchestrator
            .submit(tenant, b"input".to_vec(), caps(tags))
            .await
            .unwrap()
    }

    async fn online(&self, worker: WorkerId, tags: &[&str]) {
        self.orchestrator
            .heartbeat(worker, caps(tags), None)
            .await
            .unwrap();
    }

    async fn dispatch(&self) -> jobmesh_infra::DispatchReport {
        self.orchestrator
            .dispatcher()
            .run_cycle(Utc::now())
            .await
            .unwrap()
    }

    async fn state(&self, tenant: TenantId, job: JobId) -> JobState {
        self.orchestrator.job(tenant, job).await.unwrap().state
    }
}

#[tokio::test]
async fn job_runs_to_success_and_result_is_write_once() {
    let h = default_harness();
    let tenant = TenantId::new();
    let w1 = WorkerId::new();

    let job = h.submit(tenant, &["model-type-a"]).await;
    assert_eq!(h.state(tenant, job).await, JobState::Pending);

    h.online(w1, &["model-type-a", "gpu"]).await;
    let report = h.dispatch().await;
    assert_eq!(report.assigned, vec![(job, w1)]);
    assert_eq!(h.state(tenant, job).await, JobState::Assigned);

    // The worker learns about its assignment from the next heartbeat.
    let ack = h
        .orchestrator
        .heartbeat(w1, caps(&["model-type-a", "gpu"]), None)
        .await
        .unwrap();
    assert_eq!(ack.job_id, Some(job));
    assert!(!ack.cancel);

    h.orchestrator
        .report(w1, job, WorkerReport::Running)
        .await
        .unwrap();
    let done = h
        .orchestrator
        .report(
            w1,
            job,
            WorkerReport::Succeeded {
                content: b"R".to_vec(),
            },
        )
        .await
        .unwrap();
    assert_eq!(done.state, JobState::Succeeded);
    assert_eq!(done.attempts, 0);

    let result = h.orchestrator.result(tenant, job).await.unwrap();
    assert_eq!(result.content, b"R".to_vec());

    // A second write for the same job is rejected by the cache and the
    // orchestrator alike; the first result stays.
    let other = JobResult::new(job, b"S".to_vec(), Utc::now());
    assert_eq!(h.cache.put(&other).await, Err(StoreError::AlreadyExists));
    let again = h
        .orchestrator
        .report(
            w1,
            job,
            WorkerReport::Succeeded {
                content: b"S".to_vec(),
            },
        )
        .await;
    assert!(matches!(again, Err(OrchestrationError::Conflict(_))));
    assert_eq!(
        h.orchestrator.result(tenant, job).await.unwrap().content,
        b"R".to_vec()
    );

    // Worker is idle again and credited with the completion.
    let worker = h.workers.get(w1).await.unwrap();
    assert!(worker.is_available());
    assert_eq!(worker.tasks_completed, 1);
}

#[tokio::test]
async fn result_is_rebuilt_after_cache_loss() {
    let h = default_harness();
    let tenant = TenantId::new();
    let w1 = WorkerId::new();
    let job = h.submit(tenant, &["cpu"]).await;
    h.online(w1, &["cpu"]).await;
    h.dispatch().await;
    h.orchestrator.report(w1, job, WorkerReport::Running).await.unwrap();
    h.orchestrator
        .report(w1, job, WorkerReport::Succeeded { content: vec![7, 7] })
        .await
        .unwrap();
    assert_eq!(h.cache.len(), 1);

    h.cache.clear();
    assert!(h.cache.is_empty());

    let result = h.orchestrator.result(tenant, job).await.unwrap();
    assert_eq!(result.content, vec![7, 7]);
    assert_eq!(h.cache.len(), 1, "cache repopulated from the durable result");
}

#[tokio::test]
async fn result_reads_distinguish_unfinished_and_failed_jobs() {
    let h = default_harness();
    let tenant = TenantId::new();
    let w1 = WorkerId::new();
    let job = h.submit(tenant, &["cpu"]).await;

    assert_eq!(
        h.orchestrator.result(tenant, job).await,
        Err(OrchestrationError::NotTerminal)
    );

    h.online(w1, &["cpu"]).await;
    h.dispatch().await;
    h.orchestrator.report(w1, job, WorkerReport::Running).await.unwrap();
    let failed = h
        .orchestrator
        .report(
            w1,
            job,
            WorkerReport::Failed {
                diagnostic: "model crashed".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(
        failed.failure,
        Some(FailureReason::worker_reported("model crashed"))
    );
    assert_eq!(
        h.orchestrator.result(tenant, job).await,
        Err(OrchestrationError::NotFound)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_dispatchers_never_double_assign() {
    let h = default_harness();
    let tenant = TenantId::new();

    let mut submitted = Vec::new();
    for _ in 0..20 {
        submitted.push(h.submit(tenant, &["cpu"]).await);
    }
    let workers: Vec<WorkerId> = (0..8).map(|_| WorkerId::new()).collect();
    for w in &workers {
        h.online(*w, &["cpu"]).await;
    }

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let dispatcher = h.orchestrator.dispatcher();
        tasks.push(tokio::spawn(async move {
            dispatcher.run_cycle(Utc::now()).await.unwrap()
        }));
    }
    let mut assigned = Vec::new();
    for task in tasks {
        assigned.extend(task.await.unwrap().assigned);
    }
    // Mop up anything a lost race left behind.
    assigned.extend(h.dispatch().await.assigned);

    let jobs: HashSet<JobId> = assigned.iter().map(|(j, _)| *j).collect();
    let holders: HashSet<WorkerId> = assigned.iter().map(|(_, w)| *w).collect();
    assert_eq!(jobs.len(), assigned.len(), "a job was assigned twice");
    assert_eq!(holders.len(), assigned.len(), "a worker got two jobs");
    assert_eq!(assigned.len(), workers.len());

    // The store agrees with the reports.
    let stored = h
        .jobs
        .list(tenant, Some(JobState::Assigned), 100)
        .await
        .unwrap();
    assert_eq!(stored.len(), workers.len());
    for job in stored {
        let worker = job.assigned_worker.unwrap();
        assert!(assigned.contains(&(job.id, worker)));
        assert_eq!(h.workers.get(worker).await.unwrap().current_job, Some(job.id));
    }
}

#[tokio::test]
async fn job_without_capable_worker_stays_pending() {
    let h = default_harness();
    let tenant = TenantId::new();
    let job = h.submit(tenant, &["model-type-b"]).await;
    h.online(WorkerId::new(), &["model-type-a"]).await;

    for _ in 0..3 {
        let report = h.dispatch().await;
        assert!(report.assigned.is_empty());
    }
    let view = h.orchestrator.job(tenant, job).await.unwrap();
    assert_eq!(view.state, JobState::Pending);
    assert_eq!(view.attempts, 0);
}

#[tokio::test]
async fn oldest_pending_job_is_dispatched_first() {
    let h = default_harness();
    let tenant = TenantId::new();
    let first = h.submit(tenant, &["cpu"]).await;
    let _second = h.submit(tenant, &["cpu"]).await;
    let w1 = WorkerId::new();
    h.online(w1, &["cpu"]).await;

    let report = h.dispatch().await;
    assert_eq!(report.assigned, vec![(first, w1)]);
}

#[tokio::test]
async fn lost_worker_job_is_requeued_exactly_once() {
    let h = default_harness();
    let tenant = TenantId::new();
    let (w1, w2) = (WorkerId::new(), WorkerId::new());

    let job = h.submit(tenant, &["model-type-a"]).await;
    h.online(w1, &["model-type-a"]).await;
    h.dispatch().await;
    h.orchestrator.report(w1, job, WorkerReport::Running).await.unwrap();

    // W1 goes silent. Two sweepers observe the same lapse.
    let later = Utc::now() + past_liveness(&h.config);
    let (s1, s2) = (h.orchestrator.sweeper(), h.orchestrator.sweeper());
    let (a, b) = tokio::join!(s1.run_once(later), s2.run_once(later));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.jobs_requeued + b.jobs_requeued, 1);
    assert_eq!(a.workers_lost.len() + b.workers_lost.len(), 1);

    let view = h.orchestrator.job(tenant, job).await.unwrap();
    assert_eq!(view.state, JobState::Pending);
    assert_eq!(view.attempts, 1);

    // A repeated sweep changes nothing.
    let again = h.orchestrator.sweeper().run_once(later).await.unwrap();
    assert!(again.workers_lost.is_empty());
    assert_eq!(h.orchestrator.job(tenant, job).await.unwrap().attempts, 1);

    // W1's late report is rejected; W2 picks the job up.
    assert_eq!(
        h.orchestrator
            .report(w1, job, WorkerReport::Succeeded { content: vec![1] })
            .await,
        Err(OrchestrationError::NotFound)
    );
    h.online(w2, &["model-type-a"]).await;
    let report = h.dispatch().await;
    assert_eq!(report.assigned, vec![(job, w2)]);
}

#[tokio::test]
async fn attempts_exhaust_into_failure() {
    let h = harness(OrchestratorConfig {
        max_attempts: 2,
        ..OrchestratorConfig::default()
    });
    let tenant = TenantId::new();
    let job = h.submit(tenant, &["cpu"]).await;

    let mut now = Utc::now();
    for round in 0..2 {
        let worker = WorkerId::new();
        h.workers.heartbeat(worker, caps(&["cpu"]), None, now).await.unwrap();
        let report = h.orchestrator.dispatcher().run_cycle(now).await.unwrap();
        assert_eq!(report.assigned, vec![(job, worker)], "round {round}");
        h.orchestrator.report(worker, job, WorkerReport::Running).await.unwrap();

        now += past_liveness(&h.config);
        h.orchestrator.sweeper().run_once(now).await.unwrap();
    }

    let view = h.orchestrator.job(tenant, job).await.unwrap();
    assert_eq!(view.state, JobState::Failed);
    assert_eq!(view.failure, Some(FailureReason::RetriesExhausted));
    assert_eq!(view.attempts, 2);
}

#[tokio::test]
async fn unacknowledged_assignment_times_out() {
    let h = default_harness();
    let tenant = TenantId::new();
    let w1 = WorkerId::new();
    let job = h.submit(tenant, &["cpu"]).await;

    let now = Utc::now();
    h.workers.heartbeat(w1, caps(&["cpu"]), None, now).await.unwrap();
    h.orchestrator.dispatcher().run_cycle(now).await.unwrap();
    assert_eq!(h.state(tenant, job).await, JobState::Assigned);

    // W1 keeps heartbeating but never reports running.
    let later = now + past_grace(&h.config);
    h.workers
        .heartbeat(w1, caps(&["cpu"]), Some(job), later)
        .await
        .unwrap();
    let report = h.orchestrator.dispatcher().run_cycle(later).await.unwrap();
    assert_eq!(report.timed_out, 1);

    // Requeued with one attempt counted, then immediately handed out again.
    let stored = h.jobs.load(job).await.unwrap();
    assert_eq!(stored.attempts, 1);
    assert_eq!(report.assigned, vec![(job, w1)]);
    assert_eq!(stored.state, JobState::Assigned);
}

#[tokio::test]
async fn tenants_cannot_see_each_others_jobs() {
    let h = default_harness();
    let (owner, intruder) = (TenantId::new(), TenantId::new());
    let job = h.submit(owner, &["cpu"]).await;

    assert_eq!(
        h.orchestrator.job(intruder, job).await,
        Err(OrchestrationError::NotFound)
    );
    assert_eq!(
        h.orchestrator.result(intruder, job).await,
        Err(OrchestrationError::NotFound)
    );
    assert_eq!(
        h.orchestrator.cancel(intruder, job).await,
        Err(OrchestrationError::NotFound)
    );
    assert!(h.orchestrator.list(intruder, None, 10).await.unwrap().is_empty());
    assert_eq!(h.orchestrator.stats(intruder).await.unwrap().pending, 0);
    assert_eq!(h.state(owner, job).await, JobState::Pending);
}

#[tokio::test]
async fn oversized_payload_is_rejected() {
    let h = harness(OrchestratorConfig {
        max_payload_bytes: 4,
        ..OrchestratorConfig::default()
    });
    let err = h
        .orchestrator
        .submit(TenantId::new(), vec![0; 5], CapabilitySet::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::InvalidPayload(_)));
}

#[tokio::test]
async fn cancelling_pending_and_assigned_jobs_fails_them() {
    let h = default_harness();
    let tenant = TenantId::new();
    let w1 = WorkerId::new();

    let pending = h.submit(tenant, &["never"]).await;
    let view = h.orchestrator.cancel(tenant, pending).await.unwrap();
    assert_eq!(view.state, JobState::Failed);
    assert_eq!(view.failure, Some(FailureReason::Cancelled));

    let assigned = h.submit(tenant, &["cpu"]).await;
    h.online(w1, &["cpu"]).await;
    h.dispatch().await;
    assert_eq!(h.state(tenant, assigned).await, JobState::Assigned);

    let view = h.orchestrator.cancel(tenant, assigned).await.unwrap();
    assert_eq!(view.failure, Some(FailureReason::Cancelled));
    assert!(h.workers.get(w1).await.unwrap().is_available());

    // Cancelling a finished job is a conflict.
    assert!(matches!(
        h.orchestrator.cancel(tenant, assigned).await,
        Err(OrchestrationError::Conflict(_))
    ));
}

#[tokio::test]
async fn cancelling_running_job_signals_worker() {
    let h = default_harness();
    let tenant = TenantId::new();
    let w1 = WorkerId::new();
    let job = h.submit(tenant, &["cpu"]).await;
    h.online(w1, &["cpu"]).await;
    h.dispatch().await;
    h.orchestrator.report(w1, job, WorkerReport::Running).await.unwrap();

    let view = h.orchestrator.cancel(tenant, job).await.unwrap();
    assert_eq!(view.state, JobState::CancelRequested);
    // Idempotent while the worker has not reacted yet.
    let view = h.orchestrator.cancel(tenant, job).await.unwrap();
    assert_eq!(view.state, JobState::CancelRequested);

    let ack = h
        .orchestrator
        .heartbeat(w1, caps(&["cpu"]), Some(job))
        .await
        .unwrap();
    assert_eq!(ack.job_id, Some(job));
    assert!(ack.cancel);

    let view = h
        .orchestrator
        .report(
            w1,
            job,
            WorkerReport::Failed {
                diagnostic: "aborted".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(view.state, JobState::Failed);
    assert_eq!(view.failure, Some(FailureReason::Cancelled));
    assert!(h.workers.get(w1).await.unwrap().is_available());
}

#[tokio::test]
async fn reports_for_foreign_jobs_are_not_found() {
    let h = default_harness();
    let tenant = TenantId::new();
    let (w1, w2) = (WorkerId::new(), WorkerId::new());
    let job = h.submit(tenant, &["cpu"]).await;
    h.online(w1, &["cpu"]).await;
    h.dispatch().await;

    assert_eq!(
        h.orchestrator.report(w2, job, WorkerReport::Running).await,
        Err(OrchestrationError::NotFound)
    );
    assert_eq!(
        h.orchestrator
            .report(w1, JobId::new(), WorkerReport::Running)
            .await,
        Err(OrchestrationError::NotFound)
    );
    // Running is idempotent for the holder.
    h.orchestrator.report(w1, job, WorkerReport::Running).await.unwrap();
    let view = h.orchestrator.report(w1, job, WorkerReport::Running).await.unwrap();
    assert_eq!(view.state, JobState::Running);
}

#[tokio::test]
async fn wait_returns_on_state_change() {
    let h = default_harness();
    let tenant = TenantId::new();
    let w1 = WorkerId::new();
    let job = h.submit(tenant, &["cpu"]).await;
    h.online(w1, &["cpu"]).await;
    h.dispatch().await;

    let orchestrator = h.orchestrator.clone();
    let waiter = tokio::spawn(async move {
        orchestrator
            .wait(tenant, job, Duration::from_secs(10))
            .await
            .unwrap()
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.orchestrator.report(w1, job, WorkerReport::Running).await.unwrap();

    let view = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.state, JobState::Running);
}

#[tokio::test]
async fn wait_times_out_with_unchanged_state() {
    let h = default_harness();
    let tenant = TenantId::new();
    let job = h.submit(tenant, &["cpu"]).await;

    let view = h
        .orchestrator
        .wait(tenant, job, Duration::from_millis(30))
        .await
        .unwrap();
    assert_eq!(view.state, JobState::Pending);
}

#[tokio::test]
async fn offline_worker_can_be_removed_only_when_idle() {
    let h = default_harness();
    let w1 = WorkerId::new();
    let now = Utc::now();
    h.workers.heartbeat(w1, caps(&["cpu"]), None, now).await.unwrap();

    assert!(matches!(
        h.orchestrator.remove_worker(w1).await,
        Err(OrchestrationError::Conflict(_))
    ));

    h.orchestrator
        .sweeper()
        .run_once(now + past_liveness(&h.config))
        .await
        .unwrap();
    let removed = h.orchestrator.remove_worker(w1).await.unwrap();
    assert_eq!(removed.id, w1);
    assert!(h.orchestrator.workers().await.unwrap().is_empty());
}

#[tokio::test]
async fn background_loops_dispatch_and_stop() {
    let h = harness(OrchestratorConfig {
        dispatch_interval: Duration::from_millis(10),
        ..OrchestratorConfig::default()
    });
    let tenant = TenantId::new();
    let w1 = WorkerId::new();
    let job = h.submit(tenant, &["cpu"]).await;
    h.online(w1, &["cpu"]).await;

    let handle = h.orchestrator.spawn_background();
    let mut state = JobState::Pending;
    for _ in 0..200 {
        state = h.state(tenant, job).await;
        if state != JobState::Pending {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state, JobState::Assigned);
    assert_eq!(handle.dispatcher_stats().failures, 0);
    handle.shutdown().await;
}

/// In-memory store whose worker lookups can be made to fail, standing in for
/// a database that drops out mid-sweep.
struct FlakyJobStore {
    inner: Arc<InMemoryJobStore>,
    lookup_failures: AtomicUsize,
}

impl FlakyJobStore {
    fn new(inner: Arc<InMemoryJobStore>) -> Self {
        Self {
            inner,
            lookup_failures: AtomicUsize::new(0),
        }
    }

    fn fail_next_lookups(&self, n: usize) {
        self.lookup_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl JobStore for FlakyJobStore {
    async fn insert(&self, job: Job) -> Result<(), StoreError> {
        self.inner.insert(job).await
    }

    async fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<Job, StoreError> {
        self.inner.get(tenant_id, job_id).await
    }

    async fn load(&self, job_id: JobId) -> Result<Job, StoreError> {
        self.inner.load(job_id).await
    }

    async fn transition(
        &self,
        job_id: JobId,
        expected: JobState,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        self.inner.transition(job_id, expected, transition, now).await
    }

    async fn pending_page(
        &self,
        requirement: Option<&CapabilitySet>,
        after: Option<PendingCursor>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        self.inner.pending_page(requirement, after, limit).await
    }

    async fn active_for_worker(&self, worker_id: WorkerId) -> Result<Option<Job>, StoreError> {
        let failing = self
            .lookup_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::unavailable("connection reset"));
        }
        self.inner.active_for_worker(worker_id).await
    }

    async fn assigned_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        self.inner.assigned_before(cutoff, limit).await
    }

    async fn list(
        &self,
        tenant_id: TenantId,
        state: Option<JobState>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        self.inner.list(tenant_id, state, limit).await
    }

    async fn stats(&self, tenant_id: TenantId) -> Result<JobStats, StoreError> {
        self.inner.stats(tenant_id).await
    }

    async fn result(&self, job_id: JobId) -> Result<JobResult, StoreError> {
        self.inner.result(job_id).await
    }
}

struct FlakyHarness {
    orchestrator: Orchestrator,
    store: Arc<FlakyJobStore>,
    workers: Arc<InMemoryWorkerRegistry>,
    config: OrchestratorConfig,
}

fn flaky_harness() -> FlakyHarness {
    let config = OrchestratorConfig::default();
    let store = Arc::new(FlakyJobStore::new(InMemoryJobStore::arc()));
    let workers = Arc::new(InMemoryWorkerRegistry::new(
        config.worker_ordering,
        config.assignment_grace_chrono(),
    ));
    let orchestrator = Orchestrator::new(
        store.clone(),
        workers.clone(),
        Arc::new(InMemoryResultCache::new()),
        config.clone(),
    );
    FlakyHarness {
        orchestrator,
        store,
        workers,
        config,
    }
}

/// A running job on `worker`, heartbeat last seen at the returned instant.
async fn running_job(h: &FlakyHarness, tenant: TenantId, worker: WorkerId) -> (JobId, DateTime<Utc>) {
    let job = h
        .orchestrator
        .submit(tenant, b"input".to_vec(), caps(&["cpu"]))
        .await
        .unwrap();
    let seen = Utc::now();
    h.workers.heartbeat(worker, caps(&["cpu"]), None, seen).await.unwrap();
    let report = h.orchestrator.dispatcher().run_cycle(seen).await.unwrap();
    assert_eq!(report.assigned, vec![(job, worker)]);
    h.orchestrator.report(worker, job, WorkerReport::Running).await.unwrap();
    (job, seen)
}

#[tokio::test]
async fn worker_back_before_deferred_reclaim_keeps_its_job() {
    let h = flaky_harness();
    let tenant = TenantId::new();
    let w1 = WorkerId::new();
    let (job, seen) = running_job(&h, tenant, w1).await;

    // W1 goes quiet and the sweep cannot reach the store.
    let later = seen + past_liveness(&h.config);
    let sweeper = h.orchestrator.sweeper();
    h.store.fail_next_lookups(1);
    assert!(sweeper.run_once(later).await.is_err());
    assert_eq!(h.workers.get(w1).await.unwrap().status, WorkerStatus::Offline);

    // W1 reconnects, still working on the job, before the sweep retries.
    h.workers
        .heartbeat(w1, caps(&["cpu"]), Some(job), later)
        .await
        .unwrap();

    let report = sweeper.run_once(later).await.unwrap();
    assert!(report.workers_lost.is_empty());
    assert_eq!(report.jobs_requeued, 0);

    let stored = h.orchestrator.job(tenant, job).await.unwrap();
    assert_eq!(stored.state, JobState::Running);
    assert_eq!(stored.attempts, 0);
    let w = h.workers.get(w1).await.unwrap();
    assert_eq!(w.status, WorkerStatus::Busy);
    assert_eq!(w.current_job, Some(job));
}

#[tokio::test]
async fn deferred_reclaim_completes_once_store_recovers() {
    let h = flaky_harness();
    let tenant = TenantId::new();
    let w1 = WorkerId::new();
    let (job, seen) = running_job(&h, tenant, w1).await;

    let later = seen + past_liveness(&h.config);
    let sweeper = h.orchestrator.sweeper();
    h.store.fail_next_lookups(1);
    let err = sweeper.run_once(later).await.unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(_)));
    assert_eq!(h.orchestrator.job(tenant, job).await.unwrap().state, JobState::Running);

    // W1 stays silent; the next sweep finishes the reclaim.
    let report = sweeper.run_once(later).await.unwrap();
    assert_eq!(report.jobs_requeued, 1);

    let stored = h.orchestrator.job(tenant, job).await.unwrap();
    assert_eq!(stored.state, JobState::Pending);
    assert_eq!(stored.attempts, 1);
}

#[tokio::test]
async fn lost_worker_with_cancel_requested_job_finishes_it_cancelled() {
    let h = default_harness();
    let tenant = TenantId::new();
    let w1 = WorkerId::new();
    let job = h.submit(tenant, &["cpu"]).await;
    h.online(w1, &["cpu"]).await;
    h.dispatch().await;
    h.orchestrator.report(w1, job, WorkerReport::Running).await.unwrap();
    let view = h.orchestrator.cancel(tenant, job).await.unwrap();
    assert_eq!(view.state, JobState::CancelRequested);

    // W1 dies before acknowledging the cancellation.
    let later = Utc::now() + past_liveness(&h.config);
    let report = h.orchestrator.sweeper().run_once(later).await.unwrap();
    assert_eq!(report.workers_lost, vec![w1]);
    assert_eq!(report.jobs_cancelled, 1);
    assert_eq!(report.jobs_requeued, 0);

    let view = h.orchestrator.job(tenant, job).await.unwrap();
    assert_eq!(view.state, JobState::Failed);
    assert_eq!(view.failure, Some(FailureReason::Cancelled));
    // Never handed out again.
    h.online(WorkerId::new(), &["cpu"]).await;
    assert!(h.dispatch().await.assigned.is_empty());
}

#[tokio::test]
async fn worker_lost_before_starting_returns_job_to_queue() {
    let h = default_harness();
    let tenant = TenantId::new();
    let w1 = WorkerId::new();
    let job = h.submit(tenant, &["cpu"]).await;
    h.online(w1, &["cpu"]).await;
    h.dispatch().await;
    assert_eq!(h.state(tenant, job).await, JobState::Assigned);

    let later = Utc::now() + past_liveness(&h.config);
    let report = h.orchestrator.sweeper().run_once(later).await.unwrap();
    assert_eq!(report.workers_lost, vec![w1]);
    assert_eq!(report.jobs_requeued, 1);

    let view = h.orchestrator.job(tenant, job).await.unwrap();
    assert_eq!(view.state, JobState::Pending);
    assert_eq!(view.attempts, 1);
    assert_eq!(
        h.orchestrator.report(w1, job, WorkerReport::Running).await,
        Err(OrchestrationError::NotFound)
    );
}

#[tokio::test]
async fn wait_rereads_despite_traffic_on_other_jobs() {
    let h = default_harness();
    let tenant = TenantId::new();
    let job = h.submit(tenant, &["cpu"]).await;

    // Steady change notifications for unrelated jobs.
    let noise = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move {
            loop {
                let other = orchestrator
                    .submit(tenant, b"noise".to_vec(), caps(&["cpu"]))
                    .await
                    .unwrap();
                orchestrator.cancel(tenant, other).await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    // Our job changes behind the notifier's back.
    let store = h.jobs.clone();
    let change = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        store
            .transition(
                job,
                JobState::Pending,
                Transition::fail(FailureReason::Cancelled),
                Utc::now(),
            )
            .await
            .unwrap();
    });

    let started = std::time::Instant::now();
    let view = h
        .orchestrator
        .wait(tenant, job, Duration::from_secs(10))
        .await
        .unwrap();
    noise.abort();
    change.await.unwrap();

    assert_eq!(view.state, JobState::Failed);
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "wait only noticed the change after {:?}",
        started.elapsed()
    );
}

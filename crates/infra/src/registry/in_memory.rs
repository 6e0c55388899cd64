use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use jobmesh_core::{CapabilitySet, JobId, WorkerId};
use jobmesh_jobs::{Worker, WorkerStatus};

use super::{LostWorker, WorkerOrdering, WorkerRegistry};
use crate::error::StoreError;

/// Process-local registry. Each operation holds the write lock for exactly one
/// read-modify-write, which makes it atomic per worker record.
#[derive(Debug)]
pub struct InMemoryWorkerRegistry {
    workers: RwLock<HashMap<WorkerId, Worker>>,
    ordering: WorkerOrdering,
    /// How long a dispatcher reservation survives heartbeats that don't
    /// mention it yet.
    reservation_hold: Duration,
}

impl InMemoryWorkerRegistry {
    pub fn new(ordering: WorkerOrdering, reservation_hold: Duration) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            ordering,
            reservation_hold,
        }
    }

    fn poisoned() -> StoreError {
        StoreError::unavailable("worker registry lock poisoned")
    }
}

impl Default for InMemoryWorkerRegistry {
    fn default() -> Self {
        Self::new(WorkerOrdering::default(), Duration::seconds(30))
    }
}

#[async_trait::async_trait]
impl WorkerRegistry for InMemoryWorkerRegistry {
    async fn heartbeat(
        &self,
        worker_id: WorkerId,
        capabilities: CapabilitySet,
        current_job: Option<JobId>,
        now: DateTime<Utc>,
    ) -> Result<Worker, StoreError> {
        let mut workers = self.workers.write().map_err(|_| Self::poisoned())?;
        let worker = workers.entry(worker_id).or_insert_with(|| {
            info!(worker_id = %worker_id, capabilities = %capabilities, "worker registered");
            Worker::register(worker_id, capabilities.clone(), now)
        });
        let was_offline = worker.status == WorkerStatus::Offline;
        worker.record_heartbeat(capabilities, current_job, now, self.reservation_hold);
        if was_offline {
            info!(worker_id = %worker_id, "worker back online");
        }
        Ok(worker.clone())
    }

    async fn get(&self, worker_id: WorkerId) -> Result<Worker, StoreError> {
        let workers = self.workers.read().map_err(|_| Self::poisoned())?;
        workers.get(&worker_id).cloned().ok_or(StoreError::NotFound)
    }

    async fn eligible_workers(
        &self,
        requirement: &CapabilitySet,
    ) -> Result<Vec<Worker>, StoreError> {
        let workers = self.workers.read().map_err(|_| Self::poisoned())?;
        let mut eligible: Vec<Worker> = workers
            .values()
            .filter(|w| w.is_available() && w.capabilities.satisfies(requirement))
            .cloned()
            .collect();
        drop(workers);
        self.ordering.sort(&mut eligible);
        Ok(eligible)
    }

    async fn reserve(
        &self,
        worker_id: WorkerId,
        job_id: JobId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut workers = self.workers.write().map_err(|_| Self::poisoned())?;
        Ok(workers
            .get_mut(&worker_id)
            .is_some_and(|w| w.reserve(job_id, now)))
    }

    async fn release(
        &self,
        worker_id: WorkerId,
        job_id: JobId,
        completed: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut workers = self.workers.write().map_err(|_| Self::poisoned())?;
        let released = workers
            .get_mut(&worker_id)
            .is_some_and(|w| w.release(job_id, completed, now));
        if released {
            debug!(worker_id = %worker_id, job_id = %job_id, completed, "worker released");
        }
        Ok(released)
    }

    async fn mark_stale_offline(
        &self,
        now: DateTime<Utc>,
        liveness_window: Duration,
    ) -> Result<Vec<LostWorker>, StoreError> {
        let mut workers = self.workers.write().map_err(|_| Self::poisoned())?;
        let mut lost = Vec::new();
        for worker in workers.values_mut() {
            if worker.is_stale(now, liveness_window) {
                let held_job = worker.mark_offline();
                lost.push(LostWorker {
                    worker_id: worker.id,
                    held_job,
                    last_heartbeat: worker.last_heartbeat,
                });
            }
        }
        Ok(lost)
    }

    async fn remove(&self, worker_id: WorkerId) -> Result<Worker, StoreError> {
        let mut workers = self.workers.write().map_err(|_| Self::poisoned())?;
        match workers.get(&worker_id) {
            None => Err(StoreError::NotFound),
            Some(w) if w.status != WorkerStatus::Offline || w.current_job.is_some() => Err(
                StoreError::Conflict(format!("worker {worker_id} is still {:?}", w.status)),
            ),
            Some(_) => workers.remove(&worker_id).ok_or(StoreError::NotFound),
        }
    }

    async fn list(&self) -> Result<Vec<Worker>, StoreError> {
        let workers = self.workers.read().map_err(|_| Self::poisoned())?;
        let mut all: Vec<Worker> = workers.values().cloned().collect();
        all.sort_by_key(|w| w.registered_at);
        Ok(all)
    }
}

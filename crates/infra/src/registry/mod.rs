//! Worker Registry: who is reachable, what they can run, and who is idle.
//!
//! The registry is one of the two coordination points of the orchestrator
//! (with the Job Store). Every mutation is an atomic, conditional operation on
//! a single worker record; `reserve` in particular is a compare-and-set from
//! available to busy, so two dispatchers can never book the same worker.

mod in_memory;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use jobmesh_core::{CapabilitySet, JobId, WorkerId};
use jobmesh_jobs::Worker;

use crate::error::StoreError;

pub use in_memory::InMemoryWorkerRegistry;

/// Deterministic ordering of eligible workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerOrdering {
    /// Latest `idle_since` first; keeps a warm set of workers busy.
    #[default]
    MostRecentlyIdle,
    /// Earliest `idle_since` first; spreads load across the fleet.
    LongestIdle,
}

impl WorkerOrdering {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "most_recently_idle" => Some(Self::MostRecentlyIdle),
            "longest_idle" => Some(Self::LongestIdle),
            _ => None,
        }
    }

    /// Sort in place. Ties on `idle_since` break on worker id.
    pub fn sort(self, workers: &mut [Worker]) {
        match self {
            WorkerOrdering::MostRecentlyIdle => {
                workers.sort_by(|a, b| b.idle_since.cmp(&a.idle_since).then(a.id.cmp(&b.id)))
            }
            WorkerOrdering::LongestIdle => {
                workers.sort_by(|a, b| a.idle_since.cmp(&b.idle_since).then(a.id.cmp(&b.id)))
            }
        }
    }
}

/// A worker the liveness sweep just declared offline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LostWorker {
    pub worker_id: WorkerId,
    /// The job the registry believed it held.
    pub held_job: Option<JobId>,
    pub last_heartbeat: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// Upsert the worker and refresh its heartbeat. A `current_job` marks it
    /// busy, none marks it available.
    async fn heartbeat(
        &self,
        worker_id: WorkerId,
        capabilities: CapabilitySet,
        current_job: Option<JobId>,
        now: DateTime<Utc>,
    ) -> Result<Worker, StoreError>;

    async fn get(&self, worker_id: WorkerId) -> Result<Worker, StoreError>;

    /// Available workers whose capability set covers `requirement`, in the
    /// registry's configured order. An empty requirement lists every
    /// available worker.
    async fn eligible_workers(&self, requirement: &CapabilitySet)
    -> Result<Vec<Worker>, StoreError>;

    /// Compare-and-set available → busy holding `job_id`.
    ///
    /// `Ok(false)` when the worker is gone, offline or already busy.
    async fn reserve(
        &self,
        worker_id: WorkerId,
        job_id: JobId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Make the worker available again if it still holds `job_id`.
    async fn release(
        &self,
        worker_id: WorkerId,
        job_id: JobId,
        completed: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Mark every worker silent for longer than `liveness_window` offline and
    /// return the ones that changed.
    async fn mark_stale_offline(
        &self,
        now: DateTime<Utc>,
        liveness_window: Duration,
    ) -> Result<Vec<LostWorker>, StoreError>;

    /// Hard-delete an offline worker (operator action).
    async fn remove(&self, worker_id: WorkerId) -> Result<Worker, StoreError>;

    async fn list(&self) -> Result<Vec<Worker>, StoreError>;
}

//! Job Store: the durable source of truth for job lifecycle.
//!
//! ## Guarantees
//!
//! - **Tenant isolation**: tenant-facing reads take the tenant id and answer
//!   `NotFound` for a job owned by someone else.
//! - **Compare-and-set**: `transition` applies only if the stored state still
//!   equals the caller's expectation; otherwise `Conflict`, and the caller
//!   re-reads and re-decides.
//! - **Write-once results**: a `Succeed` transition persists the result in the
//!   same atomic step as the state change.

mod in_memory;
mod postgres;
mod scan;

use chrono::{DateTime, Utc};

use jobmesh_core::{CapabilitySet, JobId, TenantId, WorkerId};
use jobmesh_jobs::{Job, JobPayload, JobResult, JobState, JobStats, Transition};

use crate::error::StoreError;

pub use in_memory::InMemoryJobStore;
pub use postgres::PostgresJobStore;
pub use scan::PendingScan;

/// Position in the `(created_at, job_id)` order of pending jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PendingCursor {
    pub created_at: DateTime<Utc>,
    pub job_id: JobId,
}

impl PendingCursor {
    pub fn of(job: &Job) -> Self {
        Self {
            created_at: job.created_at,
            job_id: job.id,
        }
    }
}

#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a brand-new job. `AlreadyExists` on a duplicate id.
    async fn insert(&self, job: Job) -> Result<(), StoreError>;

    /// Tenant-scoped read.
    async fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<Job, StoreError>;

    /// Unscoped read for the orchestrator's own decision loops.
    async fn load(&self, job_id: JobId) -> Result<Job, StoreError>;

    /// Atomic compare-and-set on state. Returns the stored job after the change.
    async fn transition(
        &self,
        job_id: JobId,
        expected: JobState,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError>;

    /// One page of pending jobs strictly after `after`, oldest first.
    /// With a requirement, only jobs of exactly that capability class.
    async fn pending_page(
        &self,
        requirement: Option<&CapabilitySet>,
        after: Option<PendingCursor>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError>;

    /// The job `worker_id` currently holds (assigned, running or
    /// cancel-requested), if any.
    async fn active_for_worker(&self, worker_id: WorkerId) -> Result<Option<Job>, StoreError>;

    /// `assigned` jobs whose assignment is older than `cutoff`.
    async fn assigned_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError>;

    /// Tenant's jobs, newest first.
    async fn list(
        &self,
        tenant_id: TenantId,
        state: Option<JobState>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError>;

    async fn stats(&self, tenant_id: TenantId) -> Result<JobStats, StoreError>;

    /// Durable result of a succeeded job.
    async fn result(&self, job_id: JobId) -> Result<JobResult, StoreError>;

    /// Create a `pending` job from an already-validated payload.
    async fn submit(
        &self,
        tenant_id: TenantId,
        payload: JobPayload,
        now: DateTime<Utc>,
    ) -> Result<JobId, StoreError> {
        let job = Job::new(tenant_id, payload, now);
        let id = job.id;
        self.insert(job).await?;
        Ok(id)
    }
}

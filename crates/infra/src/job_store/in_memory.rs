use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use jobmesh_core::{CapabilitySet, JobId, TenantId, WorkerId};
use jobmesh_jobs::{Job, JobResult, JobState, JobStats, Transition};

use super::{JobStore, PendingCursor};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Tables {
    jobs: HashMap<JobId, Job>,
    results: HashMap<JobId, JobResult>,
}

/// In-memory job store for tests/dev.
///
/// Jobs and results share one lock so a `Succeed` transition and its result
/// land together.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    inner: RwLock<Tables>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn poisoned() -> StoreError {
        StoreError::unavailable("job store lock poisoned")
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<(), StoreError> {
        let mut t = self.inner.write().map_err(|_| Self::poisoned())?;
        if t.jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists);
        }
        t.jobs.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<Job, StoreError> {
        let t = self.inner.read().map_err(|_| Self::poisoned())?;
        t.jobs
            .get(&job_id)
            .filter(|j| j.tenant_id == tenant_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn load(&self, job_id: JobId) -> Result<Job, StoreError> {
        let t = self.inner.read().map_err(|_| Self::poisoned())?;
        t.jobs.get(&job_id).cloned().ok_or(StoreError::NotFound)
    }

    async fn transition(
        &self,
        job_id: JobId,
        expected: JobState,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        let mut t = self.inner.write().map_err(|_| Self::poisoned())?;
        let current = t.jobs.get(&job_id).ok_or(StoreError::NotFound)?;
        let next = current.apply(expected, &transition, now)?;

        if let Some(result) = transition.result() {
            if t.results.contains_key(&job_id) {
                return Err(StoreError::AlreadyExists);
            }
            t.results.insert(job_id, result.clone());
        }
        t.jobs.insert(job_id, next.clone());
        Ok(next)
    }

    async fn pending_page(
        &self,
        requirement: Option<&CapabilitySet>,
        after: Option<PendingCursor>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let t = self.inner.read().map_err(|_| Self::poisoned())?;
        let mut page: Vec<Job> = t
            .jobs
            .values()
            .filter(|j| j.state == JobState::Pending)
            .filter(|j| requirement.is_none_or(|r| j.requirement() == r))
            .filter(|j| after.is_none_or(|c| PendingCursor::of(j) > c))
            .cloned()
            .collect();
        drop(t);

        page.sort_by_key(PendingCursor::of);
        page.truncate(limit);
        Ok(page)
    }

    async fn active_for_worker(&self, worker_id: WorkerId) -> Result<Option<Job>, StoreError> {
        let t = self.inner.read().map_err(|_| Self::poisoned())?;
        Ok(t.jobs.values().find(|j| j.is_held_by(worker_id)).cloned())
    }

    async fn assigned_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let t = self.inner.read().map_err(|_| Self::poisoned())?;
        let mut stale: Vec<Job> = t
            .jobs
            .values()
            .filter(|j| j.state == JobState::Assigned && j.assigned_at.is_some_and(|at| at <= cutoff))
            .cloned()
            .collect();
        drop(t);

        stale.sort_by_key(|j| j.assigned_at);
        stale.truncate(limit);
        Ok(stale)
    }

    async fn list(
        &self,
        tenant_id: TenantId,
        state: Option<JobState>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let t = self.inner.read().map_err(|_| Self::poisoned())?;
        let mut jobs: Vec<Job> = t
            .jobs
            .values()
            .filter(|j| j.tenant_id == tenant_id && state.is_none_or(|s| j.state == s))
            .cloned()
            .collect();
        drop(t);

        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn stats(&self, tenant_id: TenantId) -> Result<JobStats, StoreError> {
        let t = self.inner.read().map_err(|_| Self::poisoned())?;
        let mut stats = JobStats::default();
        for job in t.jobs.values().filter(|j| j.tenant_id == tenant_id) {
            stats.record(job.state);
        }
        Ok(stats)
    }

    async fn result(&self, job_id: JobId) -> Result<JobResult, StoreError> {
        let t = self.inner.read().map_err(|_| Self::poisoned())?;
        t.results.get(&job_id).cloned().ok_or(StoreError::NotFound)
    }
}

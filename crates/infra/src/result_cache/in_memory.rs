use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use jobmesh_core::JobId;
use jobmesh_jobs::JobResult;

use super::ResultCache;
use crate::error::StoreError;

#[derive(Debug)]
struct Entry {
    result: JobResult,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// Process-local result cache with optional expiry.
///
/// Expired entries are dropped by `put`, at most once per TTL period, so the
/// map holds roughly two TTLs worth of results at any time.
#[derive(Debug, Default)]
pub struct InMemoryResultCache {
    state: RwLock<State>,
    ttl: Option<Duration>,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<JobId, Entry>,
    next_purge: Option<Instant>,
}

impl State {
    fn purge_if_due(&mut self, now: Instant, ttl: Option<Duration>) {
        let Some(ttl) = ttl else { return };
        if self.next_purge.is_some_and(|at| now < at) {
            return;
        }
        self.entries.retain(|_, e| e.is_live(now));
        self.next_purge = Some(now + ttl);
    }
}

impl InMemoryResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            state: RwLock::new(State::default()),
            ttl: Some(ttl),
        }
    }

    /// Drop every entry (simulates losing the cache).
    pub fn clear(&self) {
        if let Ok(mut state) = self.state.write() {
            state.entries.clear();
        }
    }

    /// Entries held, expired ones included until the next purge.
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> StoreError {
        StoreError::unavailable("result cache lock poisoned")
    }
}

#[async_trait::async_trait]
impl ResultCache for InMemoryResultCache {
    async fn put(&self, result: &JobResult) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        state.purge_if_due(now, self.ttl);
        if state.entries.get(&result.job_id).is_some_and(|e| e.is_live(now)) {
            return Err(StoreError::AlreadyExists);
        }
        state.entries.insert(
            result.job_id,
            Entry {
                result: result.clone(),
                expires_at: self.ttl.map(|ttl| now + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<JobResult, StoreError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        state
            .entries
            .get(&job_id)
            .filter(|e| e.is_live(Instant::now()))
            .map(|e| e.result.clone())
            .ok_or(StoreError::NotFound)
    }
}

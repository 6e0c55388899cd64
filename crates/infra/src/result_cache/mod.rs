//! Result Cache: write-once, read-many acceleration layer keyed by job id.
//!
//! Losing the cache never loses data; every entry can be rebuilt from the
//! durable result in the Job Store.

mod in_memory;
#[cfg(feature = "redis")]
mod redis;

use jobmesh_core::JobId;
use jobmesh_jobs::JobResult;

use crate::error::StoreError;

pub use in_memory::InMemoryResultCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisResultCache;

#[async_trait::async_trait]
pub trait ResultCache: Send + Sync {
    /// Store a result. `AlreadyExists` if one is already cached for the job.
    async fn put(&self, result: &JobResult) -> Result<(), StoreError>;

    /// `NotFound` on a miss.
    async fn get(&self, job_id: JobId) -> Result<JobResult, StoreError>;
}

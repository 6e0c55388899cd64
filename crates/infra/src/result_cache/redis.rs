//! Redis-backed result cache.
//!
//! One key per job (`jobmesh:result:<job_id>`) written with `SET NX EX`, so
//! write-once holds across every orchestrator process sharing the instance.

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use tracing::instrument;

use jobmesh_core::JobId;
use jobmesh_jobs::JobResult;

use super::ResultCache;
use crate::error::StoreError;

const KEY_PREFIX: &str = "jobmesh:result";

#[derive(Clone)]
pub struct RedisResultCache {
    conn: MultiplexedConnection,
    ttl: Duration,
}

impl RedisResultCache {
    /// Connect to `redis_url` (e.g. "redis://localhost:6379").
    pub async fn connect(redis_url: impl AsRef<str>, ttl: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(map_redis_error)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_redis_error)?;
        Ok(Self { conn, ttl })
    }

    fn key(&self, job_id: JobId) -> String {
        format!("{KEY_PREFIX}:{job_id}")
    }
}

#[async_trait::async_trait]
impl ResultCache for RedisResultCache {
    #[instrument(skip(self, result), fields(job_id = %result.job_id), err)]
    async fn put(&self, result: &JobResult) -> Result<(), StoreError> {
        let value = serde_json::to_vec(result)
            .map_err(|e| StoreError::unavailable(format!("failed to encode result: {e}")))?;
        let mut conn = self.conn.clone();

        // SET NX replies nil when the key already exists.
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(result.job_id))
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        match reply {
            Some(_) => Ok(()),
            None => Err(StoreError::AlreadyExists),
        }
    }

    #[instrument(skip(self), err)]
    async fn get(&self, job_id: JobId) -> Result<JobResult, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<Vec<u8>> = redis::cmd("GET")
            .arg(self.key(job_id))
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        let raw = raw.ok_or(StoreError::NotFound)?;
        serde_json::from_slice(&raw)
            .map_err(|e| StoreError::unavailable(format!("corrupt cached result: {e}")))
    }
}

fn map_redis_error(err: redis::RedisError) -> StoreError {
    StoreError::unavailable(format!("redis: {err}"))
}

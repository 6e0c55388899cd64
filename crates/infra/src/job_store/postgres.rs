//! Postgres-backed Job Store.
//!
//! ## Compare-and-set
//!
//! `transition` reads the row, computes the next version with
//! [`Job::apply`], then writes it with
//! `UPDATE jobs ... WHERE job_id = $1 AND state = $2 AND version = $3`.
//! Zero affected rows means another actor moved the job first: `Conflict`.
//! A `Succeed` transition inserts into `job_results` inside the same
//! transaction, so a succeeded job without a result is never visible.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` |
//! | RowNotFound | N/A | `NotFound` |
//! | anything else | Any other | `Unavailable` |

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::instrument;

use jobmesh_core::{CapabilitySet, JobId, TenantId, WorkerId};
use jobmesh_jobs::{
    FailureReason, Job, JobPayload, JobResult, JobState, JobStats, ResultRef, Transition,
};

use super::{JobStore, PendingCursor};
use crate::error::StoreError;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        job_id              UUID PRIMARY KEY,
        tenant_id           UUID NOT NULL,
        payload             BYTEA NOT NULL,
        requirement         TEXT NOT NULL,
        state               TEXT NOT NULL,
        assigned_worker     UUID NULL,
        attempts            INTEGER NOT NULL DEFAULT 0,
        failure_code        TEXT NULL,
        failure_diagnostic  TEXT NULL,
        result_size         BIGINT NULL,
        result_produced_at  TIMESTAMPTZ NULL,
        result_run_time_ms  BIGINT NULL,
        version             BIGINT NOT NULL,
        created_at          TIMESTAMPTZ NOT NULL,
        updated_at          TIMESTAMPTZ NOT NULL,
        assigned_at         TIMESTAMPTZ NULL,
        started_at          TIMESTAMPTZ NULL,
        finished_at         TIMESTAMPTZ NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS jobs_tenant_idx ON jobs (tenant_id, job_id)",
    "CREATE INDEX IF NOT EXISTS jobs_dispatch_idx ON jobs (state, requirement, created_at, job_id)",
    "CREATE INDEX IF NOT EXISTS jobs_worker_idx ON jobs (assigned_worker) WHERE assigned_worker IS NOT NULL",
    r#"
    CREATE TABLE IF NOT EXISTS job_results (
        job_id       UUID PRIMARY KEY REFERENCES jobs (job_id),
        content      BYTEA NOT NULL,
        produced_at  TIMESTAMPTZ NOT NULL,
        run_time_ms  BIGINT NOT NULL
    )
    "#,
];

const JOB_COLUMNS: &str = "job_id, tenant_id, payload, requirement, state, assigned_worker, \
    attempts, failure_code, failure_diagnostic, result_size, result_produced_at, \
    result_run_time_ms, version, created_at, updated_at, assigned_at, started_at, finished_at";

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create tables and indexes if missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    async fn fetch_jobs(
        &self,
        operation: &str,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<Job>, StoreError> {
        let rows = query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        rows.iter().map(job_from_row).collect()
    }
}

#[async_trait::async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, tenant_id = %job.tenant_id), err)]
    async fn insert(&self, job: Job) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (job_id, tenant_id, payload, requirement, state, attempts, version,
                              created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.tenant_id.as_uuid())
        .bind(&job.payload.data)
        .bind(job.requirement().canonical())
        .bind(job.state.as_str())
        .bind(job.attempts as i32)
        .bind(job.version as i64)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<Job, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE tenant_id = $1 AND job_id = $2");
        let row = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?
            .ok_or(StoreError::NotFound)?;
        job_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn load(&self, job_id: JobId) -> Result<Job, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1");
        let row = sqlx::query(&sql)
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load", e))?
            .ok_or(StoreError::NotFound)?;
        job_from_row(&row)
    }

    #[instrument(skip(self, transition), fields(to = %transition.to), err)]
    async fn transition(
        &self,
        job_id: JobId,
        expected: JobState,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        let current = self.load(job_id).await?;
        let next = current.apply(expected, &transition, now)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transition", e))?;

        let updated = sqlx::query(
            r#"
            UPDATE jobs SET
                state = $4,
                assigned_worker = $5,
                attempts = $6,
                failure_code = $7,
                failure_diagnostic = $8,
                result_size = $9,
                result_produced_at = $10,
                result_run_time_ms = $11,
                version = $12,
                updated_at = $13,
                assigned_at = $14,
                started_at = $15,
                finished_at = $16
            WHERE job_id = $1 AND state = $2 AND version = $3
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(expected.as_str())
        .bind(current.version as i64)
        .bind(next.state.as_str())
        .bind(next.assigned_worker.map(|w| *w.as_uuid()))
        .bind(next.attempts as i32)
        .bind(next.failure.as_ref().map(FailureReason::code))
        .bind(next.failure.as_ref().and_then(FailureReason::diagnostic))
        .bind(next.result.map(|r| r.size_bytes as i64))
        .bind(next.result.map(|r| r.produced_at))
        .bind(next.result.map(|r| r.run_time_ms as i64))
        .bind(next.version as i64)
        .bind(next.updated_at)
        .bind(next.assigned_at)
        .bind(next.started_at)
        .bind(next.finished_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("transition", e))?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "job {job_id} moved concurrently (expected {expected} at version {})",
                current.version
            )));
        }

        if let Some(result) = transition.result() {
            sqlx::query(
                r#"
                INSERT INTO job_results (job_id, content, produced_at, run_time_ms)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(job_id.as_uuid())
            .bind(&result.content)
            .bind(result.produced_at)
            .bind(result.run_time_ms as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_result", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transition", e))?;
        Ok(next)
    }

    #[instrument(skip(self), err)]
    async fn pending_page(
        &self,
        requirement: Option<&CapabilitySet>,
        after: Option<PendingCursor>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE state = 'pending'
                AND ($1::text IS NULL OR requirement = $1)
                AND ($2::timestamptz IS NULL OR (created_at, job_id) > ($2, $3::uuid))
            ORDER BY created_at ASC, job_id ASC
            LIMIT $4
            "#
        );
        let query = sqlx::query(&sql)
            .bind(requirement.map(CapabilitySet::canonical))
            .bind(after.map(|c| c.created_at))
            .bind(after.map(|c| *c.job_id.as_uuid()))
            .bind(limit as i64);
        self.fetch_jobs("pending_page", query).await
    }

    #[instrument(skip(self), err)]
    async fn active_for_worker(&self, worker_id: WorkerId) -> Result<Option<Job>, StoreError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE assigned_worker = $1 AND state IN ('assigned', 'running', 'cancel_requested')
            ORDER BY updated_at DESC
            LIMIT 1
            "#
        );
        let query = sqlx::query(&sql).bind(worker_id.as_uuid());
        Ok(self
            .fetch_jobs("active_for_worker", query)
            .await?
            .into_iter()
            .next())
    }

    #[instrument(skip(self), err)]
    async fn assigned_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE state = 'assigned' AND assigned_at <= $1
            ORDER BY assigned_at ASC
            LIMIT $2
            "#
        );
        let query = sqlx::query(&sql).bind(cutoff).bind(limit as i64);
        self.fetch_jobs("assigned_before", query).await
    }

    #[instrument(skip(self), err)]
    async fn list(
        &self,
        tenant_id: TenantId,
        state: Option<JobState>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE tenant_id = $1 AND ($2::text IS NULL OR state = $2)
            ORDER BY created_at DESC, job_id DESC
            LIMIT $3
            "#
        );
        let query = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(state.map(JobState::as_str))
            .bind(limit as i64);
        self.fetch_jobs("list", query).await
    }

    #[instrument(skip(self), err)]
    async fn stats(&self, tenant_id: TenantId) -> Result<JobStats, StoreError> {
        let rows = sqlx::query(
            "SELECT state, COUNT(*) AS n FROM jobs WHERE tenant_id = $1 GROUP BY state",
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = JobStats::default();
        for row in rows {
            let state: String = row.try_get("state").map_err(|e| decode_error("state", e))?;
            let n: i64 = row.try_get("n").map_err(|e| decode_error("n", e))?;
            let state = JobState::parse(&state)
                .ok_or_else(|| StoreError::unavailable(format!("unknown job state {state:?}")))?;
            let n = usize::try_from(n)
                .map_err(|_| StoreError::unavailable(format!("negative count {n} for {state}")))?;
            stats.add(state, n);
        }
        Ok(stats)
    }

    #[instrument(skip(self), err)]
    async fn result(&self, job_id: JobId) -> Result<JobResult, StoreError> {
        let row = sqlx::query(
            "SELECT content, produced_at, run_time_ms FROM job_results WHERE job_id = $1",
        )
        .bind(job_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("result", e))?
        .ok_or(StoreError::NotFound)?;

        let run_time_ms: i64 = row
            .try_get("run_time_ms")
            .map_err(|e| decode_error("run_time_ms", e))?;
        Ok(JobResult {
            job_id,
            content: row.try_get("content").map_err(|e| decode_error("content", e))?,
            produced_at: row
                .try_get("produced_at")
                .map_err(|e| decode_error("produced_at", e))?,
            run_time_ms: run_time_ms.max(0) as u64,
        })
    }
}

fn job_from_row(row: &sqlx::postgres::PgRow) -> Result<Job, StoreError> {
    let get_err = |col: &'static str| move |e: sqlx::Error| decode_error(col, e);

    let requirement: String = row.try_get("requirement").map_err(get_err("requirement"))?;
    let requirement = CapabilitySet::from_canonical(&requirement)
        .map_err(|e| StoreError::unavailable(format!("corrupt requirement column: {e}")))?;
    let state: String = row.try_get("state").map_err(get_err("state"))?;
    let state = JobState::parse(&state)
        .ok_or_else(|| StoreError::unavailable(format!("unknown job state {state:?}")))?;

    let failure_code: Option<String> = row.try_get("failure_code").map_err(get_err("failure_code"))?;
    let failure_diagnostic: Option<String> = row
        .try_get("failure_diagnostic")
        .map_err(get_err("failure_diagnostic"))?;
    let failure = failure_code.and_then(|code| FailureReason::from_parts(&code, failure_diagnostic));

    let result_size: Option<i64> = row.try_get("result_size").map_err(get_err("result_size"))?;
    let result_produced_at: Option<DateTime<Utc>> = row
        .try_get("result_produced_at")
        .map_err(get_err("result_produced_at"))?;
    let result_run_time_ms: Option<i64> = row
        .try_get("result_run_time_ms")
        .map_err(get_err("result_run_time_ms"))?;
    let result = match (result_size, result_produced_at) {
        (Some(size), Some(produced_at)) => Some(ResultRef {
            size_bytes: size.max(0) as u64,
            produced_at,
            run_time_ms: result_run_time_ms.unwrap_or(0).max(0) as u64,
        }),
        _ => None,
    };

    let job_id: uuid::Uuid = row.try_get("job_id").map_err(get_err("job_id"))?;
    let tenant_id: uuid::Uuid = row.try_get("tenant_id").map_err(get_err("tenant_id"))?;
    let assigned_worker: Option<uuid::Uuid> = row
        .try_get("assigned_worker")
        .map_err(get_err("assigned_worker"))?;
    let attempts: i32 = row.try_get("attempts").map_err(get_err("attempts"))?;
    let version: i64 = row.try_get("version").map_err(get_err("version"))?;

    Ok(Job {
        id: JobId::from_uuid(job_id),
        tenant_id: TenantId::from_uuid(tenant_id),
        // Rows were validated on insert; re-validation would reject payloads
        // stored under a larger historical limit.
        payload: JobPayload {
            data: row.try_get("payload").map_err(get_err("payload"))?,
            requirement,
        },
        state,
        assigned_worker: assigned_worker.map(WorkerId::from_uuid),
        attempts: attempts.max(0) as u32,
        failure,
        result,
        version: version.max(0) as u64,
        created_at: row.try_get("created_at").map_err(get_err("created_at"))?,
        updated_at: row.try_get("updated_at").map_err(get_err("updated_at"))?,
        assigned_at: row.try_get("assigned_at").map_err(get_err("assigned_at"))?,
        started_at: row.try_get("started_at").map_err(get_err("started_at"))?,
        finished_at: row.try_get("finished_at").map_err(get_err("finished_at"))?,
    })
}

fn decode_error(column: &str, err: sqlx::Error) -> StoreError {
    StoreError::unavailable(format!("failed to decode column {column}: {err}"))
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some("23505") {
                StoreError::AlreadyExists
            } else {
                StoreError::unavailable(format!(
                    "database error in {operation}: {}",
                    db_err.message()
                ))
            }
        }
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::PoolClosed => {
            StoreError::unavailable(format!("connection pool closed in {operation}"))
        }
        other => StoreError::unavailable(format!("sqlx error in {operation}: {other}")),
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use jobmesh_core::JobId;

/// Output of a succeeded job.
///
/// Write-once: stores and caches refuse a second result for the same job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    /// Opaque bytes (or an encoded reference to an external blob).
    pub content: Vec<u8>,
    pub produced_at: DateTime<Utc>,
    /// Wall time between the worker's `running` report and completion.
    pub run_time_ms: u64,
}

impl JobResult {
    pub fn new(job_id: JobId, content: Vec<u8>, produced_at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            content,
            produced_at,
            run_time_ms: 0,
        }
    }

    pub fn with_run_time(mut self, started_at: Option<DateTime<Utc>>) -> Self {
        self.run_time_ms = started_at
            .map(|s| (self.produced_at - s).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        self
    }

    pub fn reference(&self) -> ResultRef {
        ResultRef {
            size_bytes: self.content.len() as u64,
            produced_at: self.produced_at,
            run_time_ms: self.run_time_ms,
        }
    }
}

/// What the job record knows about its result (content lives elsewhere).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRef {
    pub size_bytes: u64,
    pub produced_at: DateTime<Utc>,
    pub run_time_ms: u64,
}

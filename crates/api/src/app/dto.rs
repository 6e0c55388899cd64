use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use jobmesh_core::{CapabilitySet, JobId};
use jobmesh_jobs::{JobState, WorkerReport};

use crate::app::errors;

/// Default page size of `GET /jobs`.
pub const DEFAULT_LIST_LIMIT: usize = 50;

// -------------------------
// Request DTOs
// -------------------------

/// Query string of `POST /jobs`; the request body is the raw payload.
#[derive(Debug, Default, Deserialize)]
pub struct SubmitQuery {
    /// Comma-separated capability tags, e.g. `requires=model-type-a,gpu`.
    pub requires: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub state: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GetJobQuery {
    /// Long-poll for up to this many milliseconds.
    pub wait_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    /// Capabilities the worker currently serves; defaults to everything its
    /// credential grants.
    pub capabilities: Option<Vec<String>>,
    pub current_job: Option<JobId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedState {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    pub state: ReportedState,
    /// Result content (UTF-8) for `succeeded`.
    pub result: Option<String>,
    /// Free-form reason for `failed`.
    pub diagnostic: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
}

// -------------------------
// Mapping helpers
// -------------------------

pub fn parse_requirement(raw: Option<&str>) -> Result<CapabilitySet, axum::response::Response> {
    let tags = raw
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty());
    CapabilitySet::parse(tags).map_err(errors::orchestration_error_to_response)
}

pub fn parse_state_filter(raw: Option<&str>) -> Result<Option<JobState>, axum::response::Response> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => JobState::parse(s).map(Some).ok_or_else(|| {
            errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_state",
                "state must be one of: pending, assigned, running, cancel_requested, succeeded, failed",
            )
        }),
    }
}

impl ReportRequest {
    pub fn into_report(self) -> Result<WorkerReport, axum::response::Response> {
        match self.state {
            ReportedState::Running => Ok(WorkerReport::Running),
            ReportedState::Succeeded => match self.result {
                Some(content) => Ok(WorkerReport::Succeeded {
                    content: content.into_bytes(),
                }),
                None => Err(errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_payload",
                    "a succeeded report must carry a result",
                )),
            },
            ReportedState::Failed => Ok(WorkerReport::Failed {
                diagnostic: self.diagnostic.unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirement_is_parsed_from_comma_list() {
        let set = parse_requirement(Some(" gpu, model-type-a ,,")).unwrap();
        assert_eq!(set.len(), 2);
        assert!(parse_requirement(None).unwrap().is_empty());
    }

    #[test]
    fn state_filter_accepts_known_states_only() {
        assert_eq!(parse_state_filter(Some("running")).unwrap(), Some(JobState::Running));
        assert_eq!(parse_state_filter(None).unwrap(), None);
        assert!(parse_state_filter(Some("done")).is_err());
    }

    #[test]
    fn succeeded_report_requires_result() {
        let req = ReportRequest {
            state: ReportedState::Succeeded,
            result: None,
            diagnostic: None,
        };
        assert!(req.into_report().is_err());
    }
}

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    body::Bytes,
    extract::{Extension, Path, Query, rejection::BytesRejection},
    http::{StatusCode, header},
    response::IntoResponse,
};

use jobmesh_core::JobId;

use crate::app::dto;
use crate::app::errors::{self, orchestration_error_to_response};
use crate::app::services::AppServices;
use crate::context::TenantContext;

pub async fn submit_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::SubmitQuery>,
    body: Result<Bytes, BytesRejection>,
) -> axum::response::Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_payload",
                "payload exceeds the configured size limit",
            );
        }
        Err(rejection) => return rejection.into_response(),
    };
    let requirement = match dto::parse_requirement(query.requires.as_deref()) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match services
        .orchestrator
        .submit(tenant.tenant_id(), body.to_vec(), requirement)
        .await
    {
        Ok(job_id) => (StatusCode::CREATED, Json(dto::SubmitResponse { job_id })).into_response(),
        Err(e) => orchestration_error_to_response(e),
    }
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::ListJobsQuery>,
) -> axum::response::Response {
    let state = match dto::parse_state_filter(query.state.as_deref()) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let limit = query.limit.unwrap_or(dto::DEFAULT_LIST_LIMIT);

    match services.orchestrator.list(tenant.tenant_id(), state, limit).await {
        Ok(jobs) => (StatusCode::OK, Json(jobs)).into_response(),
        Err(e) => orchestration_error_to_response(e),
    }
}

pub async fn job_stats(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    match services.orchestrator.stats(tenant.tenant_id()).await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => orchestration_error_to_response(e),
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Query(query): Query<dto::GetJobQuery>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let view = match query.wait_ms {
        Some(ms) if ms > 0 => {
            services
                .orchestrator
                .wait(tenant.tenant_id(), job_id, Duration::from_millis(ms))
                .await
        }
        _ => services.orchestrator.job(tenant.tenant_id(), job_id).await,
    };

    match view {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => orchestration_error_to_response(e),
    }
}

pub async fn get_result(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.orchestrator.result(tenant.tenant_id(), job_id).await {
        Ok(result) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                (
                    header::HeaderName::from_static("x-run-time-ms"),
                    result.run_time_ms.to_string(),
                ),
            ],
            result.content,
        )
            .into_response(),
        Err(e) => orchestration_error_to_response(e),
    }
}

pub async fn cancel_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.orchestrator.cancel(tenant.tenant_id(), job_id).await {
        Ok(view) => (StatusCode::ACCEPTED, Json(view)).into_response(),
        Err(e) => orchestration_error_to_response(e),
    }
}

/// A malformed id names no job the caller owns.
pub(crate) fn parse_job_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse()
        .map_err(|_| errors::json_error(StatusCode::NOT_FOUND, "not_found", "not found"))
}

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};

use jobmesh_core::CapabilitySet;

use crate::app::dto;
use crate::app::errors::{self, orchestration_error_to_response};
use crate::app::routes::jobs::parse_job_id;
use crate::app::services::AppServices;
use crate::context::WorkerContext;

pub async fn heartbeat(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(worker): Extension<WorkerContext>,
    Json(body): Json<dto::HeartbeatRequest>,
) -> axum::response::Response {
    let capabilities = match body.capabilities {
        None => worker.capabilities().clone(),
        Some(tags) => match CapabilitySet::parse(tags) {
            Ok(set) => set,
            Err(e) => return orchestration_error_to_response(e),
        },
    };

    // A worker may advertise less than its credential grants, never more.
    if !worker.capabilities().satisfies(&capabilities) {
        tracing::warn!(
            worker_id = %worker.worker_id(),
            declared = %capabilities,
            granted = %worker.capabilities(),
            "heartbeat declared capabilities beyond its credential"
        );
        return errors::json_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "declared capabilities exceed the credential",
        );
    }

    match services
        .orchestrator
        .heartbeat(worker.worker_id(), capabilities, body.current_job)
        .await
    {
        Ok(ack) => (StatusCode::OK, Json(ack)).into_response(),
        Err(e) => orchestration_error_to_response(e),
    }
}

pub async fn report(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(worker): Extension<WorkerContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReportRequest>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let report = match body.into_report() {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match services
        .orchestrator
        .report(worker.worker_id(), job_id, report)
        .await
    {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => orchestration_error_to_response(e),
    }
}

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use jobmesh_core::OrchestrationError;

pub fn orchestration_error_to_response(err: OrchestrationError) -> axum::response::Response {
    let status = match &err {
        OrchestrationError::Unauthorized => StatusCode::UNAUTHORIZED,
        OrchestrationError::NotFound => StatusCode::NOT_FOUND,
        OrchestrationError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        OrchestrationError::Conflict(_)
        | OrchestrationError::NotTerminal
        | OrchestrationError::AlreadyExists => StatusCode::CONFLICT,
        OrchestrationError::Unavailable(msg) => {
            tracing::error!(error = %msg, "request failed on unavailable infrastructure");
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    json_error(status, err.code(), err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use jobmesh_auth::{AuthError, IdentityGate};

use crate::app::errors;
use crate::context::{TenantContext, WorkerContext};

#[derive(Clone)]
pub struct AuthState {
    pub gate: Arc<IdentityGate>,
}

/// Require a tenant credential; inserts [`TenantContext`].
pub async fn tenant_auth(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let identity = match extract_bearer(req.headers())
        .and_then(|token| state.gate.authenticate_tenant(token, Utc::now()))
    {
        Ok(identity) => identity,
        Err(e) => return unauthorized(e),
    };

    req.extensions_mut().insert(TenantContext::from(identity));
    next.run(req).await
}

/// Require a worker credential; inserts [`WorkerContext`].
pub async fn worker_auth(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let identity = match extract_bearer(req.headers())
        .and_then(|token| state.gate.authenticate_worker(token, Utc::now()))
    {
        Ok(identity) => identity,
        Err(e) => return unauthorized(e),
    };

    req.extensions_mut().insert(WorkerContext::from(identity));
    next.run(req).await
}

fn unauthorized(err: AuthError) -> Response {
    tracing::debug!(error = %err, "request rejected by identity gate");
    // The reason stays server-side; callers only learn that they are unauthorized.
    errors::json_error(StatusCode::UNAUTHORIZED, "unauthorized", "unauthorized")
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, AuthError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(AuthError::MissingCredential)?;

    let header = header
        .to_str()
        .map_err(|_| AuthError::Malformed("authorization header is not ASCII".into()))?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AuthError::Malformed("expected a bearer credential".into()))?;

    let token = header.trim();
    if token.is_empty() {
        return Err(AuthError::MissingCredential);
    }

    Ok(token)
}

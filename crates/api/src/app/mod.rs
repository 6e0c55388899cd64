//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: backend selection, orchestrator and identity gate
//! - `routes/`: HTTP routes + handlers (tenant side and worker side)
//! - `dto.rs`: request/response DTOs and parsing helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, extract::DefaultBodyLimit, routing::get};
use tower::ServiceBuilder;

use jobmesh_infra::BackgroundHandle;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, AppSettings};

/// The router plus the background dispatch/liveness loops serving it.
pub struct App {
    pub router: Router,
    pub services: Arc<AppServices>,
    pub background: BackgroundHandle,
}

/// Build the full HTTP router (public entrypoint used by `main.rs`) and start
/// the background loops on the current runtime.
pub async fn build_app(settings: AppSettings) -> anyhow::Result<App> {
    let services = Arc::new(services::build_services(&settings).await?);
    let auth_state = middleware::AuthState {
        gate: services.gate.clone(),
    };

    // Job bodies are buffered up to the payload limit; anything larger is
    // refused by the submit handler as an invalid payload.
    let tenant = routes::tenant_router()
        .layer(DefaultBodyLimit::max(settings.orchestrator.max_payload_bytes))
        .route_layer(axum::middleware::from_fn_with_state(
            auth_state.clone(),
            middleware::tenant_auth,
        ));
    let worker = routes::worker_router().route_layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::worker_auth,
    ));

    let router = Router::new()
        .route("/health", get(routes::system::health))
        .merge(tenant)
        .merge(worker)
        .layer(ServiceBuilder::new().layer(Extension(services.clone())));

    let background = services.orchestrator.spawn_background();
    tracing::info!("dispatcher and liveness loops started");

    Ok(App {
        router,
        services,
        background,
    })
}

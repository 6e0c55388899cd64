use axum::{
    Router,
    routing::{get, post},
};

pub mod jobs;
pub mod system;
pub mod workers;

/// Routes that require a tenant credential.
pub fn tenant_router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/jobs", post(jobs::submit_job).get(jobs::list_jobs))
        .route("/jobs/stats", get(jobs::job_stats))
        .route("/jobs/:id", get(jobs::get_job).delete(jobs::cancel_job))
        .route("/jobs/:id/result", get(jobs::get_result))
}

/// Routes that require a worker credential.
pub fn worker_router() -> Router {
    Router::new()
        .route("/worker/heartbeat", post(workers::heartbeat))
        .route("/jobs/:id/report", post(workers::report))
}

use anyhow::Context;

use jobmesh_api::app::{self, AppSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    jobmesh_observability::init();

    let settings = AppSettings::from_env()?;
    let app = app::build_app(settings).await?;

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app.router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await
        .context("server error")?;

    app.background.shutdown().await;
    Ok(())
}

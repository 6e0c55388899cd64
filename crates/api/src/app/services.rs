//! Infrastructure wiring: picks the store backends and builds the
//! orchestrator and identity gate the routes share.

use std::sync::Arc;

use anyhow::Context;

use jobmesh_auth::{Hs256Verifier, IdentityGate};
use jobmesh_infra::{
    InMemoryWorkerRegistry, JobStore, Orchestrator, OrchestratorConfig, PostgresJobStore,
    ResultCache,
};

/// Process settings, read from the environment by `main`.
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub jwt_secret: String,
    pub orchestrator: OrchestratorConfig,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub redis_url: String,
}

impl AppSettings {
    /// In-memory stores with default orchestration settings.
    pub fn in_memory(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            orchestrator: OrchestratorConfig::default(),
            use_persistent_stores: false,
            database_url: None,
            redis_url: "redis://localhost:6379".to_string(),
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
            tracing::warn!("JWT_SECRET not set; using insecure dev default");
            "dev-secret".to_string()
        });

        let orchestrator =
            OrchestratorConfig::from_env().context("invalid JOBMESH_* configuration")?;

        let use_persistent_stores = std::env::var("USE_PERSISTENT_STORES")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        Ok(Self {
            jwt_secret,
            orchestrator,
            use_persistent_stores,
            database_url: std::env::var("DATABASE_URL").ok(),
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        })
    }
}

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppServices {
    pub orchestrator: Orchestrator,
    pub gate: Arc<IdentityGate>,
}

pub async fn build_services(settings: &AppSettings) -> anyhow::Result<AppServices> {
    let config = settings.orchestrator.clone();
    config.validate()?;

    let orchestrator = if settings.use_persistent_stores {
        build_persistent_orchestrator(settings, config).await?
    } else {
        Orchestrator::in_memory(config)
    };

    let verifier = Arc::new(Hs256Verifier::new(settings.jwt_secret.as_bytes()));
    let ttl = chrono::Duration::from_std(settings.orchestrator.credential_cache_ttl)
        .context("credential cache TTL out of range")?;
    let gate = Arc::new(IdentityGate::in_memory(verifier, ttl));

    Ok(AppServices { orchestrator, gate })
}

async fn build_persistent_orchestrator(
    settings: &AppSettings,
    config: OrchestratorConfig,
) -> anyhow::Result<Orchestrator> {
    let database_url = settings
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")?;

    let pool = sqlx::PgPool::connect(database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PostgresJobStore::new(pool);
    store
        .ensure_schema()
        .await
        .context("failed to prepare job tables")?;
    let jobs: Arc<dyn JobStore> = Arc::new(store);

    let results = build_result_cache(settings, &config).await?;
    let workers = Arc::new(InMemoryWorkerRegistry::new(
        config.worker_ordering,
        config.assignment_grace_chrono(),
    ));

    tracing::info!("using Postgres job store");
    Ok(Orchestrator::new(jobs, workers, results, config))
}

#[cfg(feature = "redis")]
async fn build_result_cache(
    settings: &AppSettings,
    config: &OrchestratorConfig,
) -> anyhow::Result<Arc<dyn ResultCache>> {
    let cache = jobmesh_infra::RedisResultCache::connect(&settings.redis_url, config.result_cache_ttl)
        .await
        .context("failed to connect to Redis")?;
    tracing::info!("using Redis result cache");
    Ok(Arc::new(cache))
}

#[cfg(not(feature = "redis"))]
async fn build_result_cache(
    _settings: &AppSettings,
    config: &OrchestratorConfig,
) -> anyhow::Result<Arc<dyn ResultCache>> {
    tracing::warn!("redis feature not enabled, using in-memory result cache");
    Ok(Arc::new(jobmesh_infra::InMemoryResultCache::with_ttl(
        config.result_cache_ttl,
    )))
}

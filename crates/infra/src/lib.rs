//! Infrastructure layer: stores, cache, dispatcher, liveness and the
//! orchestration facade.
//!
//! Everything that coordinates state lives behind a trait with an in-memory
//! implementation for tests and single-node runs, plus a networked one
//! (Postgres for jobs, Redis for results behind the `redis` feature).

pub mod backoff;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod job_store;
pub mod liveness;
pub mod notify;
pub mod orchestrator;
mod recovery;
pub mod registry;
pub mod result_cache;
pub mod runner;

pub use backoff::{BackoffPolicy, BackoffStrategy};
pub use config::{ConfigError, OrchestratorConfig};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use error::StoreError;
pub use job_store::{InMemoryJobStore, JobStore, PendingCursor, PendingScan, PostgresJobStore};
pub use liveness::{LivenessSweeper, SweepReport};
pub use notify::JobNotifier;
pub use orchestrator::{HeartbeatAck, Orchestrator};
pub use registry::{InMemoryWorkerRegistry, LostWorker, WorkerOrdering, WorkerRegistry};
pub use result_cache::{InMemoryResultCache, ResultCache};
#[cfg(feature = "redis")]
pub use result_cache::RedisResultCache;
pub use runner::{BackgroundHandle, LoopStats};

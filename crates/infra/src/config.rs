//! Orchestrator configuration.
//!
//! Every numeric threshold is configuration, loaded from `JOBMESH_*`
//! environment variables on top of the defaults below.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use jobmesh_jobs::payload::DEFAULT_MAX_PAYLOAD_BYTES;

use crate::backoff::BackoffPolicy;
use crate::registry::WorkerOrdering;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// How often workers are expected to heartbeat.
    pub heartbeat_interval: Duration,
    /// Silence longer than this marks a worker offline.
    pub liveness_window: Duration,
    /// How long an `assigned` job may wait for its `running` report.
    pub assignment_grace: Duration,
    /// Lost attempts before a job fails with `RetriesExhausted`.
    pub max_attempts: u32,
    pub dispatch_interval: Duration,
    pub sweep_interval: Duration,
    pub max_payload_bytes: usize,
    /// Page size of the dispatcher's pending scan.
    pub pending_page_size: usize,
    pub worker_ordering: WorkerOrdering,
    pub credential_cache_ttl: Duration,
    pub result_cache_ttl: Duration,
    /// Upper bound on a single long-poll.
    pub max_wait: Duration,
    pub infra_backoff: BackoffPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let heartbeat_interval = Duration::from_secs(10);
        Self {
            heartbeat_interval,
            liveness_window: heartbeat_interval * 3,
            assignment_grace: heartbeat_interval * 3,
            max_attempts: 3,
            dispatch_interval: Duration::from_millis(500),
            sweep_interval: heartbeat_interval,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            pending_page_size: 256,
            worker_ordering: WorkerOrdering::default(),
            credential_cache_ttl: Duration::from_secs(60),
            result_cache_ttl: Duration::from_secs(3600),
            max_wait: Duration::from_secs(30),
            infra_backoff: BackoffPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Defaults overridden by any `JOBMESH_*` variables present.
    ///
    /// Durations are given in milliseconds (`JOBMESH_HEARTBEAT_INTERVAL_MS`, ...).
    /// Setting only the heartbeat interval rescales the liveness window,
    /// assignment grace and sweep interval with it.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) against an arbitrary source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(hb) = millis(&lookup, "JOBMESH_HEARTBEAT_INTERVAL_MS")? {
            cfg.heartbeat_interval = hb;
            cfg.liveness_window = hb * 3;
            cfg.assignment_grace = hb * 3;
            cfg.sweep_interval = hb;
        }
        if let Some(v) = millis(&lookup, "JOBMESH_LIVENESS_WINDOW_MS")? {
            cfg.liveness_window = v;
        }
        if let Some(v) = millis(&lookup, "JOBMESH_ASSIGNMENT_GRACE_MS")? {
            cfg.assignment_grace = v;
        }
        if let Some(v) = millis(&lookup, "JOBMESH_DISPATCH_INTERVAL_MS")? {
            cfg.dispatch_interval = v;
        }
        if let Some(v) = millis(&lookup, "JOBMESH_SWEEP_INTERVAL_MS")? {
            cfg.sweep_interval = v;
        }
        if let Some(v) = millis(&lookup, "JOBMESH_CREDENTIAL_CACHE_TTL_MS")? {
            cfg.credential_cache_ttl = v;
        }
        if let Some(v) = millis(&lookup, "JOBMESH_RESULT_CACHE_TTL_MS")? {
            cfg.result_cache_ttl = v;
        }
        if let Some(v) = millis(&lookup, "JOBMESH_MAX_WAIT_MS")? {
            cfg.max_wait = v;
        }
        if let Some(v) = parsed::<u32>(&lookup, "JOBMESH_MAX_ATTEMPTS")? {
            cfg.max_attempts = v;
        }
        if let Some(v) = parsed::<usize>(&lookup, "JOBMESH_MAX_PAYLOAD_BYTES")? {
            cfg.max_payload_bytes = v;
        }
        if let Some(v) = parsed::<usize>(&lookup, "JOBMESH_PENDING_PAGE_SIZE")? {
            cfg.pending_page_size = v;
        }
        if let Some(raw) = lookup("JOBMESH_WORKER_ORDERING") {
            cfg.worker_ordering =
                WorkerOrdering::parse(&raw).ok_or(ConfigError::InvalidValue {
                    name: "JOBMESH_WORKER_ORDERING",
                    value: raw,
                })?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Inconsistent(
                "heartbeat interval must be positive".into(),
            ));
        }
        if self.assignment_grace <= self.heartbeat_interval {
            return Err(ConfigError::Inconsistent(
                "assignment grace must exceed the heartbeat interval".into(),
            ));
        }
        if self.liveness_window <= self.heartbeat_interval {
            return Err(ConfigError::Inconsistent(
                "liveness window must exceed the heartbeat interval".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Inconsistent(
                "max attempts must be at least 1".into(),
            ));
        }
        if self.max_payload_bytes == 0 || self.pending_page_size == 0 {
            return Err(ConfigError::Inconsistent(
                "payload limit and page size must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn liveness_window_chrono(&self) -> chrono::Duration {
        to_chrono(self.liveness_window)
    }

    pub fn assignment_grace_chrono(&self) -> chrono::Duration {
        to_chrono(self.assignment_grace)
    }
}

pub(crate) fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(parsed::<u64>(lookup, name)?.map(Duration::from_millis))
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_are_consistent() {
        let cfg = OrchestratorConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.liveness_window, cfg.heartbeat_interval * 3);
        assert_eq!(cfg.credential_cache_ttl, Duration::from_secs(60));
    }

    #[test]
    fn heartbeat_override_rescales_windows() {
        let cfg = OrchestratorConfig::from_lookup(lookup(&[(
            "JOBMESH_HEARTBEAT_INTERVAL_MS",
            "1000",
        )]))
        .unwrap();
        assert_eq!(cfg.liveness_window, Duration::from_secs(3));
        assert_eq!(cfg.assignment_grace, Duration::from_secs(3));
    }

    #[test]
    fn grace_must_exceed_heartbeat() {
        let err = OrchestratorConfig::from_lookup(lookup(&[
            ("JOBMESH_HEARTBEAT_INTERVAL_MS", "1000"),
            ("JOBMESH_ASSIGNMENT_GRACE_MS", "1000"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent(_)));
    }

    #[test]
    fn garbage_values_are_rejected() {
        let err =
            OrchestratorConfig::from_lookup(lookup(&[("JOBMESH_MAX_ATTEMPTS", "lots")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                name: "JOBMESH_MAX_ATTEMPTS",
                value: "lots".into()
            }
        );

        let err = OrchestratorConfig::from_lookup(lookup(&[("JOBMESH_WORKER_ORDERING", "random")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}

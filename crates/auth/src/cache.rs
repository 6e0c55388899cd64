//! Short-lived positive-result cache for credential verification.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::identity::Identity;

/// A verified identity and the instant it stops being trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedIdentity {
    pub identity: Identity,
    pub expires_at: DateTime<Utc>,
}

/// Key-value cache with expiry, keyed by the raw credential.
///
/// Only successful verifications are ever stored.
pub trait CredentialCache: Send + Sync {
    fn get(&self, credential: &str, now: DateTime<Utc>) -> Option<Identity>;
    /// Store `entry`. Implementations may drop entries expired at `now`.
    fn put(&self, credential: &str, entry: CachedIdentity, now: DateTime<Utc>);
    fn evict(&self, credential: &str);
}

/// In-memory cache for tests/dev and single-node deployments.
#[derive(Debug, Default)]
pub struct InMemoryCredentialCache {
    inner: RwLock<HashMap<String, CachedIdentity>>,
}

impl InMemoryCredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CredentialCache for InMemoryCredentialCache {
    fn get(&self, credential: &str, now: DateTime<Utc>) -> Option<Identity> {
        let map = self.inner.read().ok()?;
        map.get(credential)
            .filter(|e| e.expires_at > now)
            .map(|e| e.identity.clone())
    }

    fn put(&self, credential: &str, entry: CachedIdentity, now: DateTime<Utc>) {
        if let Ok(mut map) = self.inner.write() {
            map.retain(|_, e| e.expires_at > now);
            map.insert(credential.to_string(), entry);
        }
    }

    fn evict(&self, credential: &str) {
        if let Ok(mut map) = self.inner.write() {
            map.remove(credential);
        }
    }
}

//! The Identity Gate: bearer credential in, tenant or worker identity out.
//!
//! Every inbound call passes through [`IdentityGate::authenticate`]. The
//! verifier is only consulted on a cache miss; revocation and tenant status
//! are checked on every call.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info};

use jobmesh_core::OrchestrationError;

use crate::cache::{CachedIdentity, CredentialCache, InMemoryCredentialCache};
use crate::claims::TokenValidationError;
use crate::identity::{Identity, TenantIdentity, WorkerIdentity};
use crate::tenants::{InMemoryTenantDirectory, TenantDirectory, TenantStatus};
use crate::verifier::CredentialVerifier;

/// Default lifetime of a cached positive verification.
pub const DEFAULT_CACHE_TTL: Duration = Duration::seconds(60);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credential")]
    MissingCredential,

    #[error("malformed credential: {0}")]
    Malformed(String),

    #[error(transparent)]
    Token(#[from] TokenValidationError),

    #[error("credential revoked")]
    Revoked,

    #[error("tenant suspended")]
    TenantSuspended,

    #[error("credential is not valid for this operation")]
    WrongIdentityKind,
}

impl From<AuthError> for OrchestrationError {
    fn from(_: AuthError) -> Self {
        OrchestrationError::Unauthorized
    }
}

/// Turns a bearer credential into an [`Identity`] on every inbound call.
///
/// Positive verifications are cached for at most `ttl` and never past the
/// credential's own expiry. Revocation and tenant suspension are checked on
/// every call, cached or not.
pub struct IdentityGate {
    verifier: Arc<dyn CredentialVerifier>,
    cache: Arc<dyn CredentialCache>,
    tenants: Arc<dyn TenantDirectory>,
    revoked: RwLock<HashSet<String>>,
    ttl: Duration,
}

impl IdentityGate {
    pub fn new(
        verifier: Arc<dyn CredentialVerifier>,
        cache: Arc<dyn CredentialCache>,
        tenants: Arc<dyn TenantDirectory>,
        ttl: Duration,
    ) -> Self {
        Self {
            verifier,
            cache,
            tenants,
            revoked: RwLock::new(HashSet::new()),
            ttl,
        }
    }

    /// Gate with in-memory cache and tenant directory.
    pub fn in_memory(verifier: Arc<dyn CredentialVerifier>, ttl: Duration) -> Self {
        Self::new(
            verifier,
            Arc::new(InMemoryCredentialCache::new()),
            Arc::new(InMemoryTenantDirectory::new()),
            ttl,
        )
    }

    pub fn authenticate(&self, credential: &str, now: DateTime<Utc>) -> Result<Identity, AuthError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        if self.is_revoked(credential) {
            return Err(AuthError::Revoked);
        }

        let identity = match self.cache.get(credential, now) {
            Some(identity) => identity,
            None => {
                let verified = self.verifier.verify(credential, now)?;
                let expires_at = (now + self.ttl).min(verified.expires_at);
                self.cache.put(
                    credential,
                    CachedIdentity {
                        identity: verified.identity.clone(),
                        expires_at,
                    },
                    now,
                );
                debug!(expires_at = %expires_at, "credential verified and cached");
                verified.identity
            }
        };

        if let Identity::Tenant(t) = &identity {
            if self.tenants.status(t.tenant_id) == TenantStatus::Suspended {
                info!(tenant_id = %t.tenant_id, "rejected call from suspended tenant");
                return Err(AuthError::TenantSuspended);
            }
        }

        Ok(identity)
    }

    pub fn authenticate_tenant(
        &self,
        credential: &str,
        now: DateTime<Utc>,
    ) -> Result<TenantIdentity, AuthError> {
        match self.authenticate(credential, now)? {
            Identity::Tenant(t) => Ok(t),
            Identity::Worker(_) => Err(AuthError::WrongIdentityKind),
        }
    }

    pub fn authenticate_worker(
        &self,
        credential: &str,
        now: DateTime<Utc>,
    ) -> Result<WorkerIdentity, AuthError> {
        match self.authenticate(credential, now)? {
            Identity::Worker(w) => Ok(w),
            Identity::Tenant(_) => Err(AuthError::WrongIdentityKind),
        }
    }

    /// Revoke a credential. Takes effect immediately, cache included.
    pub fn revoke(&self, credential: &str) {
        let credential = credential.trim();
        if let Ok(mut revoked) = self.revoked.write() {
            revoked.insert(credential.to_string());
        }
        self.cache.evict(credential);
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_revoked(&self, credential: &str) -> bool {
        self.revoked
            .read()
            .map(|r| r.contains(credential))
            .unwrap_or(true)
    }
}

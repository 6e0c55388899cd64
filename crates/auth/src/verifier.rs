//! Issuer contract: token → identity or rejection.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};

use jobmesh_core::{CapabilitySet, TenantId, WorkerId};

use crate::claims::{CredentialClaims, SubjectKind, validate_claims};
use crate::gate::AuthError;
use crate::identity::Identity;

/// A credential that passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCredential {
    pub identity: Identity,
    /// The gate never caches an identity past this instant.
    pub expires_at: DateTime<Utc>,
}

/// Verification contract consumed by the gate.
///
/// Any bearer-token scheme can sit behind this; the orchestration core never
/// sees the mechanics.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<VerifiedCredential, AuthError>;
}

/// HS256-signed JWT verifier (shared secret with the issuer).
pub struct Hs256Verifier {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256Verifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Time checks run in `validate_claims` against the caller's clock.
        validation.validate_exp = false;
        validation.required_spec_claims = HashSet::new();
        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }
}

impl CredentialVerifier for Hs256Verifier {
    fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<VerifiedCredential, AuthError> {
        let data = jsonwebtoken::decode::<CredentialClaims>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::Malformed(e.to_string()))?;
        let claims = data.claims;

        validate_claims(&claims, now)?;
        let expires_at = claims
            .expires_at()
            .ok_or(AuthError::Token(crate::TokenValidationError::OutOfRange))?;

        Ok(VerifiedCredential {
            identity: identity_from_claims(&claims)?,
            expires_at,
        })
    }
}

fn identity_from_claims(claims: &CredentialClaims) -> Result<Identity, AuthError> {
    match claims.kind {
        SubjectKind::Tenant => Ok(Identity::tenant(TenantId::from_uuid(claims.sub))),
        SubjectKind::Worker => {
            let capabilities = CapabilitySet::parse(claims.capabilities.iter().cloned())
                .map_err(|e| AuthError::Malformed(e.to_string()))?;
            Ok(Identity::worker(WorkerId::from_uuid(claims.sub), capabilities))
        }
    }
}

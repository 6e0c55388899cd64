use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Which kind of principal a credential was issued to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    /// An API client acting for a tenant.
    Tenant,
    /// A remote worker process.
    Worker,
}

/// Credential claims model (transport-agnostic).
///
/// This is the minimal set of claims jobmesh expects once a token has been
/// decoded/verified by the issuer contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialClaims {
    /// Tenant id or worker id, depending on `kind`.
    pub sub: Uuid,

    pub kind: SubjectKind,

    /// Capability tags a worker credential is allowed to serve.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,

    /// Issued-at, seconds since the epoch.
    pub iat: i64,

    /// Expiration, seconds since the epoch.
    pub exp: i64,
}

impl CredentialClaims {
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.iat, 0).single()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (iat is in the future)")]
    NotYetValid,

    #[error("invalid token time window (exp <= iat)")]
    InvalidTimeWindow,

    #[error("token timestamps are out of range")]
    OutOfRange,
}

/// Deterministically validate credential claims.
///
/// Note: this validates the *claims* only. Signature verification / decoding
/// happens in the verifier.
pub fn validate_claims(
    claims: &CredentialClaims,
    now: DateTime<Utc>,
) -> Result<(), TokenValidationError> {
    let (issued_at, expires_at) = match (claims.issued_at(), claims.expires_at()) {
        (Some(i), Some(e)) => (i, e),
        _ => return Err(TokenValidationError::OutOfRange),
    };
    if expires_at <= issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= expires_at {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(iat: i64, exp: i64) -> CredentialClaims {
        CredentialClaims {
            sub: Uuid::now_v7(),
            kind: SubjectKind::Tenant,
            capabilities: vec![],
            iat,
            exp,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn accepts_token_inside_window() {
        assert_eq!(validate_claims(&claims(100, 200), at(150)), Ok(()));
    }

    #[test]
    fn rejects_expired_and_future_tokens() {
        assert_eq!(
            validate_claims(&claims(100, 200), at(200)),
            Err(TokenValidationError::Expired)
        );
        assert_eq!(
            validate_claims(&claims(100, 200), at(99)),
            Err(TokenValidationError::NotYetValid)
        );
    }

    #[test]
    fn rejects_inverted_window() {
        assert_eq!(
            validate_claims(&claims(200, 200), at(200)),
            Err(TokenValidationError::InvalidTimeWindow)
        );
    }
}

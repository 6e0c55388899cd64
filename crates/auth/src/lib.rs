//! `jobmesh-auth`: the Identity Gate.
//!
//! Resolves an opaque bearer credential into either a tenant identity or a
//! worker identity. This crate knows nothing about HTTP or
//! storage: the issuer is abstracted behind [`CredentialVerifier`] and the
//! positive-result cache behind [`CredentialCache`].

pub mod cache;
pub mod claims;
pub mod gate;
pub mod identity;
pub mod tenants;
pub mod verifier;

pub use cache::{CachedIdentity, CredentialCache, InMemoryCredentialCache};
pub use claims::{CredentialClaims, SubjectKind, TokenValidationError, validate_claims};
pub use gate::{AuthError, IdentityGate};
pub use identity::{Identity, TenantIdentity, WorkerIdentity};
pub use tenants::{InMemoryTenantDirectory, TenantDirectory, TenantStatus};
pub use verifier::{CredentialVerifier, Hs256Verifier, VerifiedCredential};

//! `jobmesh-core`: orchestration foundation building blocks.
//!
//! This crate contains **pure** primitives shared by every other crate
//! (no infrastructure concerns): identifiers, capability tags and the error
//! taxonomy surfaced at the orchestration boundary.

pub mod capability;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use capability::{Capability, CapabilitySet};
pub use entity::Entity;
pub use error::{OrchestrationError, OrchestrationResult};
pub use id::{JobId, TenantId, WorkerId};
pub use value_object::ValueObject;

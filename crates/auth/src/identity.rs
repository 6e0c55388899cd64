use serde::Serialize;

use jobmesh_core::{CapabilitySet, TenantId, WorkerId};

/// An API client acting for a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TenantIdentity {
    pub tenant_id: TenantId,
}

/// A remote worker and the capabilities its credential grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerIdentity {
    pub worker_id: WorkerId,
    pub capabilities: CapabilitySet,
}

/// The resolved identity behind a credential. Never anonymous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    Tenant(TenantIdentity),
    Worker(WorkerIdentity),
}

impl Identity {
    pub fn tenant(tenant_id: TenantId) -> Self {
        Self::Tenant(TenantIdentity { tenant_id })
    }

    pub fn worker(worker_id: WorkerId, capabilities: CapabilitySet) -> Self {
        Self::Worker(WorkerIdentity {
            worker_id,
            capabilities,
        })
    }

    pub fn as_tenant(&self) -> Option<&TenantIdentity> {
        match self {
            Identity::Tenant(t) => Some(t),
            Identity::Worker(_) => None,
        }
    }

    pub fn as_worker(&self) -> Option<&WorkerIdentity> {
        match self {
            Identity::Worker(w) => Some(w),
            Identity::Tenant(_) => None,
        }
    }
}

use jobmesh_auth::{TenantIdentity, WorkerIdentity};
use jobmesh_core::{CapabilitySet, TenantId, WorkerId};

/// Tenant context for a request.
///
/// This is immutable and must be present for all tenant routes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

impl From<TenantIdentity> for TenantContext {
    fn from(identity: TenantIdentity) -> Self {
        Self::new(identity.tenant_id)
    }
}

/// Worker context for a request (authenticated worker + granted capabilities).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerContext {
    worker_id: WorkerId,
    capabilities: CapabilitySet,
}

impl WorkerContext {
    pub fn new(worker_id: WorkerId, capabilities: CapabilitySet) -> Self {
        Self {
            worker_id,
            capabilities,
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Capabilities the credential was issued for.
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }
}

impl From<WorkerIdentity> for WorkerContext {
    fn from(identity: WorkerIdentity) -> Self {
        Self::new(identity.worker_id, identity.capabilities)
    }
}

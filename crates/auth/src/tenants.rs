use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use jobmesh_core::TenantId;

/// Tenants are soft-disabled, never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Active,
    Suspended,
}

/// Source of tenant status. Tenants it has never heard of are active.
pub trait TenantDirectory: Send + Sync {
    fn status(&self, tenant_id: TenantId) -> TenantStatus;
}

#[derive(Debug, Default)]
pub struct InMemoryTenantDirectory {
    inner: RwLock<HashMap<TenantId, TenantStatus>>,
}

impl InMemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, tenant_id: TenantId, status: TenantStatus) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(tenant_id, status);
        }
    }

    pub fn suspend(&self, tenant_id: TenantId) {
        self.set_status(tenant_id, TenantStatus::Suspended);
    }

    pub fn reactivate(&self, tenant_id: TenantId) {
        self.set_status(tenant_id, TenantStatus::Active);
    }
}

impl TenantDirectory for InMemoryTenantDirectory {
    fn status(&self, tenant_id: TenantId) -> TenantStatus {
        self.inner
            .read()
            .ok()
            .and_then(|m| m.get(&tenant_id).copied())
            .unwrap_or(TenantStatus::Active)
    }
}

use serde::{Deserialize, Serialize};

use jobmesh_core::{CapabilitySet, OrchestrationError};

/// Default upper bound on payload size (1 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Opaque job payload plus the capability class a worker must offer to run it.
///
/// The orchestrator never interprets `data`; workers do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub data: Vec<u8>,
    pub requirement: CapabilitySet,
}

impl JobPayload {
    /// Build a payload, enforcing the basic submission rules:
    /// non-empty data, at most `max_bytes`, non-empty requirement.
    pub fn new(
        data: Vec<u8>,
        requirement: CapabilitySet,
        max_bytes: usize,
    ) -> Result<Self, OrchestrationError> {
        if data.is_empty() {
            return Err(OrchestrationError::invalid_payload("payload is empty"));
        }
        if data.len() > max_bytes {
            return Err(OrchestrationError::invalid_payload(format!(
                "payload is {} bytes, limit is {max_bytes}",
                data.len()
            )));
        }
        if requirement.is_empty() {
            return Err(OrchestrationError::invalid_payload(
                "capability requirement is empty",
            ));
        }
        Ok(Self { data, requirement })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

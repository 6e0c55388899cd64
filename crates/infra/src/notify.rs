use tokio::sync::broadcast;

use jobmesh_core::JobId;

const CHANNEL_CAPACITY: usize = 1024;

/// In-process fan-out of "job changed" signals for long-polling readers.
///
/// Purely a wake-up hint: waiters always re-read the store, and a lagged or
/// missing signal only delays them until their next periodic re-read.
#[derive(Debug, Clone)]
pub struct JobNotifier {
    tx: broadcast::Sender<JobId>,
}

impl JobNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn notify(&self, job_id: JobId) {
        // No receivers is fine.
        let _ = self.tx.send(job_id);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobId> {
        self.tx.subscribe()
    }
}

impl Default for JobNotifier {
    fn default() -> Self {
        Self::new()
    }
}

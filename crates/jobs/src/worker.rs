//! Worker records and availability rules.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use jobmesh_core::{CapabilitySet, Entity, JobId, WorkerId};

/// Reachability of a worker as seen by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Heartbeating and idle.
    Online,
    /// Heartbeating and holding a job.
    Busy,
    /// Heartbeats stopped for longer than the liveness window.
    Offline,
}

/// A remote executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub capabilities: CapabilitySet,
    pub status: WorkerStatus,
    pub last_heartbeat: DateTime<Utc>,
    /// At most one job at a time.
    pub current_job: Option<JobId>,
    /// When the dispatcher reserved this worker for `current_job`.
    pub reserved_at: Option<DateTime<Utc>>,
    /// Start of the current idle period (drives eligibility ordering).
    pub idle_since: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub tasks_completed: u64,
}

impl Entity for Worker {
    type Id = WorkerId;

    fn id(&self) -> WorkerId {
        self.id
    }
}

impl Worker {
    /// A worker seen for the first time.
    pub fn register(id: WorkerId, capabilities: CapabilitySet, now: DateTime<Utc>) -> Self {
        Self {
            id,
            capabilities,
            status: WorkerStatus::Online,
            last_heartbeat: now,
            current_job: None,
            reserved_at: None,
            idle_since: now,
            registered_at: now,
            tasks_completed: 0,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == WorkerStatus::Online && self.current_job.is_none()
    }

    pub fn is_stale(&self, now: DateTime<Utc>, liveness_window: Duration) -> bool {
        self.status != WorkerStatus::Offline && now - self.last_heartbeat > liveness_window
    }

    /// Fold a heartbeat into the record.
    ///
    /// A reported job marks the worker busy. No reported job marks it
    /// available, except while a dispatcher reservation younger than
    /// `reservation_hold` is outstanding: the worker cannot know about an
    /// assignment that is still being committed.
    pub fn record_heartbeat(
        &mut self,
        capabilities: CapabilitySet,
        current_job: Option<JobId>,
        now: DateTime<Utc>,
        reservation_hold: Duration,
    ) {
        let was_available = self.is_available();
        self.capabilities = capabilities;
        self.last_heartbeat = now;

        match current_job {
            Some(job) => {
                if self.current_job != Some(job) {
                    self.reserved_at = None;
                }
                self.current_job = Some(job);
                self.status = WorkerStatus::Busy;
            }
            None => {
                let fresh_reservation = self.current_job.is_some()
                    && self
                        .reserved_at
                        .is_some_and(|at| now - at < reservation_hold);
                if fresh_reservation {
                    self.status = WorkerStatus::Busy;
                } else {
                    self.current_job = None;
                    self.reserved_at = None;
                    self.status = WorkerStatus::Online;
                    if !was_available {
                        self.idle_since = now;
                    }
                }
            }
        }
    }

    /// Hold this worker for `job`. Only an available worker can be reserved.
    pub fn reserve(&mut self, job: JobId, now: DateTime<Utc>) -> bool {
        if !self.is_available() {
            return false;
        }
        self.current_job = Some(job);
        self.reserved_at = Some(now);
        self.status = WorkerStatus::Busy;
        true
    }

    /// Drop the hold on `job` if this worker still has it.
    pub fn release(&mut self, job: JobId, completed: bool, now: DateTime<Utc>) -> bool {
        if self.current_job != Some(job) {
            return false;
        }
        self.current_job = None;
        self.reserved_at = None;
        if completed {
            self.tasks_completed += 1;
        }
        if self.status != WorkerStatus::Offline {
            self.status = WorkerStatus::Online;
            self.idle_since = now;
        }
        true
    }

    /// Mark offline, returning the job it held (if any).
    pub fn mark_offline(&mut self) -> Option<JobId> {
        self.status = WorkerStatus::Offline;
        self.reserved_at = None;
        self.current_job.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> CapabilitySet {
        CapabilitySet::parse(["a"]).unwrap()
    }

    fn hold() -> Duration {
        Duration::seconds(30)
    }

    #[test]
    fn heartbeat_with_job_marks_busy() {
        let now = Utc::now();
        let mut w = Worker::register(WorkerId::new(), caps(), now);
        let job = JobId::new();
        w.record_heartbeat(caps(), Some(job), now, hold());
        assert_eq!(w.status, WorkerStatus::Busy);
        assert!(!w.is_available());

        let later = now + Duration::seconds(5);
        w.record_heartbeat(caps(), None, later, hold());
        assert!(w.is_available());
        assert_eq!(w.idle_since, later);
    }

    #[test]
    fn fresh_reservation_survives_idle_heartbeat() {
        let now = Utc::now();
        let mut w = Worker::register(WorkerId::new(), caps(), now);
        let job = JobId::new();
        assert!(w.reserve(job, now));
        assert!(!w.reserve(JobId::new(), now));

        w.record_heartbeat(caps(), None, now + Duration::seconds(1), hold());
        assert_eq!(w.current_job, Some(job));

        w.record_heartbeat(caps(), None, now + Duration::seconds(60), hold());
        assert!(w.is_available());
    }

    #[test]
    fn release_counts_completed_tasks() {
        let now = Utc::now();
        let mut w = Worker::register(WorkerId::new(), caps(), now);
        let job = JobId::new();
        w.reserve(job, now);
        assert!(!w.release(JobId::new(), true, now));
        assert!(w.release(job, true, now));
        assert_eq!(w.tasks_completed, 1);
        assert!(w.is_available());
    }

    #[test]
    fn staleness_uses_liveness_window() {
        let now = Utc::now();
        let mut w = Worker::register(WorkerId::new(), caps(), now);
        assert!(!w.is_stale(now + Duration::seconds(10), Duration::seconds(15)));
        assert!(w.is_stale(now + Duration::seconds(16), Duration::seconds(15)));

        let job = JobId::new();
        w.reserve(job, now);
        assert_eq!(w.mark_offline(), Some(job));
        assert!(!w.is_stale(now + Duration::seconds(99), Duration::seconds(15)));
    }
}

//! `jobmesh-jobs`
//!
//! **Responsibility:** the pure job/worker domain.
//!
//! - Job lifecycle state machine and the compare-and-set transition function.
//! - Payload validation and worker status reports.
//! - Worker records and availability rules.
//!
//! No IO lives here; stores in `jobmesh-infra` apply these functions under
//! their own atomicity guarantees.

pub mod job;
pub mod payload;
pub mod report;
pub mod result;
pub mod state;
pub mod view;
pub mod worker;

pub use job::{Job, JobStats, Transition, TransitionKind};
pub use payload::JobPayload;
pub use report::WorkerReport;
pub use result::{JobResult, ResultRef};
pub use state::{FailureReason, JobState, TransitionError};
pub use view::JobView;
pub use worker::{Worker, WorkerStatus};

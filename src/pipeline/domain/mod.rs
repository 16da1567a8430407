pub mod dedup;
pub mod filter;
pub mod retry;
pub mod task;

pub use dedup::{Admission, AdmissionTicket, DedupTracker, Outcome, RejectReason};
pub use filter::{should_process, CameraPattern, FilterRule, RuleSet};
pub use retry::{RetryDecision, RetryPolicy};
pub use task::{FailureReason, ProcessingTask, TaskFailure, TaskState, TaskSummary};

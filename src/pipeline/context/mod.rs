pub mod metrics;
pub mod state;
pub mod task_context;

pub use metrics::StageTimings;
pub use state::{Admitted, Analyzed, Downloaded, Extracted, ProcessingState};
pub use task_context::TaskContext;

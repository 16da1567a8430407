pub mod context;
pub mod domain;
pub mod extract;
pub mod orchestration;
pub mod services;

pub use domain::{RuleSet, TaskState, TaskSummary};
pub use extract::{FfmpegDecoder, FrameExtractor, SampledFrameExtractor, SamplingPolicy};
pub use orchestration::{Collaborators, Dispatch, Orchestrator};

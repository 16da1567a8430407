pub mod event;
pub mod frame;
pub mod result;

pub use event::{Event, RevisionKind};
pub use frame::Frame;
pub use result::{DetectionResult, Verdict};

use crate::common::{Frame, Verdict};
use bytes::Bytes;
use std::sync::Arc;

// Markers to track how far a task has progressed through the pipeline
pub struct Admitted;
pub struct Downloaded {
    pub(super) clip: Bytes,
}
pub struct Extracted {
    pub(super) frames: Arc<[Frame]>,
}
pub struct Analyzed {
    pub(super) frames: usize,
    pub(super) verdict: Verdict,
}

pub trait ProcessingState: 'static {
    fn state_name() -> &'static str;
}

impl ProcessingState for Admitted {
    fn state_name() -> &'static str {
        "Admitted"
    }
}

impl ProcessingState for Downloaded {
    fn state_name() -> &'static str {
        "Downloaded"
    }
}

impl ProcessingState for Extracted {
    fn state_name() -> &'static str {
        "Extracted"
    }
}

impl ProcessingState for Analyzed {
    fn state_name() -> &'static str {
        "Analyzed"
    }
}

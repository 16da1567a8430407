use crate::common::{DetectionResult, Event, Frame, Verdict};
use crate::pipeline::context::metrics::StageTimings;
use crate::pipeline::context::state::{Admitted, Analyzed, Downloaded, Extracted, ProcessingState};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

// TaskContext with compile-time stage tracking: a stage can only run on the
// output of the stage before it
pub struct TaskContext<S> {
    task_id: Uuid,
    event: Event,
    timings: StageTimings,
    processing_start: Instant,
    stage_start: Instant,
    state: S,
}

impl<S: ProcessingState> TaskContext<S> {
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn timings(&self) -> &StageTimings {
        &self.timings
    }

    pub fn elapsed(&self) -> Duration {
        self.processing_start.elapsed()
    }

    pub fn state_name(&self) -> &'static str {
        S::state_name()
    }

    fn advance<N>(self, state: N) -> TaskContext<N> {
        TaskContext {
            task_id: self.task_id,
            event: self.event,
            timings: self.timings,
            processing_start: self.processing_start,
            stage_start: Instant::now(),
            state,
        }
    }
}

impl TaskContext<Admitted> {
    pub fn new(task_id: Uuid, event: Event) -> Self {
        let now = Instant::now();
        Self {
            task_id,
            event,
            timings: StageTimings::new(),
            processing_start: now,
            stage_start: now,
            state: Admitted,
        }
    }

    pub fn into_downloaded(mut self, clip: Bytes) -> TaskContext<Downloaded> {
        self.timings.record_download(self.stage_start.elapsed());
        self.advance(Downloaded { clip })
    }
}

impl TaskContext<Downloaded> {
    pub fn clip(&self) -> &Bytes {
        &self.state.clip
    }

    /// The clip bytes are dropped here; frames are all later stages need.
    pub fn into_extracted(mut self, frames: Vec<Frame>) -> TaskContext<Extracted> {
        self.timings.record_extraction(self.stage_start.elapsed());
        self.advance(Extracted {
            frames: frames.into(),
        })
    }
}

impl TaskContext<Extracted> {
    pub fn frames(&self) -> &[Frame] {
        &self.state.frames
    }

    /// Cheap handle for a stage call; retries reuse the same frames.
    pub fn shared_frames(&self) -> Arc<[Frame]> {
        self.state.frames.clone()
    }

    pub fn into_analyzed(mut self, verdict: Verdict) -> TaskContext<Analyzed> {
        self.timings.record_analysis(self.stage_start.elapsed());
        let frames = self.state.frames.len();
        self.advance(Analyzed { frames, verdict })
    }
}

impl TaskContext<Analyzed> {
    pub fn frame_count(&self) -> usize {
        self.state.frames
    }

    pub fn result(&self, timestamp: DateTime<Utc>) -> DetectionResult {
        DetectionResult::from_verdict(&self.event, self.state.verdict, timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::RevisionKind;
    use image::{DynamicImage, ImageBuffer, Rgb};

    fn frame(index: usize) -> Frame {
        Frame::new(
            index,
            Duration::from_secs(index as u64),
            DynamicImage::ImageRgb8(ImageBuffer::from_pixel(2, 2, Rgb([0, 0, 0]))),
        )
    }

    #[test]
    fn context_walks_all_stages() {
        let event = Event::new("e1", "Tuin", "bird", RevisionKind::New);
        let task_id = Uuid::new_v4();
        let ctx = TaskContext::new(task_id, event);
        assert_eq!(ctx.state_name(), "Admitted");

        let ctx = ctx.into_downloaded(Bytes::from_static(b"clip"));
        assert_eq!(ctx.clip().as_ref(), b"clip");
        assert!(ctx.timings().download().is_some());

        let ctx = ctx.into_extracted(vec![frame(0), frame(1)]);
        assert_eq!(ctx.frames().len(), 2);
        let shared = ctx.shared_frames();

        let ctx = ctx.into_analyzed(Verdict::new(true, 0.85).unwrap());
        assert_eq!(ctx.state_name(), "Analyzed");
        assert_eq!(ctx.frame_count(), 2);
        assert_eq!(shared.len(), 2);

        let result = ctx.result(Utc::now());
        assert_eq!(result.event_id, "e1");
        assert!(result.detected);
        assert_eq!(result.probability, 0.85);
        assert_eq!(ctx.task_id(), task_id);
    }
}

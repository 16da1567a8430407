//! In-process stand-ins for the external collaborators. Every double counts
//! its calls so tests can assert that a stage was, or was not, reached.

use crate::common::{DetectionResult, Event, Frame, Verdict};
use crate::error::{AnalysisError, DownloadError, ExtractionError, PublishError};
use crate::intake::source::EventSource;
use crate::pipeline::extract::{ClipDecoder, DecodeSession};
use crate::pipeline::services::{ClipRetriever, InferenceClient, ResultSink};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt};
use image::{DynamicImage, ImageBuffer, Rgb};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Events pushed through the returned sender come out of the stream.
pub struct ChannelEventSource {
    receiver: mpsc::Receiver<Event>,
}

impl ChannelEventSource {
    pub fn channel(capacity: usize) -> (mpsc::Sender<Event>, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (sender, Self { receiver })
    }
}

impl EventSource for ChannelEventSource {
    fn into_stream(self: Box<Self>) -> BoxStream<'static, Event> {
        ReceiverStream::new(self.receiver).boxed()
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

/// Scripted outcome shared by the retriever and inference doubles.
#[derive(Debug, Clone)]
enum Script<T> {
    /// Fail the first `failures` calls, then answer.
    Answer { value: T, failures: usize },
    AlwaysFail,
    Hang,
}

impl<T: Clone> Script<T> {
    /// `Some(Ok)`/`Some(Err(()))` for call number `call` (1-based); `None`
    /// means never answer.
    fn outcome(&self, call: usize) -> Option<Result<T, ()>> {
        match self {
            Script::Answer { value, failures } if call > *failures => Some(Ok(value.clone())),
            Script::Answer { .. } | Script::AlwaysFail => Some(Err(())),
            Script::Hang => None,
        }
    }
}

pub struct ScriptedRetriever {
    script: Script<Bytes>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedRetriever {
    fn with_script(script: Script<Bytes>) -> Self {
        Self {
            script,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn succeeding(clip: Bytes) -> Self {
        Self::failing_first(0, clip)
    }

    pub fn failing_first(failures: usize, clip: Bytes) -> Self {
        Self::with_script(Script::Answer {
            value: clip,
            failures,
        })
    }

    pub fn always_failing() -> Self {
        Self::with_script(Script::AlwaysFail)
    }

    pub fn hanging() -> Self {
        Self::with_script(Script::Hang)
    }

    /// Every call waits this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClipRetriever for ScriptedRetriever {
    async fn fetch(&self, event_id: &str) -> Result<Bytes, DownloadError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.script.outcome(call) {
            Some(Ok(clip)) => Ok(clip),
            Some(Err(())) => Err(DownloadError::Status {
                event_id: event_id.to_string(),
                status: 503,
            }),
            None => futures::future::pending().await,
        }
    }
}

pub struct ScriptedInference {
    script: Script<Verdict>,
    calls: AtomicUsize,
    last_frame_count: Mutex<Option<usize>>,
    last_prompt: Mutex<Option<String>>,
}

impl ScriptedInference {
    fn with_script(script: Script<Verdict>) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            last_frame_count: Mutex::new(None),
            last_prompt: Mutex::new(None),
        }
    }

    pub fn answering(verdict: Verdict) -> Self {
        Self::failing_first(0, verdict)
    }

    pub fn failing_first(failures: usize, verdict: Verdict) -> Self {
        Self::with_script(Script::Answer {
            value: verdict,
            failures,
        })
    }

    pub fn always_failing() -> Self {
        Self::with_script(Script::AlwaysFail)
    }

    pub fn hanging() -> Self {
        Self::with_script(Script::Hang)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_frame_count(&self) -> Option<usize> {
        *self
            .last_frame_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl InferenceClient for ScriptedInference {
    async fn analyze(&self, frames: &[Frame], prompt: &str) -> Result<Verdict, AnalysisError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self
            .last_frame_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(frames.len());
        *self.last_prompt.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(prompt.to_string());
        match self.script.outcome(call) {
            Some(Ok(verdict)) => Ok(verdict),
            Some(Err(())) => Err(AnalysisError::Api {
                status: 500,
                message: "scripted failure".to_string(),
            }),
            None => futures::future::pending().await,
        }
    }
}

/// Keeps every published result in order.
pub struct RecordingSink {
    failures: usize,
    calls: AtomicUsize,
    published: Mutex<Vec<DetectionResult>>,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::failing_first(0)
    }

    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<DetectionResult> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn publish(&self, result: &DetectionResult) -> Result<(), PublishError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(PublishError::Transport("scripted failure".to_string()));
        }
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(result.clone());
        Ok(())
    }
}

const SYNTHETIC_MAGIC: &[u8; 5] = b"SYNTH";
const SYNTHETIC_LEN: usize = 5 + 8 + 8;
const SYNTHETIC_SIZE: u32 = 8;

/// Decodes fake clips made by [`SyntheticDecoder::clip`]: a header carrying
/// a duration and a seed. Frames are solid images whose colour depends only
/// on the seed and the offset.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticDecoder;

impl SyntheticDecoder {
    pub fn clip(duration: Duration, seed: u64) -> Bytes {
        let mut clip = BytesMut::with_capacity(SYNTHETIC_LEN);
        clip.put_slice(SYNTHETIC_MAGIC);
        clip.put_u64_le(duration.as_millis() as u64);
        clip.put_u64_le(seed);
        clip.freeze()
    }
}

pub struct SyntheticSession {
    duration: Duration,
    seed: u64,
}

#[async_trait]
impl ClipDecoder for SyntheticDecoder {
    type Session = SyntheticSession;

    async fn open(&self, clip: &[u8]) -> Result<SyntheticSession, ExtractionError> {
        if clip.len() < SYNTHETIC_LEN || !clip.starts_with(SYNTHETIC_MAGIC) {
            return Err(ExtractionError::Corrupt(
                "Missing synthetic clip header".to_string(),
            ));
        }
        let field = |range: std::ops::Range<usize>| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&clip[range]);
            u64::from_le_bytes(raw)
        };
        Ok(SyntheticSession {
            duration: Duration::from_millis(field(5..13)),
            seed: field(13..21),
        })
    }
}

#[async_trait]
impl DecodeSession for SyntheticSession {
    fn duration(&self) -> Duration {
        self.duration
    }

    async fn frame_at(&mut self, offset: Duration) -> Result<DynamicImage, ExtractionError> {
        if offset > self.duration {
            return Err(ExtractionError::Corrupt(format!(
                "Offset {:?} is past the end of the clip",
                offset
            )));
        }
        let mix = self.seed.wrapping_mul(31).wrapping_add(offset.as_millis() as u64);
        let colour = Rgb([
            (mix & 0xFF) as u8,
            ((mix >> 8) & 0xFF) as u8,
            ((mix >> 16) & 0xFF) as u8,
        ]);
        Ok(DynamicImage::ImageRgb8(ImageBuffer::from_pixel(
            SYNTHETIC_SIZE,
            SYNTHETIC_SIZE,
            colour,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retriever_fails_then_succeeds() {
        let retriever = ScriptedRetriever::failing_first(2, Bytes::from_static(b"clip"));
        assert!(retriever.fetch("e1").await.is_err());
        assert!(retriever.fetch("e1").await.is_err());
        assert_eq!(retriever.fetch("e1").await.unwrap().as_ref(), b"clip");
        assert_eq!(retriever.calls(), 3);
    }

    #[tokio::test]
    async fn sink_records_after_scripted_failures() {
        let sink = RecordingSink::failing_first(1);
        let event = Event::new("e1", "Tuin", "bird", crate::common::RevisionKind::End);
        let result = DetectionResult::from_verdict(
            &event,
            Verdict::new(true, 0.85).unwrap(),
            chrono::Utc::now(),
        );
        assert!(sink.publish(&result).await.is_err());
        assert!(sink.publish(&result).await.is_ok());
        assert_eq!(sink.published(), vec![result]);
    }

    #[tokio::test]
    async fn synthetic_clip_round_trips_header() {
        let clip = SyntheticDecoder::clip(Duration::from_millis(4250), 42);
        let session = SyntheticDecoder.open(&clip).await.unwrap();
        assert_eq!(session.duration(), Duration::from_millis(4250));
        assert_eq!(session.seed, 42);
    }

    #[tokio::test]
    async fn synthetic_frames_depend_on_seed() {
        let mut a = SyntheticDecoder
            .open(&SyntheticDecoder::clip(Duration::from_secs(2), 1))
            .await
            .unwrap();
        let mut b = SyntheticDecoder
            .open(&SyntheticDecoder::clip(Duration::from_secs(2), 2))
            .await
            .unwrap();
        let offset = Duration::from_millis(500);
        assert_ne!(
            a.frame_at(offset).await.unwrap().as_bytes(),
            b.frame_at(offset).await.unwrap().as_bytes()
        );
    }
}

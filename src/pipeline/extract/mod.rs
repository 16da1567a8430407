pub mod ffmpeg;

pub use ffmpeg::FfmpegDecoder;

use crate::common::Frame;
use crate::error::ExtractionError;
use async_trait::async_trait;
use image::DynamicImage;
use std::time::Duration;
use tracing::debug;

/// Turns clip bytes into a bounded set of still frames. Dropping the future
/// stops any decoder work still running for it.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    async fn extract(&self, clip: &[u8], max_frames: usize) -> Result<Vec<Frame>, ExtractionError>;
}

/// A container/codec backend able to seek inside one clip.
#[async_trait]
pub trait ClipDecoder: Send + Sync {
    type Session: DecodeSession;

    async fn open(&self, clip: &[u8]) -> Result<Self::Session, ExtractionError>;
}

#[async_trait]
pub trait DecodeSession: Send {
    fn duration(&self) -> Duration;

    async fn frame_at(&mut self, offset: Duration) -> Result<DynamicImage, ExtractionError>;
}

/// Where frames are taken: the centres of `n` equal slices of the clip,
/// with `n` derived from the clip length and a target sampling rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingPolicy {
    sample_fps: f64,
    min_clip: Duration,
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self {
            sample_fps: 1.0,
            min_clip: Duration::from_millis(500),
        }
    }
}

impl SamplingPolicy {
    pub fn new(sample_fps: f64, min_clip: Duration) -> Self {
        Self {
            sample_fps,
            min_clip,
        }
    }

    pub fn min_clip(&self) -> Duration {
        self.min_clip
    }

    pub fn sample_count(&self, duration: Duration, max_frames: usize) -> usize {
        let by_rate = (duration.as_secs_f64() * self.sample_fps).floor();
        let by_rate = if by_rate.is_finite() && by_rate >= 1.0 {
            by_rate as usize
        } else {
            1
        };
        by_rate.min(max_frames)
    }

    pub fn offsets(&self, duration: Duration, max_frames: usize) -> Vec<Duration> {
        let count = self.sample_count(duration, max_frames);
        (0..count)
            .map(|i| duration.mul_f64((2 * i + 1) as f64 / (2 * count) as f64))
            .collect()
    }
}

/// The extractor used by the pipeline: a sampling policy over a decoder.
pub struct SampledFrameExtractor<D> {
    decoder: D,
    sampling: SamplingPolicy,
}

impl<D: ClipDecoder> SampledFrameExtractor<D> {
    pub fn new(decoder: D, sampling: SamplingPolicy) -> Self {
        Self { decoder, sampling }
    }
}

#[async_trait]
impl<D: ClipDecoder> FrameExtractor for SampledFrameExtractor<D> {
    async fn extract(&self, clip: &[u8], max_frames: usize) -> Result<Vec<Frame>, ExtractionError> {
        if max_frames == 0 {
            return Err(ExtractionError::NoFrameBudget);
        }
        if clip.is_empty() {
            return Err(ExtractionError::EmptyClip);
        }

        let mut session = self.decoder.open(clip).await?;
        let duration = session.duration();
        if duration < self.sampling.min_clip {
            return Err(ExtractionError::TooShort {
                actual: duration,
                minimum: self.sampling.min_clip,
            });
        }

        let offsets = self.sampling.offsets(duration, max_frames);
        debug!(
            duration_ms = duration.as_millis() as u64,
            frames = offsets.len(),
            "Sampling clip"
        );
        let mut frames = Vec::with_capacity(offsets.len());
        for (index, offset) in offsets.into_iter().enumerate() {
            let image = session.frame_at(offset).await?;
            frames.push(Frame::new(index, offset, image));
        }
        Ok(frames)
    }
}

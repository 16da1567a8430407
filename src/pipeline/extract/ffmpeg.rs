use crate::error::ExtractionError;
use crate::pipeline::extract::{ClipDecoder, DecodeSession};
use async_trait::async_trait;
use image::DynamicImage;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::warn;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Decodes clips with the `ffprobe`/`ffmpeg` binaries. The clip is spooled to
/// a temporary file that lives as long as the session.
///
/// Every invocation is bounded by `timeout`. The child is killed when the
/// bound expires or when the calling future is dropped.
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
    timeout: Duration,
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegDecoder {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn read_duration(&self, file: &NamedTempFile) -> Result<Duration, ExtractionError> {
        let mut command = Command::new(&self.ffprobe_path);
        command
            .args(["-v", "error", "-print_format", "json", "-show_format"])
            .arg(file.path());
        let output = run_bounded(command, "ffprobe", self.timeout).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::Corrupt(format!(
                "ffprobe failed: {}",
                stderr.trim()
            )));
        }

        parse_clip_duration(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl ClipDecoder for FfmpegDecoder {
    type Session = FfmpegSession;

    async fn open(&self, clip: &[u8]) -> Result<FfmpegSession, ExtractionError> {
        let file = tempfile::Builder::new()
            .prefix("frigate-clip-")
            .suffix(".mp4")
            .tempfile()
            .map_err(|e| ExtractionError::Decoder(format!("Failed to create temp file: {}", e)))?;
        tokio::fs::write(file.path(), clip)
            .await
            .map_err(|e| ExtractionError::Decoder(format!("Failed to spool clip: {}", e)))?;

        let duration = self.read_duration(&file).await?;
        Ok(FfmpegSession {
            file,
            duration,
            ffmpeg_path: self.ffmpeg_path.clone(),
            timeout: self.timeout,
        })
    }
}

pub struct FfmpegSession {
    file: NamedTempFile,
    duration: Duration,
    ffmpeg_path: PathBuf,
    timeout: Duration,
}

#[async_trait]
impl DecodeSession for FfmpegSession {
    fn duration(&self) -> Duration {
        self.duration
    }

    async fn frame_at(&mut self, offset: Duration) -> Result<DynamicImage, ExtractionError> {
        // -ss before -i seeks on the demuxer instead of decoding up to t
        let mut command = Command::new(&self.ffmpeg_path);
        command
            .args(["-v", "error", "-ss", &format!("{:.3}", offset.as_secs_f64()), "-i"])
            .arg(self.file.path())
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"]);
        let output = run_bounded(command, "ffmpeg", self.timeout).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::Corrupt(format!(
                "ffmpeg failed at {:?}: {}",
                offset,
                stderr.trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(ExtractionError::Corrupt(format!(
                "No frame decoded at {:?}",
                offset
            )));
        }

        image::load_from_memory(&output.stdout)
            .map_err(|e| ExtractionError::Corrupt(format!("Undecodable frame: {}", e)))
    }
}

async fn run_bounded(
    mut command: Command,
    tool: &str,
    limit: Duration,
) -> Result<Output, ExtractionError> {
    command.stdin(Stdio::null()).kill_on_drop(true);
    match tokio::time::timeout(limit, command.output()).await {
        Ok(output) => {
            output.map_err(|e| ExtractionError::Decoder(format!("Failed to run {}: {}", tool, e)))
        }
        Err(_) => {
            warn!(tool, limit_ms = limit.as_millis() as u64, "Decoder process killed after timeout");
            Err(ExtractionError::TimedOut(limit))
        }
    }
}

fn parse_clip_duration(json_str: &str) -> Result<Duration, ExtractionError> {
    let json: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| ExtractionError::Corrupt(format!("Failed to parse ffprobe output: {}", e)))?;

    let seconds = json
        .get("format")
        .and_then(|format| format.get("duration"))
        .and_then(|d| match d {
            serde_json::Value::String(s) => s.parse::<f64>().ok(),
            other => other.as_f64(),
        })
        .ok_or_else(|| ExtractionError::Corrupt("Clip has no duration".to_string()))?;

    if !seconds.is_finite() || seconds < 0.0 {
        return Err(ExtractionError::Corrupt(format!(
            "Invalid clip duration {}",
            seconds
        )));
    }
    Ok(Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clip_duration() {
        let json = r#"{"format": {"filename": "clip.mp4", "duration": "12.480000", "size": "1024"}}"#;
        assert_eq!(
            parse_clip_duration(json).unwrap(),
            Duration::from_secs_f64(12.48)
        );
    }

    #[test]
    fn report_without_duration_is_corrupt() {
        assert!(matches!(
            parse_clip_duration(r#"{"format": {}}"#),
            Err(ExtractionError::Corrupt(_))
        ));
        assert!(matches!(
            parse_clip_duration("garbage"),
            Err(ExtractionError::Corrupt(_))
        ));
        assert!(matches!(
            parse_clip_duration(r#"{"format": {"duration": "N/A"}}"#),
            Err(ExtractionError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn missing_binary_is_a_decoder_error() {
        let decoder = FfmpegDecoder::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        assert!(matches!(
            decoder.open(b"\x00\x00\x00\x18ftypmp42").await,
            Err(ExtractionError::Decoder(_))
        ));
    }

    #[cfg(unix)]
    mod stubbed {
        use super::*;
        use crate::pipeline::extract::{FrameExtractor, SampledFrameExtractor, SamplingPolicy};
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;
        use std::time::Instant;
        use tempfile::TempDir;

        const DURATION_OK: &str = r#"echo '{"format": {"duration": "4.0"}}'"#;

        fn stub(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn decoder(dir: &TempDir, ffprobe: &str, ffmpeg: &str) -> FfmpegDecoder {
            FfmpegDecoder::new(
                stub(dir.path(), "ffmpeg", ffmpeg),
                stub(dir.path(), "ffprobe", ffprobe),
            )
        }

        #[tokio::test]
        async fn hung_ffprobe_is_killed_at_timeout() {
            let dir = tempfile::tempdir().unwrap();
            let decoder = decoder(&dir, "exec sleep 30", "exit 1")
                .with_timeout(Duration::from_millis(200));

            let started = Instant::now();
            let result = decoder.open(b"clip").await;
            assert!(matches!(result, Err(ExtractionError::TimedOut(_))));
            assert!(started.elapsed() < Duration::from_secs(5));
        }

        #[tokio::test]
        async fn hung_ffmpeg_is_killed_at_timeout() {
            let dir = tempfile::tempdir().unwrap();
            let extractor = SampledFrameExtractor::new(
                decoder(&dir, DURATION_OK, "exec sleep 30").with_timeout(Duration::from_millis(200)),
                SamplingPolicy::default(),
            );

            let started = Instant::now();
            let result = extractor.extract(b"clip", 4).await;
            assert!(matches!(result, Err(ExtractionError::TimedOut(_))));
            assert!(started.elapsed() < Duration::from_secs(5));
        }

        #[cfg(target_os = "linux")]
        #[tokio::test]
        async fn dropping_extraction_kills_ffmpeg() {
            let dir = tempfile::tempdir().unwrap();
            let pid_file = dir.path().join("ffmpeg.pid");
            let ffmpeg = format!("echo $$ > {}\nexec sleep 30", pid_file.display());
            let extractor = SampledFrameExtractor::new(
                decoder(&dir, DURATION_OK, &ffmpeg),
                SamplingPolicy::default(),
            );

            // Outer deadline much shorter than the decoder's own bound.
            let outcome =
                tokio::time::timeout(Duration::from_millis(500), extractor.extract(b"clip", 4)).await;
            assert!(outcome.is_err());

            let pid = std::fs::read_to_string(&pid_file).unwrap();
            let stat = Path::new("/proc").join(pid.trim()).join("stat");
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                // Gone, or a zombie waiting to be reaped.
                let alive = std::fs::read_to_string(&stat)
                    .map(|s| !s.contains(") Z"))
                    .unwrap_or(false);
                if !alive {
                    break;
                }
                assert!(Instant::now() < deadline, "ffmpeg still running after drop");
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }
}

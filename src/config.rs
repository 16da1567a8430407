use crate::common::RevisionKind;
use crate::error::ConfigError;
use crate::intake::queue::OverflowPolicy;
use crate::pipeline::domain::{RetryPolicy, RuleSet};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "analyzer.toml";
pub const ENV_PREFIX: &str = "ANALYZER";

const DEFAULT_PROMPT: &str = "Analyseer deze videoframes. Is er een 'Reiger' (heron) aanwezig? Geef alleen een JSON-object terug volgens het opgegeven schema.";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub frigate_url: String,
    pub mqtt: MqttSettings,
    pub gemini: GeminiSettings,
    pub filters: RuleSet,
    pub pipeline: PipelineSettings,
    pub intake: IntakeSettings,
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            frigate_url: "http://localhost:5000".to_string(),
            mqtt: MqttSettings::default(),
            gemini: GeminiSettings::default(),
            filters: RuleSet::default(),
            pipeline: PipelineSettings::default(),
            intake: IntakeSettings::default(),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub broker: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub events_topic: String,
    pub result_topic: String,
    /// Name of the boolean field in the outbound payload.
    pub detected_field: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            events_topic: "frigate/events".to_string(),
            result_topic: "frigate/analyzer/result".to_string(),
            detected_field: "reiger_detected".to_string(),
            keep_alive_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GeminiSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    /// The thing the model is asked about; also the boolean key of its answer.
    pub subject: String,
    pub prompt: String,
    pub request_timeout_secs: u64,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gemini-1.5-flash-latest".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            subject: "Reiger".to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            jitter: false,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
        .with_jitter(self.jitter)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub workers: usize,
    pub max_frames: usize,
    pub sample_fps: f64,
    pub min_clip_ms: u64,
    pub task_timeout_ms: u64,
    pub download_timeout_ms: u64,
    pub analysis_timeout_ms: u64,
    pub publish_timeout_ms: u64,
    pub retry: RetrySettings,
    pub retention_secs: u64,
    pub eviction_interval_secs: u64,
    pub history_limit: usize,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    /// Bound on each ffmpeg/ffprobe invocation; the child is killed after it.
    pub ffmpeg_timeout_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            max_frames: 20,
            sample_fps: 1.0,
            min_clip_ms: 500,
            task_timeout_ms: 180_000,
            download_timeout_ms: 60_000,
            analysis_timeout_ms: 90_000,
            publish_timeout_ms: 10_000,
            retry: RetrySettings::default(),
            retention_secs: 30 * 60,
            eviction_interval_secs: 60,
            history_limit: 100,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            ffmpeg_timeout_ms: 60_000,
        }
    }
}

impl PipelineSettings {
    pub fn min_clip(&self) -> Duration {
        Duration::from_millis(self.min_clip_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_millis(self.analysis_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn ffmpeg_timeout(&self) -> Duration {
        Duration::from_millis(self.ffmpeg_timeout_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IntakeSettings {
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    /// Revisions that start a task; the rest are ignored before filtering.
    pub trigger_revisions: Vec<RevisionKind>,
}

impl Default for IntakeSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            overflow: OverflowPolicy::DropOldest,
            trigger_revisions: vec![RevisionKind::New, RevisionKind::Update, RevisionKind::End],
        }
    }
}

impl IntakeSettings {
    pub fn triggers_on(&self, revision: RevisionKind) -> bool {
        self.trigger_revisions.contains(&revision)
    }
}

impl Settings {
    /// Defaults, then the file at `path` (if it exists), then `ANALYZER__*`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        let settings: Settings = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let pipeline = &self.pipeline;
        let checks: [(bool, &str); 14] = [
            (
                (1..=16).contains(&pipeline.workers),
                "pipeline.workers must be between 1 and 16",
            ),
            (pipeline.max_frames > 0, "pipeline.max_frames must be positive"),
            (
                pipeline.sample_fps.is_finite() && pipeline.sample_fps > 0.0,
                "pipeline.sample_fps must be a positive number",
            ),
            (pipeline.task_timeout_ms > 0, "pipeline.task_timeout_ms must be positive"),
            (
                pipeline.download_timeout_ms > 0,
                "pipeline.download_timeout_ms must be positive",
            ),
            (
                pipeline.analysis_timeout_ms > 0,
                "pipeline.analysis_timeout_ms must be positive",
            ),
            (
                pipeline.publish_timeout_ms > 0,
                "pipeline.publish_timeout_ms must be positive",
            ),
            (
                pipeline.ffmpeg_timeout_ms > 0,
                "pipeline.ffmpeg_timeout_ms must be positive",
            ),
            (
                pipeline.retry.max_attempts > 0,
                "pipeline.retry.max_attempts must be positive",
            ),
            (
                pipeline.retry.base_delay_ms <= pipeline.retry.max_delay_ms,
                "pipeline.retry.base_delay_ms must not exceed max_delay_ms",
            ),
            (
                pipeline.eviction_interval_secs > 0,
                "pipeline.eviction_interval_secs must be positive",
            ),
            (pipeline.history_limit > 0, "pipeline.history_limit must be positive"),
            (
                self.intake.queue_capacity > 0,
                "intake.queue_capacity must be positive",
            ),
            (
                !self.mqtt.detected_field.trim().is_empty(),
                "mqtt.detected_field must not be empty",
            ),
        ];
        match checks.iter().find(|(ok, _)| !ok) {
            Some((_, message)) => Err(ConfigError::Invalid(message.to_string())),
            None => Ok(()),
        }
    }
}

/// Source of the configuration snapshot in effect. Readers get an `Arc`, so
/// a reload never changes a snapshot that is already in use.
pub trait ConfigProvider: Send + Sync {
    fn current(&self) -> Arc<Settings>;
}

#[derive(Debug)]
pub struct SharedConfig {
    current: RwLock<Arc<Settings>>,
    source: Option<PathBuf>,
}

impl SharedConfig {
    pub fn new(settings: Settings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(settings)),
            source: None,
        })
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let settings = Settings::load(Some(&path))?;
        Ok(Self {
            current: RwLock::new(Arc::new(settings)),
            source: Some(path),
        })
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Swaps in `candidate` if it validates. On failure the previous
    /// settings stay in effect.
    pub fn reload(&self, candidate: Settings) -> Result<(), ConfigError> {
        if let Err(e) = candidate.validate() {
            warn!("Rejected configuration reload, keeping previous settings: {}", e);
            return Err(e);
        }
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(candidate);
        info!("Configuration reloaded");
        Ok(())
    }

    /// Re-reads the file this configuration was loaded from.
    pub fn reload_from_source(&self) -> Result<(), ConfigError> {
        let candidate = match Settings::load(self.source.as_deref()) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Rejected configuration reload, keeping previous settings: {}", e);
                return Err(e);
            }
        };
        self.reload(candidate)
    }
}

impl ConfigProvider for SharedConfig {
    fn current(&self) -> Arc<Settings> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

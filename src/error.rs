use std::time::Duration;
use thiserror::Error;

// Main Application Error Type

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Coordinator error: {0}")]
    Coordinator(String),
    #[error("Work queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// Inbound notification errors. These never reach the pipeline, the adapter
// logs and drops the message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventParseError {
    #[error("Payload is not valid JSON: {0}")]
    NotJson(String),
    #[error("Payload is not a JSON object")]
    NotAnObject,
    #[error("Unknown revision type: {0:?}")]
    UnknownRevision(Option<String>),
    #[error("Event details are missing")]
    MissingDetails,
    #[error("Event id is missing")]
    MissingId,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DownloadError {
    #[error("Request for clip {event_id} failed: {message}")]
    Request { event_id: String, message: String },
    #[error("Recorder answered {status} for clip {event_id}")]
    Status { event_id: String, status: u16 },
    #[error("Clip for event {0} is empty")]
    EmptyClip(String),
    #[error("Clip download timed out after {0:?}")]
    TimedOut(Duration),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("Clip is empty")]
    EmptyClip,
    #[error("Clip could not be decoded: {0}")]
    Corrupt(String),
    #[error("Clip lasts {actual:?}, shorter than the usable minimum of {minimum:?}")]
    TooShort { actual: Duration, minimum: Duration },
    #[error("Frame budget must allow at least one frame")]
    NoFrameBudget,
    #[error("Decoder failed: {0}")]
    Decoder(String),
    #[error("Decoder did not finish within {0:?}")]
    TimedOut(Duration),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Inference request failed: {0}")]
    Request(String),
    #[error("Inference service answered {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Inference response could not be used: {0}")]
    Malformed(String),
    #[error("No frames to analyze")]
    NoFrames,
    #[error("Inference call timed out after {0:?}")]
    TimedOut(Duration),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublishError {
    #[error("Failed to publish result: {0}")]
    Transport(String),
    #[error("Failed to encode result: {0}")]
    Encode(String),
    #[error("Publish timed out after {0:?}")]
    TimedOut(Duration),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("The work queue is closed.")]
    Closed,
}

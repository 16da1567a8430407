pub mod inference;
pub mod retriever;
pub mod sink;

pub use inference::{GeminiClient, InferenceClient};
pub use retriever::{ClipRetriever, HttpClipRetriever};
pub use sink::{LogSink, MqttResultSink, ResultSink};

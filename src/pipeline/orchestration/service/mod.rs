pub mod clip_service;
pub mod inference_service;
pub mod publish_service;

pub use clip_service::ClipService;
pub use inference_service::{AnalysisRequest, InferenceService};
pub use publish_service::PublishService;

use crate::error::{AppError, DownloadError};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

/// Fetches the recorded clip of an event.
#[async_trait]
pub trait ClipRetriever: Send + Sync {
    async fn fetch(&self, event_id: &str) -> Result<Bytes, DownloadError>;
}

/// Downloads clips from the Frigate HTTP API.
pub struct HttpClipRetriever {
    client: reqwest::Client,
    base_url: String,
}

impl HttpClipRetriever {
    pub fn new(frigate_url: &str, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: frigate_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn clip_url(&self, event_id: &str) -> String {
        format!("{}/api/events/{}/clip.mp4", self.base_url, event_id)
    }
}

#[async_trait]
impl ClipRetriever for HttpClipRetriever {
    async fn fetch(&self, event_id: &str) -> Result<Bytes, DownloadError> {
        let url = self.clip_url(event_id);
        let request_error = |e: reqwest::Error| DownloadError::Request {
            event_id: event_id.to_string(),
            message: e.to_string(),
        };

        let response = self.client.get(&url).send().await.map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                event_id: event_id.to_string(),
                status: status.as_u16(),
            });
        }

        let clip = response.bytes().await.map_err(request_error)?;
        if clip.is_empty() {
            return Err(DownloadError::EmptyClip(event_id.to_string()));
        }
        debug!(event_id, bytes = clip.len(), "Clip downloaded");
        Ok(clip)
    }
}

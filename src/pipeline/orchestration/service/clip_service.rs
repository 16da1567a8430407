use std::pin::Pin;
use std::sync::Arc;

use crate::pipeline::services::retriever::ClipRetriever;
use bytes::Bytes;
use futures::Future;
use futures::task::Context;
use futures::task::Poll;
use tower::BoxError;
use tower::Service;

/// Downloads the clip of an event id.
#[derive(Clone)]
pub struct ClipService {
    inner: Arc<dyn ClipRetriever>,
}

impl ClipService {
    pub fn new(inner: Arc<dyn ClipRetriever>) -> Self {
        Self { inner }
    }
}

impl Service<String> for ClipService {
    type Response = Bytes;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event_id: String) -> Self::Future {
        let inner = self.inner.clone();

        Box::pin(async move {
            let clip = inner.fetch(&event_id).await?;
            Ok(clip)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doubles::ScriptedRetriever;
    use crate::error::DownloadError;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_clip_service() {
        let retriever = Arc::new(ScriptedRetriever::failing_first(1, Bytes::from_static(b"clip")));
        let service = ClipService::new(retriever.clone());

        let err = service.clone().oneshot("e1".to_string()).await.unwrap_err();
        assert!(err.downcast_ref::<DownloadError>().is_some());

        let clip = service.oneshot("e1".to_string()).await.unwrap();
        assert_eq!(clip.as_ref(), b"clip");
        assert_eq!(retriever.calls(), 2);
    }
}

use std::pin::Pin;
use std::sync::Arc;

use crate::common::{Frame, Verdict};
use crate::pipeline::services::inference::InferenceClient;
use futures::Future;
use futures::task::Context;
use futures::task::Poll;
use tower::BoxError;
use tower::Service;

/// Frames and prompt for one inference call. Cloning shares the frames.
#[derive(Clone)]
pub struct AnalysisRequest {
    pub frames: Arc<[Frame]>,
    pub prompt: String,
}

#[derive(Clone)]
pub struct InferenceService {
    inner: Arc<dyn InferenceClient>,
}

impl InferenceService {
    pub fn new(inner: Arc<dyn InferenceClient>) -> Self {
        Self { inner }
    }
}

impl Service<AnalysisRequest> for InferenceService {
    type Response = Verdict;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: AnalysisRequest) -> Self::Future {
        let inner = self.inner.clone();

        Box::pin(async move {
            let verdict = inner.analyze(&req.frames, &req.prompt).await?;
            Ok(verdict)
        })
    }
}

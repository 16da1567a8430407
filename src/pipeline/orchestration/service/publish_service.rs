use std::pin::Pin;
use std::sync::Arc;

use crate::common::DetectionResult;
use crate::pipeline::services::sink::ResultSink;
use futures::Future;
use futures::task::Context;
use futures::task::Poll;
use tower::BoxError;
use tower::Service;

#[derive(Clone)]
pub struct PublishService {
    inner: Arc<dyn ResultSink>,
}

impl PublishService {
    pub fn new(inner: Arc<dyn ResultSink>) -> Self {
        Self { inner }
    }
}

impl Service<DetectionResult> for PublishService {
    type Response = ();
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: DetectionResult) -> Self::Future {
        let inner = self.inner.clone();

        Box::pin(async move {
            inner.publish(&req).await?;
            Ok(())
        })
    }
}

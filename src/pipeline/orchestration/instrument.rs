use futures::Future;
use futures::task::{Context, Poll};
use std::fmt::Display;
use std::pin::Pin;
use std::time::Instant;
use tower::Service;
use tower_layer::Layer;
use tracing::debug;

/// Wraps a stage service with timing and outcome logging.
#[derive(Debug, Clone, Copy)]
pub struct StageLogLayer {
    stage: &'static str,
}

impl StageLogLayer {
    pub fn new(stage: &'static str) -> Self {
        Self { stage }
    }
}

impl<S> Layer<S> for StageLogLayer {
    type Service = StageLog<S>;

    fn layer(&self, inner: S) -> Self::Service {
        StageLog {
            inner,
            stage: self.stage,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageLog<S> {
    inner: S,
    stage: &'static str,
}

impl<S, Request> Service<Request> for StageLog<S>
where
    S: Service<Request>,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: Display + Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let stage = self.stage;
        let start = Instant::now();
        let future = self.inner.call(req);

        Box::pin(async move {
            let result = future.await;
            let elapsed_us = start.elapsed().as_micros() as u64;
            match &result {
                Ok(_) => debug!(stage, elapsed_us, "Stage call completed"),
                Err(e) => debug!(stage, elapsed_us, "Stage call failed: {}", e),
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::{ServiceBuilder, ServiceExt, service_fn};

    #[tokio::test]
    async fn passes_results_through() {
        let service = ServiceBuilder::new()
            .layer(StageLogLayer::new("double"))
            .service(service_fn(|n: u32| async move {
                if n == 0 {
                    Err("zero".to_string())
                } else {
                    Ok(n * 2)
                }
            }));

        assert_eq!(service.clone().oneshot(21).await, Ok(42));
        assert_eq!(service.oneshot(0).await, Err("zero".to_string()));
    }
}

use crate::{
    config::ConfigProvider,
    error::AppError,
    intake::source::EventSource,
    pipeline::{
        extract::FrameExtractor,
        orchestration::{Collaborators, Orchestrator},
        services::{ClipRetriever, InferenceClient, ResultSink},
    },
};
use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::common::Event;

pub struct Coordinator {
    orchestrator: Orchestrator,
    cancel_token: CancellationToken,
    intake_task: JoinHandle<()>,
    housekeeping_task: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl Coordinator {
    fn start(
        orchestrator: Orchestrator,
        source: Box<dyn EventSource>,
        workers: usize,
        eviction_interval: Duration,
    ) -> Self {
        let cancel_token = CancellationToken::new();
        info!(source = source.name(), workers, "Starting pipeline");

        let workers = orchestrator.spawn_workers(workers, cancel_token.clone());
        let intake_task = Self::start_intake_task(
            orchestrator.clone(),
            source.into_stream(),
            cancel_token.clone(),
        );
        let housekeeping_task = Self::start_housekeeping_task(
            orchestrator.clone(),
            eviction_interval,
            cancel_token.clone(),
        );

        Self {
            orchestrator,
            cancel_token,
            intake_task,
            housekeeping_task,
            workers,
        }
    }

    fn start_intake_task(
        orchestrator: Orchestrator,
        mut events: BoxStream<'static, Event>,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    next = events.next() => match next {
                        Some(event) => event,
                        None => {
                            info!("Event source ended");
                            break;
                        }
                    },
                };
                match orchestrator.on_event(event).await {
                    Ok(dispatch) => debug!(?dispatch, "Event dispatched"),
                    Err(e) => {
                        warn!("Intake stopped: {}", e);
                        break;
                    }
                }
            }
            orchestrator.close();
        })
    }

    fn start_housekeeping_task(
        orchestrator: Orchestrator,
        interval: Duration,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = orchestrator.evict_expired();
                        if evicted > 0 {
                            debug!(evicted, "Evicted expired event ids");
                        }
                    }
                }
            }
        })
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Resolves once the event source has ended and every queued task has
    /// been processed.
    pub async fn wait(&mut self) {
        if let Err(e) = (&mut self.intake_task).await {
            if !e.is_cancelled() {
                warn!("Intake task failed: {}", e);
            }
        }
        for worker in self.workers.iter_mut() {
            let _ = worker.await;
        }
        self.housekeeping_task.abort();
    }

    /// Cancels intake, fails queued tasks and aborts in-flight ones.
    pub fn stop(&self) {
        if self.cancel_token.is_cancelled() {
            return;
        }
        self.cancel_token.cancel();
        self.orchestrator.close();
        let aborted = self.orchestrator.abort_queued();
        if aborted > 0 {
            info!(aborted, "Dropped queued tasks on shutdown");
        }
        self.intake_task.abort();
        self.housekeeping_task.abort();
    }

    /// `stop`, then waits for the workers to record their aborted tasks.
    pub async fn shutdown(mut self) {
        self.stop();
        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }
        info!("Pipeline stopped");
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct CoordinatorBuilder {
    config: Arc<dyn ConfigProvider>,
    workers: Option<usize>,
    eviction_interval: Option<Duration>,
    source: Option<Box<dyn EventSource>>,
    retriever: Option<Arc<dyn ClipRetriever>>,
    extractor: Option<Arc<dyn FrameExtractor>>,
    inference: Option<Arc<dyn InferenceClient>>,
    sink: Option<Arc<dyn ResultSink>>,
}

impl CoordinatorBuilder {
    pub fn new(config: Arc<dyn ConfigProvider>) -> Self {
        Self {
            config,
            workers: None,
            eviction_interval: None,
            source: None,
            retriever: None,
            extractor: None,
            inference: None,
            sink: None,
        }
    }

    // Sets the worker count, this will override the configuration.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    // Sets how often expired event ids are evicted, this will override the configuration.
    pub fn eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = Some(interval);
        self
    }

    pub fn source(mut self, source: Box<dyn EventSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn retriever(mut self, retriever: Arc<dyn ClipRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn FrameExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn inference(mut self, inference: Arc<dyn InferenceClient>) -> Self {
        self.inference = Some(inference);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Spawns the pipeline; must be called inside a tokio runtime.
    pub fn build(self) -> Result<Coordinator, AppError> {
        let missing = |what: &str| AppError::Coordinator(format!("{} not set", what));
        let source = self.source.ok_or_else(|| missing("Event source"))?;
        let collaborators = Collaborators {
            retriever: self.retriever.ok_or_else(|| missing("Clip retriever"))?,
            extractor: self.extractor.ok_or_else(|| missing("Frame extractor"))?,
            inference: self.inference.ok_or_else(|| missing("Inference client"))?,
            sink: self.sink.ok_or_else(|| missing("Result sink"))?,
        };

        let settings = self.config.current();
        let workers = self.workers.unwrap_or(settings.pipeline.workers);
        if workers == 0 {
            return Err(AppError::Coordinator(
                "At least one worker is required".to_string(),
            ));
        }
        let eviction_interval = self
            .eviction_interval
            .unwrap_or_else(|| settings.pipeline.eviction_interval());

        let orchestrator = Orchestrator::new(self.config, collaborators);
        Ok(Coordinator::start(
            orchestrator,
            source,
            workers,
            eviction_interval,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{RevisionKind, Verdict};
    use crate::config::{Settings, SharedConfig};
    use crate::doubles::{
        ChannelEventSource, RecordingSink, ScriptedInference, ScriptedRetriever, SyntheticDecoder,
    };
    use crate::pipeline::domain::{RuleSet, TaskState};
    use crate::pipeline::extract::{SampledFrameExtractor, SamplingPolicy};

    fn config() -> Arc<SharedConfig> {
        let mut settings = Settings::default();
        settings.filters = RuleSet::new().with_rule("Tuin", ["bird"]);
        Arc::new(SharedConfig::new(settings).unwrap())
    }

    #[tokio::test]
    async fn build_requires_collaborators() {
        let (_tx, source) = ChannelEventSource::channel(4);
        let result = CoordinatorBuilder::new(config())
            .source(Box::new(source))
            .build();
        assert!(matches!(result, Err(AppError::Coordinator(_))));
    }

    #[tokio::test]
    async fn test_coordinator() {
        let (tx, source) = ChannelEventSource::channel(4);
        let sink = Arc::new(RecordingSink::new());
        let mut coordinator = CoordinatorBuilder::new(config())
            .workers(1)
            .eviction_interval(Duration::from_millis(10))
            .source(Box::new(source))
            .retriever(Arc::new(ScriptedRetriever::succeeding(SyntheticDecoder::clip(
                Duration::from_secs(3),
                1,
            ))))
            .extractor(Arc::new(SampledFrameExtractor::new(
                SyntheticDecoder,
                SamplingPolicy::default(),
            )))
            .inference(Arc::new(ScriptedInference::answering(
                Verdict::new(true, 0.85).unwrap(),
            )))
            .sink(sink.clone())
            .build()
            .expect("Failed to build coordinator");

        tx.send(Event::new("e1", "Tuin", "bird", RevisionKind::End))
            .await
            .unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), coordinator.wait())
            .await
            .expect("pipeline did not drain");

        assert_eq!(sink.published().len(), 1);
        let status = coordinator.orchestrator().current_status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].state, TaskState::Succeeded);
        coordinator.shutdown().await;
    }
}

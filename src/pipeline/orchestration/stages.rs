use crate::common::{DetectionResult, Verdict};
use crate::config::PipelineSettings;
use crate::error::{AnalysisError, DownloadError, PublishError};
use crate::pipeline::extract::FrameExtractor;
use crate::pipeline::orchestration::instrument::{StageLog, StageLogLayer};
use crate::pipeline::orchestration::service::{
    AnalysisRequest, ClipService, InferenceService, PublishService,
};
use crate::pipeline::services::{ClipRetriever, InferenceClient, ResultSink};
use bytes::Bytes;
use futures::Future;
use std::sync::Arc;
use std::time::Duration;
use tower::timeout::Timeout;
use tower::timeout::error::Elapsed;
use tower::{BoxError, ServiceBuilder, ServiceExt};

type DownloadStack = StageLog<Timeout<ClipService>>;
type AnalyzeStack = StageLog<Timeout<InferenceService>>;
type PublishStack = StageLog<Timeout<PublishService>>;

/// The external capabilities a pipeline runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub retriever: Arc<dyn ClipRetriever>,
    pub extractor: Arc<dyn FrameExtractor>,
    pub inference: Arc<dyn InferenceClient>,
    pub sink: Arc<dyn ResultSink>,
}

/// Network-facing stages as tower services, each bounded by its own
/// timeout. Calls clone the service and return owned `'static` futures.
#[derive(Clone)]
pub struct StageServices {
    download: DownloadStack,
    analyze: AnalyzeStack,
    publish: PublishStack,
    download_timeout: Duration,
    analysis_timeout: Duration,
    publish_timeout: Duration,
}

impl StageServices {
    pub fn build(collaborators: &Collaborators, settings: &PipelineSettings) -> Self {
        let download_timeout = settings.download_timeout();
        let analysis_timeout = settings.analysis_timeout();
        let publish_timeout = settings.publish_timeout();

        let download = ServiceBuilder::new()
            .layer(StageLogLayer::new("download"))
            .timeout(download_timeout)
            .service(ClipService::new(collaborators.retriever.clone()));
        let analyze = ServiceBuilder::new()
            .layer(StageLogLayer::new("analyze"))
            .timeout(analysis_timeout)
            .service(InferenceService::new(collaborators.inference.clone()));
        let publish = ServiceBuilder::new()
            .layer(StageLogLayer::new("publish"))
            .timeout(publish_timeout)
            .service(PublishService::new(collaborators.sink.clone()));

        Self {
            download,
            analyze,
            publish,
            download_timeout,
            analysis_timeout,
            publish_timeout,
        }
    }

    pub fn download(
        &self,
        event_id: String,
    ) -> impl Future<Output = Result<Bytes, DownloadError>> + Send + 'static {
        let service = self.download.clone();
        let timeout = self.download_timeout;
        let id = event_id.clone();
        async move {
            service.oneshot(event_id).await.map_err(|e| {
                stage_error(e, DownloadError::TimedOut(timeout), |message| {
                    DownloadError::Request {
                        event_id: id,
                        message,
                    }
                })
            })
        }
    }

    pub fn analyze(
        &self,
        request: AnalysisRequest,
    ) -> impl Future<Output = Result<Verdict, AnalysisError>> + Send + 'static {
        let service = self.analyze.clone();
        let timeout = self.analysis_timeout;
        async move {
            service.oneshot(request).await.map_err(|e| {
                stage_error(e, AnalysisError::TimedOut(timeout), AnalysisError::Request)
            })
        }
    }

    pub fn publish(
        &self,
        result: DetectionResult,
    ) -> impl Future<Output = Result<(), PublishError>> + Send + 'static {
        let service = self.publish.clone();
        let timeout = self.publish_timeout;
        async move {
            service.oneshot(result).await.map_err(|e| {
                stage_error(e, PublishError::TimedOut(timeout), PublishError::Transport)
            })
        }
    }
}

/// Recovers the typed stage error from a boxed service error.
fn stage_error<E>(error: BoxError, timed_out: E, other: impl FnOnce(String) -> E) -> E
where
    E: std::error::Error + Send + Sync + 'static,
{
    if error.is::<Elapsed>() {
        return timed_out;
    }
    match error.downcast::<E>() {
        Ok(typed) => *typed,
        Err(error) => other(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doubles::{RecordingSink, ScriptedInference, ScriptedRetriever, SyntheticDecoder};
    use crate::pipeline::extract::{SampledFrameExtractor, SamplingPolicy};

    fn collaborators(retriever: ScriptedRetriever) -> Collaborators {
        Collaborators {
            retriever: Arc::new(retriever),
            extractor: Arc::new(SampledFrameExtractor::new(
                SyntheticDecoder,
                SamplingPolicy::default(),
            )),
            inference: Arc::new(ScriptedInference::answering(Verdict::new(true, 0.5).unwrap())),
            sink: Arc::new(RecordingSink::new()),
        }
    }

    #[tokio::test]
    async fn typed_errors_survive_boxing() {
        let stages = StageServices::build(
            &collaborators(ScriptedRetriever::always_failing()),
            &PipelineSettings::default(),
        );
        let err = stages.download("e1".to_string()).await.unwrap_err();
        assert!(matches!(err, DownloadError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn slow_stage_times_out() {
        let settings = PipelineSettings {
            download_timeout_ms: 20,
            ..PipelineSettings::default()
        };
        let stages = StageServices::build(&collaborators(ScriptedRetriever::hanging()), &settings);
        let err = stages.download("e1".to_string()).await.unwrap_err();
        assert_eq!(err, DownloadError::TimedOut(Duration::from_millis(20)));
    }
}

use crate::common::{DetectionResult, Event};
use crate::config::{ConfigProvider, Settings};
use crate::error::QueueError;
use crate::intake::queue::{Pushed, WorkQueue};
use crate::pipeline::context::{
    Admitted, Analyzed, Downloaded, Extracted, StageTimings, TaskContext,
};
use crate::pipeline::domain::{
    should_process, Admission, AdmissionTicket, DedupTracker, FailureReason, Outcome,
    ProcessingTask, RejectReason, RetryDecision, RetryPolicy, TaskFailure, TaskState,
    TaskSummary,
};
use crate::pipeline::extract::FrameExtractor;
use crate::pipeline::orchestration::registry::TaskRegistry;
use crate::pipeline::orchestration::service::AnalysisRequest;
use crate::pipeline::orchestration::stages::{Collaborators, StageServices};
use chrono::Utc;
use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What `on_event` did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The revision kind does not start tasks.
    Ignored,
    FilteredOut(Uuid),
    Duplicate(RejectReason),
    Queued(Uuid),
}

struct QueuedTask {
    task_id: Uuid,
    event: Event,
    ticket: AdmissionTicket,
}

enum TaskStep {
    Download {
        ctx: TaskContext<Admitted>,
        attempt: u32,
    },
    Extract {
        ctx: TaskContext<Downloaded>,
        attempt: u32,
    },
    Analyze {
        ctx: TaskContext<Extracted>,
        attempt: u32,
    },
    Publish {
        ctx: TaskContext<Analyzed>,
        result: DetectionResult,
        attempt: u32,
    },
    Backoff {
        delay: Duration,
        then: Box<TaskStep>,
    },
    Done(Result<DetectionResult, TaskFailure>),
}

struct Shared {
    config: Arc<dyn ConfigProvider>,
    stages: StageServices,
    extractor: Arc<dyn FrameExtractor>,
    dedup: DedupTracker,
    registry: TaskRegistry,
    queue: WorkQueue<QueuedTask>,
}

/// Sequences filter, dedup and the pipeline stages for every event. Cheap to
/// clone; all clones drive the same queue and registry.
///
/// Queue capacity, worker-facing timeouts, dedup retention and history size
/// are taken from the configuration at construction. Filters, triggers,
/// retry policy, frame budget and prompt are read per event.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub fn new(config: Arc<dyn ConfigProvider>, collaborators: Collaborators) -> Self {
        let settings = config.current();
        let stages = StageServices::build(&collaborators, &settings.pipeline);
        Self {
            shared: Arc::new(Shared {
                stages,
                extractor: collaborators.extractor,
                dedup: DedupTracker::new(settings.pipeline.retention()),
                registry: TaskRegistry::new(settings.pipeline.history_limit),
                queue: WorkQueue::new(settings.intake.queue_capacity, settings.intake.overflow),
                config,
            }),
        }
    }

    /// Filters, deduplicates and enqueues one notification.
    pub async fn on_event(&self, event: Event) -> Result<Dispatch, QueueError> {
        let settings = self.shared.config.current();
        if !settings.intake.triggers_on(event.revision) {
            debug!(event_id = %event.id, revision = %event.revision, "Revision does not trigger analysis");
            return Ok(Dispatch::Ignored);
        }

        let passes = should_process(&event, &settings.filters);
        let task = ProcessingTask::new(event);
        let task_id = task.task_id;

        if !passes {
            info!(
                event_id = %task.event.id,
                camera = %task.event.camera,
                label = %task.event.label,
                "Event did not match any filter"
            );
            self.shared.registry.insert(task);
            self.shared
                .registry
                .advance(task_id, TaskState::FilteredOut, 0);
            return Ok(Dispatch::FilteredOut(task_id));
        }

        let ticket = match self.shared.dedup.try_begin(&task.event.id) {
            Admission::Admitted(ticket) => ticket,
            Admission::Rejected(reason) => {
                debug!(event_id = %task.event.id, ?reason, "Duplicate event revision ignored");
                return Ok(Dispatch::Duplicate(reason));
            }
        };

        info!(
            event_id = %task.event.id,
            %task_id,
            camera = %task.event.camera,
            label = %task.event.label,
            revision = %task.event.revision,
            "Event matched filter, queued for analysis"
        );
        let event = task.event.clone();
        self.shared.registry.insert(task);

        let queued = QueuedTask {
            task_id,
            event,
            ticket,
        };
        match self.shared.queue.push(queued).await {
            Pushed::Accepted => Ok(Dispatch::Queued(task_id)),
            Pushed::Displaced(oldest) => {
                warn!(
                    event_id = %oldest.event.id,
                    task_id = %oldest.task_id,
                    "Work queue full, dropping oldest task"
                );
                self.fail_unstarted(oldest, FailureReason::QueueOverflow, "Evicted from full work queue");
                Ok(Dispatch::Queued(task_id))
            }
            Pushed::Closed(rejected) => {
                self.fail_unstarted(rejected, FailureReason::Aborted, "Work queue closed");
                Err(QueueError::Closed)
            }
        }
    }

    fn fail_unstarted(&self, task: QueuedTask, reason: FailureReason, message: &str) {
        self.shared
            .registry
            .fail(task.task_id, TaskFailure::new(reason, message, 0));
        task.ticket.complete(Outcome::Failed);
    }

    pub fn current_status(&self) -> Vec<TaskSummary> {
        self.shared.registry.snapshot()
    }

    pub fn task(&self, task_id: Uuid) -> Option<TaskSummary> {
        self.shared.registry.get(task_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskSummary> {
        self.shared.registry.subscribe()
    }

    pub fn dedup(&self) -> &DedupTracker {
        &self.shared.dedup
    }

    pub fn evict_expired(&self) -> usize {
        self.shared.dedup.evict(Instant::now())
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Stops intake. Workers finish what is already queued.
    pub fn close(&self) {
        self.shared.queue.close();
    }

    /// Fails everything still waiting in the queue.
    pub fn abort_queued(&self) -> usize {
        let pending = self.shared.queue.drain();
        let count = pending.len();
        for task in pending {
            self.fail_unstarted(task, FailureReason::Aborted, "Shut down before processing");
        }
        count
    }

    pub fn spawn_workers(&self, count: usize, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|worker_id| {
                let orchestrator = self.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { orchestrator.run_worker(worker_id, cancel).await })
            })
            .collect()
    }

    /// Pulls tasks until the queue is closed and empty, or until cancelled.
    pub async fn run_worker(&self, worker_id: usize, cancel: CancellationToken) {
        debug!(worker_id, "Worker started");
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.shared.queue.pop() => next,
            };
            match next {
                Some(task) => self.execute(task, &cancel).await,
                None => break,
            }
        }
        debug!(worker_id, "Worker stopped");
    }

    /// Runs one task in its own tokio task so a panic or an abort only
    /// fails that task.
    async fn execute(&self, task: QueuedTask, cancel: &CancellationToken) {
        let task_id = task.task_id;
        let orchestrator = self.clone();
        let mut handle = tokio::spawn(async move { orchestrator.run_task(task).await });

        let message = tokio::select! {
            joined = &mut handle => match joined {
                Ok(()) => return,
                Err(e) => format!("Task terminated abnormally: {}", e),
            },
            _ = cancel.cancelled() => {
                handle.abort();
                let _ = handle.await;
                "Shut down while in progress".to_string()
            }
        };

        let attempts = self.shared.registry.attempt(task_id);
        error!(%task_id, "{}", message);
        self.shared.registry.fail(
            task_id,
            TaskFailure::new(FailureReason::Aborted, message, attempts),
        );
    }

    async fn run_task(&self, task: QueuedTask) {
        let QueuedTask {
            task_id,
            event,
            ticket,
        } = task;
        let settings = self.shared.config.current();
        let task_timeout = settings.pipeline.task_timeout();
        let event_id = event.id.clone();

        let ctx = TaskContext::new(task_id, event);
        let outcome = match tokio::time::timeout(task_timeout, self.drive(ctx, &settings)).await {
            Ok(Ok(result)) => {
                info!(
                    %event_id,
                    %task_id,
                    detected = result.detected,
                    probability = result.probability,
                    "Event analyzed and published"
                );
                self.shared.registry.succeed(task_id);
                Outcome::Succeeded
            }
            Ok(Err(failure)) => {
                error!(
                    %event_id,
                    %task_id,
                    reason = ?failure.reason,
                    attempts = failure.attempts,
                    "Task failed: {}",
                    failure.message
                );
                self.shared.registry.fail(task_id, failure);
                Outcome::Failed
            }
            Err(_) => {
                let attempts = self.shared.registry.attempt(task_id);
                error!(%event_id, %task_id, timeout = ?task_timeout, "Task timed out");
                self.shared.registry.fail(
                    task_id,
                    TaskFailure::new(
                        FailureReason::Timeout,
                        format!("Task exceeded {:?}", task_timeout),
                        attempts,
                    ),
                );
                Outcome::Failed
            }
        };
        ticket.complete(outcome);
    }

    /// Drives one task through the stages. Retries are self-transitions of
    /// the step machine with a backoff step in between.
    async fn drive(
        &self,
        ctx: TaskContext<Admitted>,
        settings: &Settings,
    ) -> Result<DetectionResult, TaskFailure> {
        let shared = &self.shared;
        let task_id = ctx.task_id();
        let policy = settings.pipeline.retry.policy();
        let mut step = TaskStep::Download { ctx, attempt: 1 };

        loop {
            step = match step {
                TaskStep::Download { ctx, attempt } => {
                    shared.registry.advance(task_id, TaskState::Downloading, attempt);
                    match shared.stages.download(ctx.event().id.clone()).await {
                        Ok(clip) => TaskStep::Extract {
                            ctx: ctx.into_downloaded(clip),
                            attempt,
                        },
                        Err(e) => retry_or_fail(
                            &policy,
                            task_id,
                            attempt,
                            FailureReason::DownloadError,
                            &e,
                            |attempt| TaskStep::Download { ctx, attempt },
                        ),
                    }
                }
                TaskStep::Extract { ctx, attempt } => {
                    shared.registry.advance(task_id, TaskState::Extracting, attempt);
                    let max_frames = settings.pipeline.max_frames;
                    let extracted = shared.extractor.extract(ctx.clip(), max_frames).await;
                    match extracted {
                        Ok(frames) => {
                            debug!(%task_id, frames = frames.len(), "Frames extracted");
                            TaskStep::Analyze {
                                ctx: ctx.into_extracted(frames),
                                attempt: 1,
                            }
                        }
                        Err(e) => TaskStep::Done(Err(TaskFailure::new(
                            FailureReason::ExtractionError,
                            e.to_string(),
                            1,
                        ))),
                    }
                }
                TaskStep::Analyze { ctx, attempt } => {
                    shared.registry.advance(task_id, TaskState::Analyzing, attempt);
                    let request = AnalysisRequest {
                        frames: ctx.shared_frames(),
                        prompt: settings.gemini.prompt.clone(),
                    };
                    match shared.stages.analyze(request).await {
                        Ok(verdict) => {
                            shared.registry.record_verdict(task_id, verdict);
                            let ctx = ctx.into_analyzed(verdict);
                            let result = ctx.result(Utc::now());
                            TaskStep::Publish {
                                ctx,
                                result,
                                attempt: 1,
                            }
                        }
                        Err(e) => retry_or_fail(
                            &policy,
                            task_id,
                            attempt,
                            FailureReason::AnalysisError,
                            &e,
                            |attempt| TaskStep::Analyze { ctx, attempt },
                        ),
                    }
                }
                TaskStep::Publish {
                    ctx,
                    result,
                    attempt,
                } => {
                    shared.registry.advance(task_id, TaskState::Publishing, attempt);
                    match shared.stages.publish(result.clone()).await {
                        Ok(()) => {
                            let timings = ctx.timings();
                            debug!(
                                %task_id,
                                frames = ctx.frame_count(),
                                download_ms = StageTimings::millis(timings.download()),
                                extraction_ms = StageTimings::millis(timings.extraction()),
                                analysis_ms = StageTimings::millis(timings.analysis()),
                                total_ms = ctx.elapsed().as_millis() as u64,
                                "Stage timings"
                            );
                            TaskStep::Done(Ok(result))
                        }
                        Err(e) => retry_or_fail(
                            &policy,
                            task_id,
                            attempt,
                            FailureReason::PublishError,
                            &e,
                            |attempt| TaskStep::Publish {
                                ctx,
                                result,
                                attempt,
                            },
                        ),
                    }
                }
                TaskStep::Backoff { delay, then } => {
                    tokio::time::sleep(delay).await;
                    *then
                }
                TaskStep::Done(outcome) => return outcome,
            };
        }
    }
}

fn retry_or_fail(
    policy: &RetryPolicy,
    task_id: Uuid,
    attempt: u32,
    reason: FailureReason,
    error: &dyn Display,
    retry: impl FnOnce(u32) -> TaskStep,
) -> TaskStep {
    match policy.decide(attempt) {
        RetryDecision::RetryAfter(delay) => {
            warn!(
                %task_id,
                attempt,
                ?reason,
                delay_ms = delay.as_millis() as u64,
                "Stage failed, retrying: {}",
                error
            );
            TaskStep::Backoff {
                delay,
                then: Box::new(retry(attempt + 1)),
            }
        }
        RetryDecision::GiveUp => {
            TaskStep::Done(Err(TaskFailure::new(reason, error.to_string(), attempt)))
        }
    }
}

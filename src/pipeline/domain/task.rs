use crate::common::{Event, Verdict};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskState {
    Queued,
    FilteredOut,
    Downloading,
    Extracting,
    Analyzing,
    Publishing,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::FilteredOut | TaskState::Succeeded | TaskState::Failed
        )
    }

    /// Self-transitions are the retries of the network-facing stages.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Queued, FilteredOut | Downloading | Failed) => true,
            (Downloading, Downloading | Extracting | Failed) => true,
            (Extracting, Analyzing | Failed) => true,
            (Analyzing, Analyzing | Publishing | Failed) => true,
            (Publishing, Publishing | Succeeded | Failed) => true,
            _ => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskState::Queued => "Queued",
            TaskState::FilteredOut => "FilteredOut",
            TaskState::Downloading => "Downloading",
            TaskState::Extracting => "Extracting",
            TaskState::Analyzing => "Analyzing",
            TaskState::Publishing => "Publishing",
            TaskState::Succeeded => "Succeeded",
            TaskState::Failed => "Failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    DownloadError,
    ExtractionError,
    AnalysisError,
    PublishError,
    Timeout,
    QueueOverflow,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskFailure {
    pub reason: FailureReason,
    pub message: String,
    pub attempts: u32,
}

impl TaskFailure {
    pub fn new(reason: FailureReason, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            reason,
            message: message.into(),
            attempts,
        }
    }
}

/// One run of the pipeline for one event revision.
#[derive(Debug, Clone)]
pub struct ProcessingTask {
    pub task_id: Uuid,
    pub event: Event,
    pub state: TaskState,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure: Option<TaskFailure>,
    pub verdict: Option<Verdict>,
}

impl ProcessingTask {
    pub fn new(event: Event) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            event,
            state: TaskState::Queued,
            attempt: 0,
            created_at: Utc::now(),
            completed_at: None,
            failure: None,
            verdict: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            task_id: self.task_id,
            event_id: self.event.id.clone(),
            camera: self.event.camera.clone(),
            label: self.event.label.clone(),
            revision: self.event.revision,
            state: self.state,
            attempt: self.attempt,
            created_at: self.created_at,
            completed_at: self.completed_at,
            failure: self.failure.clone(),
            verdict: self.verdict,
        }
    }
}

/// Read-only view of a task for status consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSummary {
    pub task_id: Uuid,
    pub event_id: String,
    pub camera: String,
    pub label: String,
    pub revision: crate::common::RevisionKind,
    pub state: TaskState,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure: Option<TaskFailure>,
    pub verdict: Option<Verdict>,
}

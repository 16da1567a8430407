use crate::common::Verdict;
use crate::pipeline::domain::{ProcessingTask, TaskFailure, TaskState, TaskSummary};
use chrono::Utc;
use indexmap::IndexMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

const STATUS_CHANNEL_CAPACITY: usize = 256;

/// Every live task plus a bounded history of finished ones, oldest first.
/// Each change is broadcast to status subscribers.
pub struct TaskRegistry {
    tasks: Mutex<IndexMap<Uuid, ProcessingTask>>,
    history_limit: usize,
    updates: broadcast::Sender<TaskSummary>,
}

impl TaskRegistry {
    pub fn new(history_limit: usize) -> Self {
        let (updates, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            tasks: Mutex::new(IndexMap::new()),
            history_limit: history_limit.max(1),
            updates,
        }
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<Uuid, ProcessingTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn announce(&self, summary: TaskSummary) {
        // No subscribers is fine.
        let _ = self.updates.send(summary);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskSummary> {
        self.updates.subscribe()
    }

    pub fn insert(&self, task: ProcessingTask) {
        let summary = task.summary();
        self.lock().insert(task.task_id, task);
        self.announce(summary);
    }

    /// Applies `change` if `next` is a legal successor of the current state.
    /// Illegal transitions are logged and ignored.
    fn update(
        &self,
        task_id: Uuid,
        next: TaskState,
        change: impl FnOnce(&mut ProcessingTask),
    ) -> bool {
        let summary = {
            let mut tasks = self.lock();
            let Some(task) = tasks.get_mut(&task_id) else {
                warn!(%task_id, state = %next, "Transition for unknown task ignored");
                return false;
            };
            if !task.state.can_transition_to(next) {
                warn!(
                    %task_id,
                    from = %task.state,
                    to = %next,
                    "Illegal task transition ignored"
                );
                return false;
            }
            task.state = next;
            change(task);
            if next.is_terminal() {
                task.completed_at = Some(Utc::now());
            }
            let summary = task.summary();
            if next.is_terminal() {
                self.prune(&mut tasks);
            }
            summary
        };
        self.announce(summary);
        true
    }

    fn prune(&self, tasks: &mut IndexMap<Uuid, ProcessingTask>) {
        let mut finished = tasks.values().filter(|t| t.is_terminal()).count();
        while finished > self.history_limit {
            let Some(oldest) = tasks
                .iter()
                .find(|(_, t)| t.is_terminal())
                .map(|(id, _)| *id)
            else {
                break;
            };
            tasks.shift_remove(&oldest);
            finished -= 1;
        }
    }

    pub fn advance(&self, task_id: Uuid, next: TaskState, attempt: u32) -> bool {
        self.update(task_id, next, |task| task.attempt = attempt)
    }

    pub fn record_verdict(&self, task_id: Uuid, verdict: Verdict) {
        if let Some(task) = self.lock().get_mut(&task_id) {
            task.verdict = Some(verdict);
        }
    }

    pub fn succeed(&self, task_id: Uuid) -> bool {
        self.update(task_id, TaskState::Succeeded, |_| {})
    }

    pub fn fail(&self, task_id: Uuid, failure: TaskFailure) -> bool {
        self.update(task_id, TaskState::Failed, |task| {
            task.attempt = task.attempt.max(failure.attempts);
            task.failure = Some(failure);
        })
    }

    pub fn get(&self, task_id: Uuid) -> Option<TaskSummary> {
        self.lock().get(&task_id).map(ProcessingTask::summary)
    }

    pub fn attempt(&self, task_id: Uuid) -> u32 {
        self.lock().get(&task_id).map(|t| t.attempt).unwrap_or(0)
    }

    pub fn snapshot(&self) -> Vec<TaskSummary> {
        self.lock().values().map(ProcessingTask::summary).collect()
    }

    pub fn active_count(&self) -> usize {
        self.lock().values().filter(|t| !t.is_terminal()).count()
    }
}

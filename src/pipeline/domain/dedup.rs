use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    AlreadyActive,
    RecentlyCompleted,
}

#[derive(Debug)]
pub enum Admission {
    Admitted(AdmissionTicket),
    Rejected(RejectReason),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }
}

#[derive(Debug, Clone, Copy)]
enum Entry {
    Active { since: Instant },
    Completed { at: Instant, outcome: Outcome },
}

/// Event ids that are being processed or were processed recently.
///
/// Only ids and timestamps are kept, never event payloads. Every operation
/// runs under a single mutex so `try_begin` is an atomic check-and-set.
#[derive(Debug, Clone)]
pub struct DedupTracker {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    retention: Duration,
}

impl DedupTracker {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admits an unseen (or evicted) id and marks it active.
    pub fn try_begin(&self, event_id: &str) -> Admission {
        let mut entries = self.lock();
        match entries.get(event_id) {
            Some(Entry::Active { .. }) => Admission::Rejected(RejectReason::AlreadyActive),
            Some(Entry::Completed { .. }) => Admission::Rejected(RejectReason::RecentlyCompleted),
            None => {
                entries.insert(
                    event_id.to_string(),
                    Entry::Active {
                        since: Instant::now(),
                    },
                );
                Admission::Admitted(AdmissionTicket {
                    tracker: self.clone(),
                    event_id: event_id.to_string(),
                    completed: false,
                })
            }
        }
    }

    /// Marks an active id as completed. Returns false when the id was not
    /// active, in which case nothing changes.
    pub fn complete(&self, event_id: &str, outcome: Outcome) -> bool {
        let mut entries = self.lock();
        match entries.get_mut(event_id) {
            Some(entry @ Entry::Active { .. }) => {
                if let Entry::Active { since } = *entry {
                    debug!(
                        event_id,
                        ?outcome,
                        active_ms = since.elapsed().as_millis() as u64,
                        "Event id completed"
                    );
                }
                *entry = Entry::Completed {
                    at: Instant::now(),
                    outcome,
                };
                true
            }
            _ => false,
        }
    }

    /// Drops completed entries older than the retention window. Active
    /// entries are never evicted.
    pub fn evict(&self, now: Instant) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| match entry {
            Entry::Active { .. } => true,
            Entry::Completed { at, .. } => now.saturating_duration_since(*at) <= self.retention,
        });
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = entries.len(), "Evicted completed event ids");
        }
        evicted
    }

    pub fn is_active(&self, event_id: &str) -> bool {
        matches!(self.lock().get(event_id), Some(Entry::Active { .. }))
    }

    pub fn outcome(&self, event_id: &str) -> Option<Outcome> {
        match self.lock().get(event_id) {
            Some(Entry::Completed { outcome, .. }) => Some(*outcome),
            _ => None,
        }
    }

    pub fn active_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|entry| matches!(entry, Entry::Active { .. }))
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// The right to complete one admitted id. Consumed by `complete`; if it is
/// dropped instead (panic, abort) the id completes as failed.
#[derive(Debug)]
pub struct AdmissionTicket {
    tracker: DedupTracker,
    event_id: String,
    completed: bool,
}

impl AdmissionTicket {
    pub fn complete(mut self, outcome: Outcome) {
        self.completed = true;
        self.tracker.complete(&self.event_id, outcome);
    }
}

impl Drop for AdmissionTicket {
    fn drop(&mut self) {
        if !self.completed {
            warn!(event_id = %self.event_id, "Admission dropped before completion");
            self.tracker.complete(&self.event_id, Outcome::Failed);
        }
    }
}

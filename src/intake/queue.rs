use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// What a full queue does with a new item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued item to make room.
    #[default]
    DropOldest,
    /// Wait until a worker takes an item.
    Block,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Pushed<T> {
    Accepted,
    /// Accepted, and the oldest item was evicted to make room.
    Displaced(T),
    /// The queue is closed; the item is handed back.
    Closed(T),
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded multi-producer multi-consumer FIFO between intake and workers.
pub struct WorkQueue<T> {
    state: Mutex<State<T>>,
    capacity: usize,
    policy: OverflowPolicy,
    items_available: Notify,
    space_available: Notify,
}

impl<T> WorkQueue<T> {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity: capacity.max(1),
            policy,
            items_available: Notify::new(),
            space_available: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn push(&self, item: T) -> Pushed<T> {
        loop {
            let notified = self.space_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed {
                    return Pushed::Closed(item);
                }
                if state.items.len() < self.capacity {
                    state.items.push_back(item);
                    self.items_available.notify_one();
                    return Pushed::Accepted;
                }
                if self.policy == OverflowPolicy::DropOldest {
                    let displaced = state.items.pop_front();
                    state.items.push_back(item);
                    self.items_available.notify_one();
                    return match displaced {
                        Some(old) => Pushed::Displaced(old),
                        None => Pushed::Accepted,
                    };
                }
            }

            notified.await;
        }
    }

    /// Next item in FIFO order. Returns `None` once the queue is closed and
    /// empty.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.items_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(item) = state.items.pop_front() {
                    self.space_available.notify_one();
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stops accepting items. Queued items can still be popped.
    pub fn close(&self) {
        self.lock().closed = true;
        self.items_available.notify_waiters();
        self.space_available.notify_waiters();
    }

    /// Removes everything still queued.
    pub fn drain(&self) -> Vec<T> {
        let drained: Vec<T> = self.lock().items.drain(..).collect();
        self.space_available.notify_waiters();
        drained
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn pops_in_fifo_order() {
        let queue = WorkQueue::new(4, OverflowPolicy::DropOldest);
        for i in 0..3 {
            assert_eq!(queue.push(i).await, Pushed::Accepted);
        }
        assert_eq!(queue.pop().await, Some(0));
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn drop_oldest_displaces_the_head() {
        let queue = WorkQueue::new(2, OverflowPolicy::DropOldest);
        queue.push("a").await;
        queue.push("b").await;
        assert_eq!(queue.push("c").await, Pushed::Displaced("a"));
        assert_eq!(queue.pop().await, Some("b"));
        assert_eq!(queue.pop().await, Some("c"));
    }

    #[tokio::test]
    async fn block_waits_for_space() {
        let queue = Arc::new(WorkQueue::new(1, OverflowPolicy::Block));
        queue.push(1).await;

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(2).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(queue.pop().await, Some(1));
        let pushed = tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pushed, Pushed::Accepted);
        assert_eq!(queue.pop().await, Some(2));
    }

    #[tokio::test]
    async fn close_wakes_idle_consumers() {
        let queue = Arc::new(WorkQueue::<u32>::new(1, OverflowPolicy::DropOldest));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        let popped = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped, None);
    }

    #[tokio::test]
    async fn closed_queue_hands_items_back_but_drains() {
        let queue = WorkQueue::new(2, OverflowPolicy::DropOldest);
        queue.push(1).await;
        queue.close();
        assert_eq!(queue.push(2).await, Pushed::Closed(2));
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, None);
    }
}

//! Shared FIFO of work items consumed by the worker pool.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Notify;

use crate::job::Job;

/// A job plus its transient attempt counter.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub job: Arc<Job>,
    /// Attempts already made in this run.
    pub attempts: u32,
}

impl WorkItem {
    #[must_use]
    pub fn new(job: Arc<Job>) -> Self {
        Self { job, attempts: 0 }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<WorkItem>,
    closed: bool,
}

/// Closable multi-consumer queue.
///
/// `pop` waits while the queue is open and empty and returns `None` once it
/// is closed and drained.
#[derive(Debug, Default)]
pub(crate) struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl JobQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends to the back. Returns `false` if the queue is closed.
    pub(crate) fn push(&self, item: WorkItem) -> bool {
        {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            state.items.push_back(item);
        }
        self.notify.notify_one();
        true
    }

    pub(crate) async fn pop(&self) -> Option<WorkItem> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking state so a push between the check and
            // the await is not missed.
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Rejects further pushes and wakes every waiting consumer.
    pub(crate) fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Removes and returns everything still queued.
    pub(crate) fn drain(&self) -> Vec<WorkItem> {
        self.lock().items.drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().items.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::job::Category;

    fn item(id: &str) -> WorkItem {
        WorkItem::new(Arc::new(Job::new(
            id,
            format!("https://example.com/{id}"),
            Category::Liked,
            format!("/tmp/{id}.mp4"),
        )))
    }

    #[tokio::test]
    async fn test_queue_is_fifo() {
        let queue = JobQueue::new();
        queue.push(item("a"));
        queue.push(item("b"));
        queue.push(item("c"));

        assert_eq!(queue.pop().await.unwrap().job.id, "a");
        assert_eq!(queue.pop().await.unwrap().job.id, "b");
        assert_eq!(queue.pop().await.unwrap().job.id, "c");
    }

    #[tokio::test]
    async fn test_queue_pop_returns_none_when_closed_and_empty() {
        let queue = JobQueue::new();
        queue.push(item("a"));
        queue.close();

        assert!(queue.pop().await.is_some());
        assert!(queue.pop().await.is_none());
        assert!(!queue.push(item("late")));
    }

    #[tokio::test]
    async fn test_queue_pop_waits_for_push() {
        let queue = Arc::new(JobQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await.map(|item| item.job.id.clone()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.push(item("late"));
        assert_eq!(consumer.await.unwrap().as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_queue_close_wakes_all_waiters() {
        let queue = Arc::new(JobQueue::new());
        let mut waiters = Vec::new();
        for _ in 0..3 {
            let queue = Arc::clone(&queue);
            waiters.push(tokio::spawn(async move { queue.pop().await.is_none() }));
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        for waiter in waiters {
            assert!(tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap());
        }
    }

    #[tokio::test]
    async fn test_queue_drain_empties_queue() {
        let queue = JobQueue::new();
        queue.push(item("a"));
        queue.push(item("b"));

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(queue.len(), 0);
    }
}

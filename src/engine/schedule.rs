//! Time-ordered holding area for jobs waiting out a retry delay.
//!
//! Backoff lives here rather than in a sleeping worker, so a job waiting to
//! be retried never occupies a pool slot.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use tokio::time::Instant;

use super::queue::WorkItem;

#[derive(Debug)]
struct Scheduled {
    eligible_at: Instant,
    /// Tie-breaker keeping equal deadlines in scheduling order.
    seq: u64,
    item: WorkItem,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.eligible_at == other.eligible_at && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed: BinaryHeap is a max-heap and the earliest deadline must win.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .eligible_at
            .cmp(&self.eligible_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
pub(crate) struct RetrySchedule {
    heap: BinaryHeap<Scheduled>,
    next_seq: u64,
}

impl RetrySchedule {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, item: WorkItem, after: Duration) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Scheduled {
            eligible_at: Instant::now() + after,
            seq,
            item,
        });
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|scheduled| scheduled.eligible_at)
    }

    /// Removes every item eligible at `now`, earliest first.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Vec<WorkItem> {
        let mut due = Vec::new();
        while self
            .heap
            .peek()
            .is_some_and(|scheduled| scheduled.eligible_at <= now)
        {
            if let Some(scheduled) = self.heap.pop() {
                due.push(scheduled.item);
            }
        }
        due
    }

    /// Drops all pending retries and returns how many there were.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.heap.len();
        self.heap.clear();
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::job::{Category, Job};

    fn item(id: &str) -> WorkItem {
        WorkItem::new(Arc::new(Job::new(
            id,
            "https://example.com",
            Category::Shared,
            "/tmp/x.mp4",
        )))
    }

    #[tokio::test]
    async fn test_schedule_pops_in_deadline_order() {
        tokio::time::pause();
        let mut schedule = RetrySchedule::new();
        schedule.push(item("slow"), Duration::from_secs(3));
        schedule.push(item("fast"), Duration::from_secs(1));
        schedule.push(item("mid"), Duration::from_secs(2));

        assert!(schedule.pop_due(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_millis(2500)).await;
        let due: Vec<_> = schedule
            .pop_due(Instant::now())
            .into_iter()
            .map(|item| item.job.id.clone())
            .collect();
        assert_eq!(due, vec!["fast", "mid"]);
        assert_eq!(schedule.len(), 1);
    }

    #[tokio::test]
    async fn test_schedule_equal_deadlines_keep_insertion_order() {
        tokio::time::pause();
        let mut schedule = RetrySchedule::new();
        schedule.push(item("first"), Duration::ZERO);
        schedule.push(item("second"), Duration::ZERO);

        let due: Vec<_> = schedule
            .pop_due(Instant::now())
            .into_iter()
            .map(|item| item.job.id.clone())
            .collect();
        assert_eq!(due, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_schedule_next_deadline_and_clear() {
        tokio::time::pause();
        let mut schedule = RetrySchedule::new();
        assert!(schedule.next_deadline().is_none());

        let start = Instant::now();
        schedule.push(item("a"), Duration::from_secs(5));
        schedule.push(item("b"), Duration::from_secs(1));
        assert_eq!(schedule.next_deadline(), Some(start + Duration::from_secs(1)));

        assert_eq!(schedule.clear(), 2);
        assert!(schedule.next_deadline().is_none());
    }
}

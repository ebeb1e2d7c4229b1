//! Time-ordered delayed queue.
//!
//! A min-heap on `execute_at`. The queue is not time-aware; the scheduler's
//! poller decides when to pop. Ties between equal `execute_at` values are
//! broken arbitrarily.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::task::Task;

pub struct DelayQueue {
    heap: BinaryHeap<Reverse<Entry>>,
}

struct Entry(Task);

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.0.execute_at == other.0.execute_at
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.execute_at.cmp(&other.0.execute_at)
    }
}

impl DelayQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    pub fn push(&mut self, task: Task) {
        self.heap.push(Reverse(Entry(task)));
    }

    /// The task with the lowest `execute_at`, without removing it.
    pub fn peek(&self) -> Option<&Task> {
        self.heap.peek().map(|entry| &entry.0 .0)
    }

    /// Remove and return the task with the lowest `execute_at`.
    pub fn pop(&mut self) -> Option<Task> {
        self.heap.pop().map(|entry| entry.0 .0)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl Default for DelayQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::task::{ActivationMail, TaskKind};

    fn task_at(offset_secs: i64) -> Task {
        let now = Utc::now();
        let mut task = Task::new(
            TaskKind::ActivationMail(ActivationMail {
                username: "alice".into(),
                email: "a@example.test".into(),
                activation_url: "https://example.test/a/T1".into(),
            }),
            3,
            now,
        );
        task.execute_at = now + Duration::seconds(offset_secs);
        task
    }

    #[test]
    fn pops_come_out_in_execute_at_order() {
        let mut queue = DelayQueue::new();
        for offset in [40, 5, 90, 0, 17, 63, 5, 28] {
            queue.push(task_at(offset));
        }

        let mut last = None;
        while let Some(task) = queue.pop() {
            if let Some(prev) = last {
                assert!(task.execute_at >= prev, "pop order regressed");
            }
            last = Some(task.execute_at);
        }
    }

    #[test]
    fn peek_does_not_remove() {
        let mut queue = DelayQueue::new();
        queue.push(task_at(10));
        queue.push(task_at(3));

        let lowest = queue.peek().map(|t| t.execute_at);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().map(|t| t.execute_at), lowest);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn empty_queue_yields_nothing() {
        let mut queue = DelayQueue::new();
        assert!(queue.is_empty());
        assert!(queue.peek().is_none());
        assert!(queue.pop().is_none());
    }
}

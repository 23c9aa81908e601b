//! Ordered holding area for submitted but unassigned tasks
//!
//! The queue is FIFO for equal-priority tasks; a higher priority dispatches
//! first and an earlier deadline breaks priority ties. The dispatcher waits
//! on the queue's notifier rather than busy-polling, and only removes a
//! task once a worker has acknowledged the assignment.

use shared::model::Task;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

struct QueueEntry {
    /// Monotonic insertion sequence; preserves FIFO among equal keys.
    seq: u64,
    task: Task,
}

struct QueueInner {
    entries: VecDeque<QueueEntry>,
    next_seq: u64,
}

/// Thread-safe task queue with a condition-variable style notifier.
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                entries: VecDeque::new(),
                next_seq: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Inserts a task in dispatch order: priority descending, then deadline
    /// ascending, then submission order.
    pub async fn enqueue(&self, task: Task) {
        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let position = inner
            .entries
            .iter()
            .position(|existing| {
                existing.task.priority < task.priority
                    || (existing.task.priority == task.priority
                        && existing.task.deadline > task.deadline)
            })
            .unwrap_or(inner.entries.len());

        debug!(task_id = %task.id, position, "Enqueued task");
        inner.entries.insert(position, QueueEntry { seq, task });
        drop(inner);
        self.notify.notify_one();
    }

    /// Removes and returns the head task, or `None` when empty.
    ///
    /// The dispatcher itself uses peek-then-remove so a task is only taken
    /// out once a worker has acknowledged it.
    #[allow(dead_code)]
    pub async fn dequeue(&self) -> Option<Task> {
        let mut inner = self.inner.lock().await;
        inner.entries.pop_front().map(|e| e.task)
    }

    /// Clone of the head task without removing it.
    pub async fn peek(&self) -> Option<Task> {
        let inner = self.inner.lock().await;
        inner.entries.front().map(|e| e.task.clone())
    }

    /// Removes a task wherever it sits in the queue. Returns it if present.
    pub async fn remove(&self, task_id: &str) -> Option<Task> {
        let mut inner = self.inner.lock().await;
        let position = inner.entries.iter().position(|e| e.task.id == task_id)?;
        inner.entries.remove(position).map(|e| e.task)
    }

    /// Current queue length.
    pub async fn len(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Waits until the queue is (probably) non-empty or the backoff elapses.
    ///
    /// The backoff arm covers notifications that fired before the caller
    /// started waiting; the caller re-checks emptiness either way.
    pub async fn wait_for_task(&self, backoff: Duration) {
        if !self.is_empty().await {
            return;
        }
        tokio::select! {
            _ = self.notify.notified() => {}
            _ = tokio::time::sleep(backoff) => {}
        }
    }

    /// Drains every queued task, used during shutdown and in tests.
    pub async fn drain(&self) -> Vec<Task> {
        let mut inner = self.inner.lock().await;
        inner.entries.drain(..).map(|e| e.task).collect()
    }
}

//! In-memory task table and streamed log accumulation
//!
//! The task table is the authoritative record of every task the master has
//! seen this run. Status transitions are validated against the lifecycle
//! DAG here, so no caller can move a task backwards or out of a terminal
//! state. The persistent store mirrors this table best-effort and rebuilds
//! it at startup.

use shared::model::{Task, TaskStatus};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Errors surfaced by task table operations.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TaskTableError {
    #[error("task '{0}' is not known")]
    UnknownTask(String),

    #[error("invalid status transition {from} -> {to} for task '{task_id}'")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
}

/// Authoritative in-memory map of tasks keyed by id.
pub struct TaskTable {
    inner: RwLock<HashMap<String, Task>>,
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskTable {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts or replaces a task record.
    pub async fn insert(&self, task: Task) {
        let mut inner = self.inner.write().await;
        inner.insert(task.id.clone(), task);
    }

    /// Clone of a task record.
    pub async fn get(&self, task_id: &str) -> Option<Task> {
        let inner = self.inner.read().await;
        inner.get(task_id).cloned()
    }

    /// Tasks filtered by status, or all tasks when `status` is `None`.
    /// Sorted by arrival time for stable listings.
    pub async fn list(&self, status: Option<TaskStatus>) -> Vec<Task> {
        let inner = self.inner.read().await;
        let mut tasks: Vec<Task> = inner
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| {
            a.arrival_time
                .cmp(&b.arrival_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        tasks
    }

    /// Validated status transition. Terminal timestamps are stamped here.
    /// Returns the updated record.
    pub async fn transition(
        &self,
        task_id: &str,
        next: TaskStatus,
        now: u64,
    ) -> Result<Task, TaskTableError> {
        let mut inner = self.inner.write().await;
        let task = inner
            .get_mut(task_id)
            .ok_or_else(|| TaskTableError::UnknownTask(task_id.to_string()))?;

        if !task.status.can_transition(next) {
            return Err(TaskTableError::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.status,
                to: next,
            });
        }

        debug!(task_id = %task_id, from = %task.status, to = %next, "Task status transition");
        task.status = next;
        if next.is_terminal() {
            task.completed_at = Some(now);
        }
        if next == TaskStatus::Queued {
            // Re-enqueued after a refused dispatch; the old assignment no
            // longer holds.
            task.assigned_worker = None;
            task.assigned_at = None;
        }
        Ok(task.clone())
    }

    /// Moves a queued task to `assigned` and records the chosen worker.
    pub async fn set_assigned(
        &self,
        task_id: &str,
        worker_id: &str,
        now: u64,
    ) -> Result<Task, TaskTableError> {
        let mut inner = self.inner.write().await;
        let task = inner
            .get_mut(task_id)
            .ok_or_else(|| TaskTableError::UnknownTask(task_id.to_string()))?;

        if !task.status.can_transition(TaskStatus::Assigned) {
            return Err(TaskTableError::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.status,
                to: TaskStatus::Assigned,
            });
        }

        task.status = TaskStatus::Assigned;
        task.assigned_worker = Some(worker_id.to_string());
        task.assigned_at = Some(now);
        Ok(task.clone())
    }

    /// Marks a task failed with a machine-readable reason, stepping through
    /// the DAG from whatever non-terminal state it is in.
    pub async fn mark_failed(
        &self,
        task_id: &str,
        reason: &str,
        now: u64,
    ) -> Result<Task, TaskTableError> {
        let mut inner = self.inner.write().await;
        let task = inner
            .get_mut(task_id)
            .ok_or_else(|| TaskTableError::UnknownTask(task_id.to_string()))?;

        if !task.status.can_transition(TaskStatus::Failed) {
            return Err(TaskTableError::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.status,
                to: TaskStatus::Failed,
            });
        }

        task.status = TaskStatus::Failed;
        task.failure_reason = Some(reason.to_string());
        task.completed_at = Some(now);
        Ok(task.clone())
    }

    /// Bumps the dispatch retry counter and returns the new value.
    pub async fn increment_retry(&self, task_id: &str) -> Result<u32, TaskTableError> {
        let mut inner = self.inner.write().await;
        let task = inner
            .get_mut(task_id)
            .ok_or_else(|| TaskTableError::UnknownTask(task_id.to_string()))?;
        task.retry_count += 1;
        Ok(task.retry_count)
    }

}

/// Bounded accumulation of streamed log chunks per task.
///
/// Workers stream container output while a task runs; the buffer is capped
/// so a chatty container cannot exhaust master memory. Whatever accumulated
/// is merged into the result record at completion and the buffer released.
pub struct LogStore {
    inner: RwLock<HashMap<String, LogBuffer>>,
    cap_bytes: usize,
}

struct LogBuffer {
    text: String,
    truncated: bool,
}

impl LogStore {
    pub fn new(cap_bytes: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            cap_bytes,
        }
    }

    /// Appends a decoded chunk to the task's buffer, respecting the cap.
    /// Returns false when the chunk was dropped because the buffer is full.
    pub async fn append(&self, task_id: &str, chunk: &str) -> bool {
        let mut inner = self.inner.write().await;
        let buffer = inner.entry(task_id.to_string()).or_insert(LogBuffer {
            text: String::new(),
            truncated: false,
        });

        if buffer.truncated {
            return false;
        }

        let room = self.cap_bytes.saturating_sub(buffer.text.len());
        if chunk.len() <= room {
            buffer.text.push_str(chunk);
            true
        } else {
            let mut cut = room;
            while cut > 0 && !chunk.is_char_boundary(cut) {
                cut -= 1;
            }
            buffer.text.push_str(&chunk[..cut]);
            buffer.truncated = true;
            false
        }
    }

    /// Current buffered text for a task.
    pub async fn get(&self, task_id: &str) -> Option<(String, bool)> {
        let inner = self.inner.read().await;
        inner.get(task_id).map(|b| (b.text.clone(), b.truncated))
    }

    /// Removes and returns the buffer, called when a task terminates.
    pub async fn take(&self, task_id: &str) -> Option<(String, bool)> {
        let mut inner = self.inner.write().await;
        inner.remove(task_id).map(|b| (b.text, b.truncated))
    }
}

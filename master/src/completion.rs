//! Completion handling: applies terminal task outcomes
//!
//! Invoked when a worker reports a terminal status (or when a control-plane
//! cancellation comes back through the same path). Each step is idempotent
//! and ordered: status transition first, result record second, reservation
//! release third, runtime-estimate update fourth, SLA outcome last.
//! Duplicate reports for a task are acknowledged and ignored after the
//! first.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use shared::api::CompletionRequest;
use shared::model::{truncate_log_text, TaskResult, TaskStatus, LOG_TRUNCATION_MARKER};

use crate::database::MasterDatabase;
use crate::registry::{RegistryError, WorkerRegistry};
use crate::tasks::{LogStore, TaskTable};
use crate::tau::TauStore;

/// How a completion report was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// First report for this task; state was updated
    Applied,
    /// The task was already terminal; report acknowledged and ignored
    Duplicate,
}

/// Errors surfaced to the RPC layer.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("task '{0}' is not known")]
    UnknownTask(String),

    #[error("status '{0}' is not terminal")]
    NotTerminal(TaskStatus),
}

/// Applies task outcomes reported by workers.
pub struct CompletionHandler {
    table: Arc<TaskTable>,
    registry: Arc<WorkerRegistry>,
    tau: Arc<TauStore>,
    logs: Arc<LogStore>,
    database: Arc<Mutex<MasterDatabase>>,
    log_cap_bytes: usize,
}

impl CompletionHandler {
    pub fn new(
        table: Arc<TaskTable>,
        registry: Arc<WorkerRegistry>,
        tau: Arc<TauStore>,
        logs: Arc<LogStore>,
        database: Arc<Mutex<MasterDatabase>>,
        log_cap_bytes: usize,
    ) -> Self {
        Self {
            table,
            registry,
            tau,
            logs,
            database,
            log_cap_bytes,
        }
    }

    /// Processes one completion report.
    pub async fn handle(
        &self,
        report: CompletionRequest,
        now: u64,
    ) -> Result<CompletionOutcome, CompletionError> {
        if !report.status.is_terminal() {
            return Err(CompletionError::NotTerminal(report.status));
        }

        let task = self
            .table
            .get(&report.task_id)
            .await
            .ok_or_else(|| CompletionError::UnknownTask(report.task_id.clone()))?;

        // First writer wins: a second report for an already-terminal task is
        // acknowledged without touching anything.
        if task.status.is_terminal() {
            debug!(
                task_id = %report.task_id,
                status = %task.status,
                "Duplicate completion report ignored"
            );
            return Ok(CompletionOutcome::Duplicate);
        }

        // A report can arrive while the task is still `assigned` when the
        // worker raced the dispatcher's running transition; step through the
        // DAG rather than rejecting the report.
        if task.status == TaskStatus::Assigned {
            if let Err(e) = self
                .table
                .transition(&report.task_id, TaskStatus::Running, now)
                .await
            {
                warn!(task_id = %report.task_id, error = %e, "Could not advance assigned task to running");
            }
        }

        // Step 1: terminal status transition, then persist.
        let updated = self
            .table
            .transition(&report.task_id, report.status, now)
            .await
            .map_err(|e| {
                warn!(task_id = %report.task_id, error = %e, "Completion transition rejected");
                CompletionError::UnknownTask(report.task_id.clone())
            })?;
        self.persist_task_record(&updated).await;

        // Step 2: result record. Streamed chunks come first, then whatever
        // the final report carried, all under the configured cap.
        let result = self.build_result(&report, now).await;
        {
            let mut db = self.database.lock().await;
            if let Err(e) = db.insert_result(&result).await {
                error!(task_id = %report.task_id, error = %e, "Failed to persist result record");
            }
        }

        // Step 3: release the reservation and the worker's assignment slot.
        match self.registry.release(&report.task_id).await {
            Ok(_) => {}
            Err(RegistryError::UnknownReservation(_)) => {
                // Already released (e.g. an expired reservation the scrubber
                // evicted); idempotency demands this is fine.
            }
            Err(e) => {
                warn!(task_id = %report.task_id, error = %e, "Reservation release failed");
            }
        }

        // Step 4: runtime estimate update, successful completions only.
        if report.status == TaskStatus::Completed {
            if let Some(assigned_at) = updated.assigned_at {
                let observed = now.saturating_sub(assigned_at) as f64;
                let new_tau = self.tau.update(updated.task_type, observed).await;
                let mut db = self.database.lock().await;
                if let Err(e) = db.upsert_tau(updated.task_type, new_tau).await {
                    error!(task_id = %report.task_id, error = %e, "Failed to persist runtime estimate");
                }
            } else {
                warn!(
                    task_id = %report.task_id,
                    "Completed task has no assignment timestamp, skipping estimate update"
                );
            }
        }

        // Step 5: SLA outcome for downstream training, best-effort.
        if let Some(assigned_at) = updated.assigned_at {
            let observed = now.saturating_sub(assigned_at) as f64;
            let budget = updated.sla_budget_seconds();
            let met = report.status == TaskStatus::Completed && observed <= budget;
            let mut db = self.database.lock().await;
            if let Err(e) = db
                .record_sla_outcome(&report.task_id, met, observed, budget, now)
                .await
            {
                debug!(task_id = %report.task_id, error = %e, "SLA outcome write failed");
            }
        }

        info!(
            task_id = %report.task_id,
            worker_id = %report.worker_id,
            status = %report.status,
            exit_code = report.exit_code,
            "Task completion applied"
        );
        Ok(CompletionOutcome::Applied)
    }

    /// Merges streamed log chunks with the report's log text and truncates
    /// to the configured cap.
    async fn build_result(&self, report: &CompletionRequest, now: u64) -> TaskResult {
        let (mut text, mut truncated) = self
            .logs
            .take(&report.task_id)
            .await
            .unwrap_or((String::new(), false));

        if !truncated && !report.log_text.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&report.log_text);
        }

        let (mut text, cut) = truncate_log_text(&text, self.log_cap_bytes);
        truncated = truncated || cut;
        if truncated && !text.ends_with(LOG_TRUNCATION_MARKER) {
            text.push_str(LOG_TRUNCATION_MARKER);
        }

        TaskResult {
            task_id: report.task_id.clone(),
            worker_id: report.worker_id.clone(),
            status: report.status,
            exit_code: report.exit_code,
            log_text: text,
            log_truncated: truncated,
            completed_at: now,
        }
    }

    async fn persist_task_record(&self, task: &shared::model::Task) {
        let mut db = self.database.lock().await;
        if let Err(e) = db.upsert_task(task).await {
            error!(task_id = %task.id, error = %e, "Failed to persist task record");
        }
    }
}

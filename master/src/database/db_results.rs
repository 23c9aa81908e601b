//! Result collection and SLA outcomes
//!
//! One result row per task, first writer wins. SLA outcome rows are
//! best-effort writes consumed by the offline parameter trainer.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use shared::model::{TaskResult, TaskStatus};

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS results (
            task_id TEXT PRIMARY KEY,
            worker_id TEXT NOT NULL,
            status TEXT NOT NULL,
            exit_code INTEGER NOT NULL,
            log_text TEXT NOT NULL DEFAULT '',
            log_truncated INTEGER NOT NULL DEFAULT 0,
            completed_at INTEGER NOT NULL
        )
        "#,
        [],
    )
    .context("Failed to create results table")?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS sla_outcomes (
            task_id TEXT PRIMARY KEY,
            met INTEGER NOT NULL,
            observed_seconds REAL NOT NULL,
            budget_seconds REAL NOT NULL,
            recorded_at INTEGER NOT NULL
        )
        "#,
        [],
    )
    .context("Failed to create sla_outcomes table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_completed ON results(completed_at)",
        [],
    )?;

    Ok(())
}

/// First writer wins: duplicate completion reports must not overwrite the
/// original result.
pub fn insert(conn: &Connection, result: &TaskResult) -> Result<()> {
    conn.execute(
        r#"
        INSERT OR IGNORE INTO results (
            task_id, worker_id, status, exit_code, log_text, log_truncated,
            completed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            result.task_id,
            result.worker_id,
            result.status.as_str(),
            result.exit_code,
            result.log_text,
            result.log_truncated as i64,
            result.completed_at as i64,
        ],
    )
    .with_context(|| format!("Failed to insert result for task {}", result.task_id))?;
    Ok(())
}

pub fn get(conn: &Connection, task_id: &str) -> Result<Option<TaskResult>> {
    let result = conn
        .query_row(
            r#"
            SELECT task_id, worker_id, status, exit_code, log_text,
                   log_truncated, completed_at
            FROM results WHERE task_id = ?1
            "#,
            params![task_id],
            |row| {
                let status_str: String = row.get(2)?;
                Ok(TaskResult {
                    task_id: row.get(0)?,
                    worker_id: row.get(1)?,
                    status: TaskStatus::parse(&status_str).unwrap_or(TaskStatus::Failed),
                    exit_code: row.get(3)?,
                    log_text: row.get(4)?,
                    log_truncated: row.get::<_, i64>(5)? != 0,
                    completed_at: row.get::<_, i64>(6)? as u64,
                })
            },
        )
        .optional()?;
    Ok(result)
}

pub fn record_sla_outcome(
    conn: &Connection,
    task_id: &str,
    met: bool,
    observed_seconds: f64,
    budget_seconds: f64,
    recorded_at: u64,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT OR IGNORE INTO sla_outcomes (
            task_id, met, observed_seconds, budget_seconds, recorded_at
        ) VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            task_id,
            met as i64,
            observed_seconds,
            budget_seconds,
            recorded_at as i64,
        ],
    )
    .with_context(|| format!("Failed to record SLA outcome for task {}", task_id))?;
    Ok(())
}

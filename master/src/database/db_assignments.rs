//! Assignment collection
//!
//! One row per dispatch decision, including the worker load observed at
//! dispatch time. These rows feed the offline parameter trainer.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use shared::model::AssignmentRecord;

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS assignments (
            assignment_id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL,
            worker_id TEXT NOT NULL,
            assigned_at INTEGER NOT NULL,
            worker_load REAL NOT NULL DEFAULT 0,
            UNIQUE(task_id, worker_id, assigned_at)
        )
        "#,
        [],
    )
    .context("Failed to create assignments table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_worker ON assignments(worker_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_task ON assignments(task_id)",
        [],
    )?;

    Ok(())
}

pub fn insert(
    conn: &Connection,
    assignment_id: &str,
    task_id: &str,
    worker_id: &str,
    assigned_at: u64,
    worker_load: f64,
) -> Result<()> {
    // A retried dispatch in the same second replays the same composite key;
    // ignore rather than error.
    conn.execute(
        r#"
        INSERT OR IGNORE INTO assignments (
            assignment_id, task_id, worker_id, assigned_at, worker_load
        ) VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![assignment_id, task_id, worker_id, assigned_at as i64, worker_load],
    )
    .with_context(|| format!("Failed to insert assignment for task {}", task_id))?;
    Ok(())
}

pub fn query_by_worker(conn: &Connection, worker_id: &str) -> Result<Vec<AssignmentRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT assignment_id, task_id, worker_id, assigned_at, worker_load
        FROM assignments
        WHERE worker_id = ?1
        ORDER BY assigned_at ASC
        "#,
    )?;
    let rows = stmt.query_map(params![worker_id], |row| {
        Ok(AssignmentRecord {
            assignment_id: row.get(0)?,
            task_id: row.get(1)?,
            worker_id: row.get(2)?,
            assigned_at: row.get::<_, i64>(3)? as u64,
            worker_load: row.get(4)?,
        })
    })?;
    let assignments = rows.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(assignments)
}

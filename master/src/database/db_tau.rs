//! Runtime estimate collection
//!
//! One smoothed estimate per task type, reloaded into the tau store at
//! startup so learning survives restarts.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use shared::model::TaskType;
use shared::utils::current_timestamp;

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS tau_values (
            task_type TEXT PRIMARY KEY,
            tau_seconds REAL NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
        [],
    )
    .context("Failed to create tau_values table")?;
    Ok(())
}

pub fn upsert(conn: &Connection, task_type: TaskType, tau_seconds: f64) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO tau_values (task_type, tau_seconds, updated_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(task_type) DO UPDATE SET
            tau_seconds = excluded.tau_seconds,
            updated_at = excluded.updated_at
        "#,
        params![
            task_type.as_str(),
            tau_seconds,
            current_timestamp() as i64
        ],
    )
    .with_context(|| format!("Failed to upsert tau value for {}", task_type))?;
    Ok(())
}

pub fn load_all(conn: &Connection) -> Result<Vec<(TaskType, f64)>> {
    let mut stmt = conn.prepare("SELECT task_type, tau_seconds FROM tau_values")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
    })?;

    let mut values = Vec::new();
    for row in rows {
        let (type_str, tau) = row?;
        // Unknown type strings from an older schema are skipped, not fatal.
        if let Some(task_type) = TaskType::parse(&type_str) {
            values.push((task_type, tau));
        }
    }
    Ok(values)
}

//! Task collection
//!
//! Every task ever submitted, mirrored from the in-memory task table.
//! `queued` rows are reloaded into the queue at startup.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use shared::model::{ResourceSpec, Task, TaskStatus, TaskType};

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            task_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            image TEXT NOT NULL,
            command_json TEXT NOT NULL DEFAULT '[]',
            cpu_cores REAL NOT NULL,
            memory_gb REAL NOT NULL,
            storage_gb REAL NOT NULL,
            gpu_units REAL NOT NULL,
            requested_type TEXT,
            task_type TEXT NOT NULL,
            sla_multiplier REAL NOT NULL,
            tau_seconds REAL NOT NULL,
            arrival_time INTEGER NOT NULL,
            deadline REAL NOT NULL,
            status TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            retry_count INTEGER NOT NULL DEFAULT 0,
            assigned_worker TEXT,
            assigned_at INTEGER,
            completed_at INTEGER,
            failure_reason TEXT,
            updated_at INTEGER NOT NULL
        )
        "#,
        [],
    )
    .context("Failed to create tasks table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks(user_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_arrival ON tasks(arrival_time)",
        [],
    )?;

    Ok(())
}

pub fn upsert(conn: &Connection, task: &Task) -> Result<()> {
    let command_json = serde_json::to_string(&task.command)?;
    let now = shared::utils::current_timestamp();

    conn.execute(
        r#"
        INSERT INTO tasks (
            task_id, user_id, image, command_json,
            cpu_cores, memory_gb, storage_gb, gpu_units,
            requested_type, task_type, sla_multiplier, tau_seconds,
            arrival_time, deadline, status, priority, retry_count,
            assigned_worker, assigned_at, completed_at, failure_reason,
            updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                  ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)
        ON CONFLICT(task_id) DO UPDATE SET
            status = excluded.status,
            retry_count = excluded.retry_count,
            assigned_worker = excluded.assigned_worker,
            assigned_at = excluded.assigned_at,
            completed_at = excluded.completed_at,
            failure_reason = excluded.failure_reason,
            updated_at = excluded.updated_at
        "#,
        params![
            task.id,
            task.user_id,
            task.image,
            command_json,
            task.resources.cpu_cores,
            task.resources.memory_gb,
            task.resources.storage_gb,
            task.resources.gpu_units,
            task.requested_type,
            task.task_type.as_str(),
            task.sla_multiplier,
            task.tau_seconds,
            task.arrival_time as i64,
            task.deadline,
            task.status.as_str(),
            task.priority,
            task.retry_count,
            task.assigned_worker,
            task.assigned_at.map(|v| v as i64),
            task.completed_at.map(|v| v as i64),
            task.failure_reason,
            now as i64,
        ],
    )
    .with_context(|| format!("Failed to upsert task {}", task.id))?;

    Ok(())
}

pub fn get(conn: &Connection, task_id: &str) -> Result<Option<Task>> {
    let task = conn
        .query_row(
            "SELECT * FROM tasks WHERE task_id = ?1",
            params![task_id],
            row_to_task,
        )
        .optional()?;
    Ok(task)
}

pub fn query_by_status(conn: &Connection, status: TaskStatus) -> Result<Vec<Task>> {
    let mut stmt =
        conn.prepare("SELECT * FROM tasks WHERE status = ?1 ORDER BY arrival_time ASC")?;
    let rows = stmt.query_map(params![status.as_str()], row_to_task)?;
    let tasks = rows.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tasks)
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let command_json: String = row.get("command_json")?;
    let command: Vec<String> = serde_json::from_str(&command_json).unwrap_or_default();

    let task_type_str: String = row.get("task_type")?;
    let status_str: String = row.get("status")?;

    Ok(Task {
        id: row.get("task_id")?,
        user_id: row.get("user_id")?,
        image: row.get("image")?,
        command,
        resources: ResourceSpec {
            cpu_cores: row.get("cpu_cores")?,
            memory_gb: row.get("memory_gb")?,
            storage_gb: row.get("storage_gb")?,
            gpu_units: row.get("gpu_units")?,
        },
        requested_type: row.get("requested_type")?,
        task_type: TaskType::parse(&task_type_str).unwrap_or(TaskType::Mixed),
        sla_multiplier: row.get("sla_multiplier")?,
        tau_seconds: row.get("tau_seconds")?,
        arrival_time: row.get::<_, i64>("arrival_time")? as u64,
        deadline: row.get("deadline")?,
        status: TaskStatus::parse(&status_str).unwrap_or(TaskStatus::Failed),
        priority: row.get("priority")?,
        retry_count: row.get("retry_count")?,
        assigned_worker: row.get("assigned_worker")?,
        assigned_at: row.get::<_, Option<i64>>("assigned_at")?.map(|v| v as u64),
        completed_at: row.get::<_, Option<i64>>("completed_at")?.map(|v| v as u64),
        failure_reason: row.get("failure_reason")?,
    })
}

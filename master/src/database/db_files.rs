//! Artifact metadata collection
//!
//! One row per completed artifact upload; the bytes live on disk under the
//! file store.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use crate::files::StoredFile;

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS task_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_path TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            uploaded_at INTEGER NOT NULL,
            UNIQUE(task_id, file_name)
        )
        "#,
        [],
    )
    .context("Failed to create task_files table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_task_files_task ON task_files(task_id)",
        [],
    )?;

    Ok(())
}

pub fn insert(conn: &Connection, file: &StoredFile, now: u64) -> Result<()> {
    // Re-uploads replace the metadata row for the same (task, name) pair.
    conn.execute(
        r#"
        INSERT INTO task_files (
            task_id, user_id, file_name, file_path, size_bytes, uploaded_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(task_id, file_name) DO UPDATE SET
            file_path = excluded.file_path,
            size_bytes = excluded.size_bytes,
            uploaded_at = excluded.uploaded_at
        "#,
        params![
            file.task_id,
            file.user_id,
            file.file_name,
            file.file_path,
            file.size_bytes as i64,
            now as i64,
        ],
    )
    .with_context(|| format!("Failed to insert file metadata for task {}", file.task_id))?;
    Ok(())
}

pub fn query_by_task(conn: &Connection, task_id: &str) -> Result<Vec<StoredFile>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT task_id, user_id, file_name, file_path, size_bytes
        FROM task_files
        WHERE task_id = ?1
        ORDER BY file_name ASC
        "#,
    )?;
    let rows = stmt.query_map(params![task_id], |row| {
        Ok(StoredFile {
            task_id: row.get(0)?,
            user_id: row.get(1)?,
            file_name: row.get(2)?,
            file_path: row.get(3)?,
            size_bytes: row.get::<_, i64>(4)? as u64,
        })
    })?;
    let files = rows.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(files)
}

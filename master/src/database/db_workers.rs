//! Worker collection
//!
//! Pre-registered worker ids and the capacities they reported at their
//! last attach. Loaded into the registry (inactive) at startup.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use shared::model::ResourceSpec;

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS workers (
            worker_id TEXT PRIMARY KEY,
            address TEXT NOT NULL DEFAULT '',
            cpu_total REAL NOT NULL DEFAULT 0,
            memory_total REAL NOT NULL DEFAULT 0,
            storage_total REAL NOT NULL DEFAULT 0,
            gpu_total REAL NOT NULL DEFAULT 0,
            registered_at INTEGER NOT NULL,
            last_attached INTEGER
        )
        "#,
        [],
    )
    .context("Failed to create workers table")?;

    Ok(())
}

/// Registers a worker id, or refreshes the stored address for an existing
/// one.
pub fn upsert(conn: &Connection, worker_id: &str, address: &str, now: u64) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO workers (worker_id, address, registered_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(worker_id) DO UPDATE SET address = excluded.address
        "#,
        params![worker_id, address, now as i64],
    )
    .with_context(|| format!("Failed to upsert worker {}", worker_id))?;
    Ok(())
}

/// Records the capacities reported when the worker attached.
pub fn update_capacity(
    conn: &Connection,
    worker_id: &str,
    total: &ResourceSpec,
    now: u64,
) -> Result<()> {
    conn.execute(
        r#"
        UPDATE workers
        SET cpu_total = ?1, memory_total = ?2, storage_total = ?3,
            gpu_total = ?4, last_attached = ?5
        WHERE worker_id = ?6
        "#,
        params![
            total.cpu_cores,
            total.memory_gb,
            total.storage_gb,
            total.gpu_units,
            now as i64,
            worker_id,
        ],
    )
    .with_context(|| format!("Failed to update capacity for worker {}", worker_id))?;
    Ok(())
}

/// All registered (worker_id, address) pairs.
pub fn load_all(conn: &Connection) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare("SELECT worker_id, address FROM workers ORDER BY worker_id")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    let workers = rows.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(workers)
}

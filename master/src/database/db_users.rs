//! User collection
//!
//! Minimal owner records, upserted on task submission.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id TEXT PRIMARY KEY,
            first_seen INTEGER NOT NULL,
            last_seen INTEGER NOT NULL,
            tasks_submitted INTEGER NOT NULL DEFAULT 0
        )
        "#,
        [],
    )
    .context("Failed to create users table")?;
    Ok(())
}

pub fn upsert(conn: &Connection, user_id: &str, now: u64) -> Result<()> {
    let updated = conn.execute(
        r#"
        UPDATE users
        SET last_seen = ?1, tasks_submitted = tasks_submitted + 1
        WHERE user_id = ?2
        "#,
        params![now as i64, user_id],
    )?;

    if updated == 0 {
        conn.execute(
            r#"
            INSERT INTO users (user_id, first_seen, last_seen, tasks_submitted)
            VALUES (?1, ?2, ?2, 1)
            "#,
            params![user_id, now as i64],
        )
        .with_context(|| format!("Failed to insert user {}", user_id))?;
    }
    Ok(())
}

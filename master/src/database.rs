//! Database management for the orchestration master
//!
//! This module handles SQLite operations for the durable mirror of control
//! plane state: tasks, workers, assignments, results, runtime estimates,
//! users, and artifact metadata. The in-memory components stay
//! authoritative while serving; the store is read back only at startup.
//! SQLite keeps the master self-contained; larger deployments could swap
//! this module for a server-grade database behind the same surface.

// Collection-specific database modules
mod db_assignments;
mod db_files;
mod db_results;
mod db_tasks;
mod db_tau;
mod db_users;
mod db_workers;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use shared::model::{AssignmentRecord, Task, TaskResult, TaskStatus, TaskType};

use crate::files::StoredFile;

/// The default name for the master's database file.
const DATABASE_FILE: &str = "master_state.db";

/// Manages the SQLite database for the master.
/// This struct encapsulates the database connection and all related
/// operations, providing a high-level API to the rest of the application.
pub struct MasterDatabase {
    /// The path to the SQLite database file.
    db_path: PathBuf,
    /// The active database connection. `Option` allows lazy initialization
    /// and explicit close.
    connection: Option<Connection>,
}

impl MasterDatabase {
    /// Creates a new `MasterDatabase` manager.
    /// It ensures that the directory for the database file exists.
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir).with_context(|| {
                format!("Failed to create data directory: {}", data_dir.display())
            })?;
        }

        let db_path = data_dir.join(DATABASE_FILE);

        Ok(Self {
            db_path,
            connection: None,
        })
    }

    /// Initializes the database by creating tables and indexes if they
    /// don't exist. Idempotent and safe to call on every startup.
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing master database at {}", self.db_path.display());

        let conn = self.get_connection()?;

        db_users::create_table(conn)?;
        db_workers::create_table(conn)?;
        db_tasks::create_table(conn)?;
        db_assignments::create_table(conn)?;
        db_results::create_table(conn)?;
        db_tau::create_table(conn)?;
        db_files::create_table(conn)?;

        info!("Master database initialization complete");
        Ok(())
    }

    /// Lazily gets a mutable reference to the database connection, creating
    /// it if needed.
    pub fn get_connection(&mut self) -> Result<&mut Connection> {
        if self.connection.is_none() {
            let conn = Connection::open(&self.db_path)
                .with_context(|| format!("Failed to open database: {}", self.db_path.display()))?;

            // WAL mode is good for concurrency.
            conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
                .context("Failed to enable WAL mode")?;

            // Checkpoint automatically when WAL reaches 1000 pages (~4MB).
            conn.query_row("PRAGMA wal_autocheckpoint=1000", [], |_| Ok(()))
                .context("Failed to set WAL auto-checkpoint")?;

            conn.execute("PRAGMA foreign_keys=ON", [])
                .context("Failed to enable foreign key constraints")?;

            // Reduce lock errors under concurrent access.
            conn.busy_timeout(std::time::Duration::from_secs(30))
                .context("Failed to set busy timeout")?;

            self.connection = Some(conn);
        }
        Ok(self
            .connection
            .as_mut()
            .expect("Database connection should exist after initialization in get_connection()"))
    }

    /// Runs a manual WAL checkpoint, returning the number of checkpointed
    /// frames.
    pub async fn checkpoint_wal(&mut self) -> Result<u64> {
        let conn = self.get_connection()?;
        let (_busy, _log, checkpointed): (i64, i64, i64) = conn.query_row(
            "PRAGMA wal_checkpoint(TRUNCATE)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(checkpointed.max(0) as u64)
    }

    /// Closes the connection explicitly, used during graceful shutdown.
    pub async fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            if let Err((_, e)) = conn.close() {
                debug!("Error closing database connection: {}", e);
            }
        }
    }

    // ---- tasks -----------------------------------------------------------

    /// Inserts or updates a task record.
    pub async fn upsert_task(&mut self, task: &Task) -> Result<()> {
        let conn = self.get_connection()?;
        db_tasks::upsert(conn, task)
    }

    /// Loads one task by id.
    pub async fn get_task(&mut self, task_id: &str) -> Result<Option<Task>> {
        let conn = self.get_connection()?;
        db_tasks::get(conn, task_id)
    }

    /// Tasks matching a status, ordered by arrival time.
    pub async fn query_tasks_by_status(&mut self, status: TaskStatus) -> Result<Vec<Task>> {
        let conn = self.get_connection()?;
        db_tasks::query_by_status(conn, status)
    }

    // ---- assignments -----------------------------------------------------

    pub async fn insert_assignment(
        &mut self,
        assignment_id: &str,
        task_id: &str,
        worker_id: &str,
        assigned_at: u64,
        worker_load: f64,
    ) -> Result<()> {
        let conn = self.get_connection()?;
        db_assignments::insert(conn, assignment_id, task_id, worker_id, assigned_at, worker_load)
    }

    #[allow(dead_code)]
    pub async fn assignments_by_worker(
        &mut self,
        worker_id: &str,
    ) -> Result<Vec<AssignmentRecord>> {
        let conn = self.get_connection()?;
        db_assignments::query_by_worker(conn, worker_id)
    }

    // ---- results ---------------------------------------------------------

    /// Stores a result record. The first record for a task wins; replays
    /// are ignored.
    pub async fn insert_result(&mut self, result: &TaskResult) -> Result<()> {
        let conn = self.get_connection()?;
        db_results::insert(conn, result)
    }

    pub async fn get_result(&mut self, task_id: &str) -> Result<Option<TaskResult>> {
        let conn = self.get_connection()?;
        db_results::get(conn, task_id)
    }

    /// Records whether a task met its SLA, for the offline trainer.
    pub async fn record_sla_outcome(
        &mut self,
        task_id: &str,
        met: bool,
        observed_seconds: f64,
        budget_seconds: f64,
        recorded_at: u64,
    ) -> Result<()> {
        let conn = self.get_connection()?;
        db_results::record_sla_outcome(
            conn,
            task_id,
            met,
            observed_seconds,
            budget_seconds,
            recorded_at,
        )
    }

    // ---- workers ---------------------------------------------------------

    /// Registers or updates a worker row.
    pub async fn upsert_worker(
        &mut self,
        worker_id: &str,
        address: &str,
        now: u64,
    ) -> Result<()> {
        let conn = self.get_connection()?;
        db_workers::upsert(conn, worker_id, address, now)
    }

    /// Records the capacities a worker reported at attach.
    pub async fn update_worker_capacity(
        &mut self,
        worker_id: &str,
        total: &shared::model::ResourceSpec,
        now: u64,
    ) -> Result<()> {
        let conn = self.get_connection()?;
        db_workers::update_capacity(conn, worker_id, total, now)
    }

    /// All pre-registered workers, loaded into the registry at startup.
    pub async fn load_preregistered_workers(&mut self) -> Result<Vec<(String, String)>> {
        let conn = self.get_connection()?;
        db_workers::load_all(conn)
    }

    // ---- runtime estimates ----------------------------------------------

    pub async fn upsert_tau(&mut self, task_type: TaskType, tau_seconds: f64) -> Result<()> {
        let conn = self.get_connection()?;
        db_tau::upsert(conn, task_type, tau_seconds)
    }

    pub async fn load_tau_values(&mut self) -> Result<Vec<(TaskType, f64)>> {
        let conn = self.get_connection()?;
        db_tau::load_all(conn)
    }

    // ---- users -----------------------------------------------------------

    pub async fn upsert_user(&mut self, user_id: &str, now: u64) -> Result<()> {
        let conn = self.get_connection()?;
        db_users::upsert(conn, user_id, now)
    }

    // ---- artifact metadata ----------------------------------------------

    pub async fn insert_file_metadata(&mut self, file: &StoredFile, now: u64) -> Result<()> {
        let conn = self.get_connection()?;
        db_files::insert(conn, file, now)
    }

    #[allow(dead_code)]
    pub async fn files_for_task(&mut self, task_id: &str) -> Result<Vec<StoredFile>> {
        let conn = self.get_connection()?;
        db_files::query_by_task(conn, task_id)
    }
}

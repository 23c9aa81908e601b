//! Shared data structures and utilities for the task orchestration system
//!
//! This crate contains the domain model, wire types, configuration
//! structures, and utilities used by the master control plane and by the
//! worker-facing wire contract.

pub mod api;
pub mod config;
pub mod defaults;
pub mod model;
pub mod utils;

// Re-export commonly used types for convenience
pub use api::ApiResponse;
pub use config::MasterConfig;
pub use model::{ResourceSpec, Task, TaskStatus, TaskType, TelemetrySample, WorkerInfo};
pub use utils::{current_timestamp, validate_worker_id};

/// Result type alias used throughout the shared crate
pub type Result<T> = anyhow::Result<T>;

/// Common error types for the orchestration system
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Scheduling error: {0}")]
    Scheduling(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests;

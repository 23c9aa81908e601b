//! Configuration types and validation for the task orchestration system
//!
//! This module defines the master configuration structure loaded from
//! master.toml, with validation logic and environment-variable overrides.

use crate::defaults::*;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Environment variable names recognized by [`MasterConfig::apply_env_overrides`].
pub mod env_vars {
    /// Overrides `data_dir` (database and file store location)
    pub const DATA_DIR: &str = "MASTER_DATA_DIR";
    /// Overrides `params_file`
    pub const PARAMS_FILE: &str = "MASTER_PARAMS_FILE";
    /// Overrides `listen_address`
    pub const LISTEN_ADDRESS: &str = "MASTER_LISTEN_ADDRESS";
    /// Overrides `worker_inactive_timeout_seconds`
    pub const WORKER_INACTIVE_TIMEOUT: &str = "MASTER_WORKER_INACTIVE_TIMEOUT_SECONDS";
    /// Overrides `dispatch_retry_limit`
    pub const DISPATCH_RETRY_LIMIT: &str = "MASTER_DISPATCH_RETRY_LIMIT";
}

/// Main master configuration loaded from master.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MasterConfig {
    /// Address and port for the HTTP API (e.g. "0.0.0.0:8650")
    pub listen_address: String,
    /// Pre-shared secret key workers must present in X-API-Key
    pub api_key: String,

    // Storage
    /// Directory holding the SQLite database and the task file store
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    // Scheduler parameters
    /// Path to the scheduler parameter JSON file
    #[serde(default = "default_params_file")]
    pub params_file: String,
    /// How often to re-read the parameter file in seconds (default: 30)
    #[serde(default = "default_params_reload_interval")]
    pub params_reload_interval_seconds: u64,

    // Worker liveness
    /// Seconds without a heartbeat before a worker is marked inactive
    /// (default: 30)
    #[serde(default = "default_worker_inactive_timeout")]
    pub worker_inactive_timeout_seconds: u64,

    // Dispatch behavior
    /// Failed dispatch attempts before a task is marked failed (default: 3)
    #[serde(default = "default_dispatch_retry_limit")]
    pub dispatch_retry_limit: u32,
    /// Timeout for the AssignTask RPC in seconds (default: 10)
    #[serde(default = "default_dispatch_rpc_timeout")]
    pub dispatch_rpc_timeout_seconds: u64,
    /// Margin added to the RPC timeout for the initial reservation TTL
    /// (default: 30)
    #[serde(default = "default_reservation_margin")]
    pub reservation_margin_seconds: u64,
    /// Reservation TTL once a worker has accepted the task (default: 3600)
    #[serde(default = "default_running_reservation_ttl")]
    pub running_reservation_ttl_seconds: u64,
    /// Dispatcher backoff when no worker can take the head task in
    /// milliseconds (default: 500)
    #[serde(default = "default_queue_poll_backoff_ms")]
    pub queue_poll_backoff_ms: u64,

    // Telemetry pipeline
    /// Bounded per-worker sample queue capacity (default: 100)
    #[serde(default = "default_telemetry_channel_capacity")]
    pub telemetry_channel_capacity: usize,
    /// Rolling window length for load accounting in samples (default: 60)
    #[serde(default = "default_telemetry_window_samples")]
    pub telemetry_window_samples: usize,
    /// Outbound channel capacity per subscriber (default: 64)
    #[serde(default = "default_subscriber_channel_capacity")]
    pub subscriber_channel_capacity: usize,
    /// Seconds a subscriber may stay blocked before being dropped
    /// (default: 5)
    #[serde(default = "default_subscriber_grace")]
    pub subscriber_grace_seconds: u64,

    // Results
    /// Cap on stored log text per task in bytes (default: 65536)
    #[serde(default = "default_log_truncate_bytes")]
    pub log_truncate_bytes: usize,

    // Background maintenance
    /// Cadence of the stale-worker / expired-reservation scrubber in
    /// seconds (default: 5)
    #[serde(default = "default_scrubber_interval")]
    pub scrubber_interval_seconds: u64,
    /// WAL checkpoint interval in seconds (default: 60)
    #[serde(default = "default_wal_checkpoint_interval")]
    pub wal_checkpoint_interval_seconds: u64,

    // Shutdown behavior
    /// Wall-clock budget for graceful shutdown in seconds (default: 30)
    #[serde(default = "default_graceful_shutdown_timeout")]
    pub graceful_shutdown_timeout_seconds: u64,

    // Rate limiting
    #[serde(default = "default_rate_limit_enabled")]
    pub rate_limit_enabled: bool,
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_seconds: u32,
    #[serde(default = "default_rate_limit_max_requests")]
    pub rate_limit_max_requests: usize,

    // Runtime estimation
    /// Exponential smoothing factor applied to observed runtimes
    /// (default: 0.2)
    #[serde(default = "default_tau_smoothing")]
    pub tau_smoothing_factor: f64,
}

impl MasterConfig {
    /// Parses a master.toml document.
    pub fn from_toml_str(content: &str) -> crate::Result<MasterConfig> {
        let config: MasterConfig = toml::from_str(content)
            .map_err(|e| crate::OrchestratorError::Config(format!("Invalid master.toml: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates field values after parsing and after overrides.
    pub fn validate(&self) -> crate::Result<()> {
        self.listen_address.parse::<SocketAddr>().map_err(|e| {
            crate::OrchestratorError::Config(format!(
                "Invalid listen address '{}': {}",
                self.listen_address, e
            ))
        })?;

        if self.api_key.is_empty() {
            return Err(crate::OrchestratorError::Config(
                "api_key must not be empty".to_string(),
            )
            .into());
        }
        if self.worker_inactive_timeout_seconds == 0 {
            return Err(crate::OrchestratorError::Config(
                "worker_inactive_timeout_seconds must be positive".to_string(),
            )
            .into());
        }
        if self.dispatch_rpc_timeout_seconds == 0 {
            return Err(crate::OrchestratorError::Config(
                "dispatch_rpc_timeout_seconds must be positive".to_string(),
            )
            .into());
        }
        if self.telemetry_channel_capacity == 0 {
            return Err(crate::OrchestratorError::Config(
                "telemetry_channel_capacity must be positive".to_string(),
            )
            .into());
        }
        if self.telemetry_window_samples == 0 {
            return Err(crate::OrchestratorError::Config(
                "telemetry_window_samples must be positive".to_string(),
            )
            .into());
        }
        if !(0.0..=1.0).contains(&self.tau_smoothing_factor) {
            return Err(crate::OrchestratorError::Config(format!(
                "tau_smoothing_factor must be in [0, 1], got {}",
                self.tau_smoothing_factor
            ))
            .into());
        }
        Ok(())
    }

    /// Applies environment-variable overrides on top of the file values.
    ///
    /// Precedence is handled by the caller: CLI flags beat these, these beat
    /// the file. Unparsable numeric values are rejected rather than ignored.
    pub fn apply_env_overrides(&mut self) -> crate::Result<()> {
        if let Ok(v) = std::env::var(env_vars::DATA_DIR) {
            if !v.is_empty() {
                self.data_dir = v;
            }
        }
        if let Ok(v) = std::env::var(env_vars::PARAMS_FILE) {
            if !v.is_empty() {
                self.params_file = v;
            }
        }
        if let Ok(v) = std::env::var(env_vars::LISTEN_ADDRESS) {
            if !v.is_empty() {
                self.listen_address = v;
            }
        }
        if let Ok(v) = std::env::var(env_vars::WORKER_INACTIVE_TIMEOUT) {
            self.worker_inactive_timeout_seconds = v.parse().map_err(|e| {
                crate::OrchestratorError::Config(format!(
                    "{} must be an integer: {}",
                    env_vars::WORKER_INACTIVE_TIMEOUT,
                    e
                ))
            })?;
        }
        if let Ok(v) = std::env::var(env_vars::DISPATCH_RETRY_LIMIT) {
            self.dispatch_retry_limit = v.parse().map_err(|e| {
                crate::OrchestratorError::Config(format!(
                    "{} must be an integer: {}",
                    env_vars::DISPATCH_RETRY_LIMIT,
                    e
                ))
            })?;
        }
        self.validate()
    }
}

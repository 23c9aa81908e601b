//! Default values for configuration parameters
//!
//! This module centralizes all default value functions used by the
//! configuration structures. These functions are used by serde when
//! deserializing configuration files that don't specify certain optional
//! fields.

// Master configuration defaults

/// Default data directory for the database and file store
pub fn default_data_dir() -> String {
    "./data".to_string()
}

/// Default scheduler parameter file path
pub fn default_params_file() -> String {
    "./data/scheduler_params.json".to_string()
}

/// Default scheduler parameter reload cadence (30 seconds)
pub fn default_params_reload_interval() -> u64 {
    30
}

/// Default worker inactivity timeout (30 seconds without a heartbeat)
pub fn default_worker_inactive_timeout() -> u64 {
    30
}

/// Default bound on dispatch retries before a task is failed (3 attempts)
pub fn default_dispatch_retry_limit() -> u32 {
    3
}

/// Default timeout for the AssignTask RPC to a worker (10 seconds)
pub fn default_dispatch_rpc_timeout() -> u64 {
    10
}

/// Default margin added to the dispatch timeout for the reservation TTL
/// (30 seconds)
pub fn default_reservation_margin() -> u64 {
    30
}

/// Default reservation TTL once a worker has accepted a task (1 hour)
pub fn default_running_reservation_ttl() -> u64 {
    3600
}

/// Default dispatcher backoff when no worker is available (500 ms)
pub fn default_queue_poll_backoff_ms() -> u64 {
    500
}

/// Default per-worker telemetry channel capacity (100 samples)
pub fn default_telemetry_channel_capacity() -> usize {
    100
}

/// Default rolling window used for load accounting (60 samples)
pub fn default_telemetry_window_samples() -> usize {
    60
}

/// Default outbound channel capacity per telemetry subscriber
pub fn default_subscriber_channel_capacity() -> usize {
    64
}

/// Default grace period before a blocked subscriber is dropped (5 seconds)
pub fn default_subscriber_grace() -> u64 {
    5
}

/// Default cap on stored log text per task (64 KB)
pub fn default_log_truncate_bytes() -> usize {
    65536
}

/// Default cadence of the stale-worker / expired-reservation scrubber
/// (5 seconds)
pub fn default_scrubber_interval() -> u64 {
    5
}

/// Default WAL checkpoint interval (60 seconds / 1 minute)
pub fn default_wal_checkpoint_interval() -> u64 {
    60
}

/// Default graceful shutdown timeout for the master (30 seconds)
pub fn default_graceful_shutdown_timeout() -> u64 {
    30
}

/// Default rate limiting enabled flag
pub fn default_rate_limit_enabled() -> bool {
    true
}

/// Default rate limit window (60 seconds)
pub fn default_rate_limit_window() -> u32 {
    60
}

/// Default maximum requests per rate limit window per worker
pub fn default_rate_limit_max_requests() -> usize {
    600
}

/// Default exponential smoothing factor for runtime estimates
pub fn default_tau_smoothing() -> f64 {
    0.2
}

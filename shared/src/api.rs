//! API types and structures for control-plane communication
//!
//! This module defines the request and response bodies used on the wire
//! between workers and the master, plus the user-facing task endpoints.
//! All payloads are JSON.

use serde::{Deserialize, Serialize};

use crate::model::{ResourceSpec, RunningTask, TaskStatus, WorkerInfo};

/// Generic API response wrapper used by endpoints that return no payload
/// beyond a status line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Create a successful API response
    pub fn success(data: T) -> Self {
        Self {
            status: "success".to_string(),
            data: Some(data),
            error: None,
        }
    }

    /// Create an error API response
    pub fn error(error_message: String) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(error_message),
        }
    }
}

/// Request body for POST /api/v1/workers/register
///
/// Sent by a worker when it connects. Registration succeeds only for worker
/// ids that an operator pre-registered on the master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorkerRequest {
    pub worker_id: String,
    /// Base URL the master uses for assignment and cancellation RPCs
    pub address: String,
    /// Total capacity of the worker host
    pub total: ResourceSpec,
    #[serde(default)]
    pub worker_version: Option<String>,
}

/// Response body for POST /api/v1/workers/register
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorkerResponse {
    pub status: String,
    pub message: String,
}

/// Request body for POST /api/v1/heartbeat
///
/// The master stamps the ingestion timestamp itself; workers only report
/// utilization and the running container set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub gpu_percent: f64,
    #[serde(default)]
    pub running_tasks: Vec<RunningTask>,
}

/// Response body for POST /api/v1/heartbeat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub status: String,
}

impl HeartbeatResponse {
    pub fn ack() -> Self {
        Self {
            status: "success".to_string(),
        }
    }
}

/// Request body for POST /api/v1/tasks/logs
///
/// One chunk of container log output, gzip-compressed and base64-encoded.
/// Chunks carry a sequence number so per-task order survives retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogChunkRequest {
    pub task_id: String,
    pub worker_id: String,
    pub seq: u64,
    /// Base64-encoded gzipped log bytes
    pub data: String,
}

/// Request body for POST /api/v1/tasks/files
///
/// One chunk of a task artifact. Stored under files/{user}/{task_id}/ on
/// the master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChunkRequest {
    pub task_id: String,
    pub worker_id: String,
    pub user_id: String,
    pub file_name: String,
    pub seq: u64,
    /// Base64-encoded gzipped file bytes
    pub data: String,
    /// True on the final chunk of the file
    #[serde(default)]
    pub eof: bool,
}

/// Response body for POST /api/v1/tasks/files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChunkResponse {
    pub status: String,
    pub accepted: bool,
}

/// Request body for POST /api/v1/completions
///
/// Terminal report for a task. Duplicate reports for the same task id are
/// acknowledged and ignored after the first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub task_id: String,
    pub worker_id: String,
    /// completed, failed, or cancelled
    pub status: TaskStatus,
    pub exit_code: i32,
    #[serde(default)]
    pub log_text: String,
}

/// Response body for POST /api/v1/completions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub status: String,
    /// False when the report was a duplicate of an earlier one
    pub applied: bool,
}

/// Request body the master POSTs to a worker's assign endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignTaskRequest {
    pub task_id: String,
    pub user_id: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    pub resources: ResourceSpec,
    /// Absolute deadline (Unix seconds, fractional)
    pub deadline: f64,
}

/// Worker's answer to an assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignAck {
    pub accepted: bool,
    #[serde(default)]
    pub message: String,
}

/// Request body the master POSTs to a worker's cancel endpoint.
///
/// The worker stops the container gracefully (SIGTERM, then SIGKILL after a
/// bounded wait) and reports `cancelled` through the completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelTaskRequest {
    pub task_id: String,
}

/// Request body for POST /api/v1/tasks (user task submission)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTaskRequest {
    pub user_id: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    pub resources: ResourceSpec,
    /// Optional type hint; anything outside the vocabulary is ignored and
    /// the type is inferred from resources instead
    #[serde(default)]
    pub task_type: Option<String>,
    /// Optional SLA multiplier; out-of-range values fall back to the default
    #[serde(default)]
    pub sla_multiplier: Option<f64>,
    #[serde(default)]
    pub priority: i32,
}

/// Response body for POST /api/v1/tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTaskResponse {
    pub status: String,
    pub task_id: String,
    pub task_type: String,
    pub tau_seconds: f64,
    pub deadline: f64,
}

/// One worker row in GET /api/v1/workers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSummary {
    #[serde(flatten)]
    pub info: WorkerInfo,
    /// Latest normalized load from telemetry, if any sample has arrived
    pub load: Option<f64>,
    /// Running container count from the latest heartbeat
    pub running_tasks: usize,
}

/// Request body for POST /api/v1/admin/workers (operator pre-registration)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreRegisterWorkerRequest {
    pub worker_id: String,
    #[serde(default)]
    pub address: String,
}

/// HTTP headers used for authentication and metadata
pub mod headers {
    pub const API_KEY: &str = "X-API-Key";
    pub const WORKER_ID: &str = "X-Worker-Id";
    pub const CONTENT_TYPE: &str = "Content-Type";
}

/// Master API endpoint paths
pub mod endpoints {
    pub const HEALTH: &str = "/health";
    pub const REGISTER_WORKER: &str = "/api/v1/workers/register";
    pub const HEARTBEAT: &str = "/api/v1/heartbeat";
    pub const TASK_LOGS: &str = "/api/v1/tasks/logs";
    pub const TASK_FILES: &str = "/api/v1/tasks/files";
    pub const COMPLETIONS: &str = "/api/v1/completions";
    pub const TASKS: &str = "/api/v1/tasks";
    pub const WORKERS: &str = "/api/v1/workers";
    pub const ADMIN_WORKERS: &str = "/api/v1/admin/workers";
}

/// Endpoint paths the master calls on a worker's address
pub mod worker_endpoints {
    pub const ASSIGN: &str = "/api/v1/assign";
    pub const CANCEL: &str = "/api/v1/cancel";
}

//! REST/RPC surface of the orchestration master
//!
//! This module provides the HTTP endpoints workers use to register, send
//! heartbeats, stream logs, upload artifacts, and report completions, plus
//! the user-facing task submission and observation endpoints. Each public
//! function corresponds to an endpoint; handlers validate, touch the owning
//! component, and return structured JSON. No RPC failure crosses this
//! boundary as a panic; everything maps to a status.

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use shared::{
    api::{
        endpoints, headers, CompletionRequest, FileChunkRequest, FileChunkResponse,
        HeartbeatRequest, LogChunkRequest, PreRegisterWorkerRequest, RegisterWorkerRequest,
        RegisterWorkerResponse, SubmitTaskRequest, SubmitTaskResponse, WorkerSummary,
    },
    config::MasterConfig,
    model::{Task, TaskStatus, TaskType, TelemetrySample},
    utils::{current_timestamp, decompress_payload, validate_worker_address, validate_worker_id},
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::completion::{CompletionError, CompletionHandler, CompletionOutcome};
use crate::database::MasterDatabase;
use crate::files::FileStore;
use crate::queue::TaskQueue;
use crate::registry::{RegistryError, WorkerRegistry};
use crate::tasks::{LogStore, TaskTable};
use crate::tau::TauStore;
use crate::telemetry::TelemetryManager;
use crate::worker_client::{HttpWorkerClient, WorkerRpc};

/// Simple rate limiter per worker ID
///
/// Tracks request timestamps per worker and enforces rate limits based on
/// a sliding window. Old requests outside the time window are cleaned up
/// lazily and by the scrubber.
pub struct WorkerRateLimiter {
    /// Map of worker ID to list of request timestamps
    limits: Arc<RwLock<HashMap<String, Vec<Instant>>>>,
    /// Time window for rate limiting
    window: Duration,
    /// Maximum number of requests allowed within the window
    max_requests: usize,
}

impl WorkerRateLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            limits: Arc::new(RwLock::new(HashMap::new())),
            window,
            max_requests,
        }
    }

    /// Check if a request is allowed for the given worker
    pub async fn check_rate_limit(&self, worker_id: &str) -> Result<(), ApiError> {
        let now = Instant::now();
        let mut limits = self.limits.write().await;

        let requests = limits.entry(worker_id.to_string()).or_default();
        requests.retain(|&time| now.duration_since(time) < self.window);

        if requests.len() >= self.max_requests {
            warn!(
                worker_id = %worker_id,
                count = requests.len(),
                max = self.max_requests,
                "Rate limit exceeded"
            );
            return Err(ApiError::TooManyRequests);
        }

        requests.push(now);
        Ok(())
    }

    /// Remove entries for workers that haven't sent requests within the
    /// window. Prevents unbounded growth from workers that appear once.
    pub async fn cleanup_stale_entries(&self) {
        let mut limits = self.limits.write().await;
        let now = Instant::now();

        let before_count = limits.len();
        limits.retain(|_, timestamps| {
            timestamps.retain(|&time| now.duration_since(time) < self.window);
            !timestamps.is_empty()
        });
        let removed = before_count.saturating_sub(limits.len());

        if removed > 0 {
            debug!(
                removed_workers = removed,
                remaining_workers = limits.len(),
                "Cleaned up stale rate limiter entries"
            );
        }
    }
}

impl Clone for WorkerRateLimiter {
    fn clone(&self) -> Self {
        Self {
            limits: Arc::clone(&self.limits),
            window: self.window,
            max_requests: self.max_requests,
        }
    }
}

/// Application state shared across all API handlers
#[derive(Clone)]
pub struct AppState {
    /// Master configuration
    pub config: Arc<MasterConfig>,
    /// Per-worker rate limiter
    pub rate_limiter: WorkerRateLimiter,
    /// Worker registry and reservation ledger
    pub registry: Arc<WorkerRegistry>,
    /// Pending task queue
    pub queue: Arc<TaskQueue>,
    /// Authoritative in-memory task table
    pub table: Arc<TaskTable>,
    /// Telemetry pipeline
    pub telemetry: Arc<TelemetryManager>,
    /// Runtime estimate store
    pub tau: Arc<TauStore>,
    /// Streamed log accumulation
    pub logs: Arc<LogStore>,
    /// Task artifact storage
    pub files: Arc<FileStore>,
    /// Completion handler
    pub completion: Arc<CompletionHandler>,
    /// Durable store
    pub database: Arc<tokio::sync::Mutex<MasterDatabase>>,
    /// Outbound RPC client for cancellations
    pub worker_client: Arc<HttpWorkerClient>,
}

/// Creates the main API router and defines all the application's routes.
/// Called once at master startup to build the routing tree.
pub fn create_router(state: AppState) -> Router {
    // Maximum request body size: 10MB
    // Prevents memory exhaustion from oversized payloads
    const MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024;

    Router::new()
        // Unauthenticated liveness probe for load balancers and
        // orchestrators.
        .route(endpoints::HEALTH, get(health_check))
        // Worker-facing control-plane RPC surface.
        .route(endpoints::REGISTER_WORKER, post(handle_register_worker))
        .route(endpoints::HEARTBEAT, post(handle_heartbeat))
        .route(endpoints::TASK_LOGS, post(handle_task_logs))
        .route(endpoints::TASK_FILES, post(handle_task_files))
        .route(endpoints::COMPLETIONS, post(handle_completion))
        // User-facing task surface.
        .route(
            endpoints::TASKS,
            post(handle_submit_task).get(handle_list_tasks),
        )
        .route("/api/v1/tasks/{task_id}", get(handle_get_task))
        .route("/api/v1/tasks/{task_id}/cancel", post(handle_cancel_task))
        .route("/api/v1/tasks/{task_id}/logs", get(handle_get_task_logs))
        // Fleet observation and administration.
        .route(endpoints::WORKERS, get(handle_list_workers))
        .route(
            "/api/v1/workers/{worker_id}/telemetry",
            get(handle_worker_telemetry),
        )
        .route(endpoints::ADMIN_WORKERS, post(handle_preregister_worker))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_SIZE))
        .with_state(state)
}

/// Helper function to validate the API key from request headers
///
/// Uses constant-time comparison to prevent timing attacks that could
/// allow an attacker to deduce the API key character-by-character.
fn validate_api_key(headers: &HeaderMap, expected_key: &str) -> Result<(), ApiError> {
    use subtle::ConstantTimeEq;

    let provided_key = match headers.get(headers::API_KEY) {
        Some(key) => match key.to_str() {
            Ok(key_str) => key_str,
            Err(_) => {
                warn!("Invalid API key format in header");
                return Err(ApiError::Unauthorized);
            }
        },
        None => {
            warn!("Missing API key header");
            return Err(ApiError::Unauthorized);
        }
    };

    if provided_key.is_empty() {
        warn!("Empty API key provided");
        return Err(ApiError::Unauthorized);
    }

    let provided_bytes = provided_key.as_bytes();
    let expected_bytes = expected_key.as_bytes();

    let keys_match = provided_bytes.len() == expected_bytes.len()
        && bool::from(provided_bytes.ct_eq(expected_bytes));

    if !keys_match {
        warn!("Invalid API key provided");
        return Err(ApiError::Unauthorized);
    }

    Ok(())
}

/// Maps worker id validation onto the API error space.
fn check_worker_id(worker_id: &str) -> Result<(), ApiError> {
    validate_worker_id(worker_id).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// The handler for the `/health` endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "task-orchestration-master",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// RegisterWorker: a pre-registered worker connects and reports capacity.
async fn handle_register_worker(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RegisterWorkerRequest>,
) -> Result<Json<RegisterWorkerResponse>, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;
    check_worker_id(&request.worker_id)?;
    validate_worker_address(&request.address)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let now = current_timestamp();
    match state
        .registry
        .attach(&request.worker_id, &request.address, request.total, now)
        .await
    {
        Ok(()) => {}
        Err(RegistryError::NotAuthorized(_)) => {
            warn!(
                worker_id = %request.worker_id,
                "Rejected registration from non-pre-registered worker"
            );
            return Err(ApiError::Forbidden(
                "Worker ID is not pre-registered".to_string(),
            ));
        }
        Err(e) => {
            return Err(ApiError::Internal(format!("Registration failed: {}", e)));
        }
    }

    state.telemetry.attach_worker(&request.worker_id).await;

    // Durable mirror of the attach, best-effort.
    {
        let mut db = state.database.lock().await;
        if let Err(e) = db
            .upsert_worker(&request.worker_id, &request.address, now)
            .await
        {
            error!(worker_id = %request.worker_id, error = %e, "Failed to persist worker");
        }
        if let Err(e) = db
            .update_worker_capacity(&request.worker_id, &request.total, now)
            .await
        {
            error!(worker_id = %request.worker_id, error = %e, "Failed to persist worker capacity");
        }
    }

    info!(
        worker_id = %request.worker_id,
        address = %request.address,
        version = request.worker_version.as_deref().unwrap_or("unknown"),
        "Worker registered"
    );

    Ok(Json(RegisterWorkerResponse {
        status: "success".to_string(),
        message: "Worker registered".to_string(),
    }))
}

/// SendHeartbeat: non-blocking ingestion; the handler returns as soon as the
/// sample is queued, independent of subscriber count or downstream load.
async fn handle_heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<HeartbeatRequest>,
) -> Result<Json<shared::api::HeartbeatResponse>, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;
    check_worker_id(&request.worker_id)?;

    if state.config.rate_limit_enabled {
        state
            .rate_limiter
            .check_rate_limit(&request.worker_id)
            .await?;
    }

    let now = current_timestamp();
    match state.registry.heartbeat(&request.worker_id, now).await {
        Ok(()) => {}
        Err(RegistryError::UnknownWorker(_)) => {
            warn!(worker_id = %request.worker_id, "Heartbeat from unknown worker");
            return Err(ApiError::Forbidden("Worker is not registered".to_string()));
        }
        Err(e) => return Err(ApiError::Internal(e.to_string())),
    }

    let sample = TelemetrySample {
        worker_id: request.worker_id.clone(),
        cpu_percent: request.cpu_percent,
        memory_percent: request.memory_percent,
        gpu_percent: request.gpu_percent,
        running_tasks: request.running_tasks,
        timestamp: now,
    };
    state.telemetry.ingest(sample).await;

    Ok(Json(shared::api::HeartbeatResponse::ack()))
}

/// StreamTaskLogs: one gzip+base64 chunk of container output.
async fn handle_task_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LogChunkRequest>,
) -> Result<StatusCode, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;
    check_worker_id(&request.worker_id)?;

    let bytes = decompress_payload(&request.data, state.config.log_truncate_bytes * 2)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let text = String::from_utf8_lossy(&bytes);

    let appended = state.logs.append(&request.task_id, &text).await;
    if !appended {
        debug!(
            task_id = %request.task_id,
            seq = request.seq,
            "Log buffer full, chunk dropped"
        );
    }

    Ok(StatusCode::ACCEPTED)
}

/// UploadTaskFiles: one gzip+base64 chunk of a task artifact.
async fn handle_task_files(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<FileChunkRequest>,
) -> Result<Json<FileChunkResponse>, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;
    check_worker_id(&request.worker_id)?;

    let stored = state
        .files
        .store_chunk(&request)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    if let Some(file) = stored {
        let mut db = state.database.lock().await;
        if let Err(e) = db.insert_file_metadata(&file, current_timestamp()).await {
            error!(task_id = %file.task_id, error = %e, "Failed to persist file metadata");
        }
    }

    Ok(Json(FileChunkResponse {
        status: "success".to_string(),
        accepted: true,
    }))
}

/// ReportTaskCompletion: applies the terminal outcome through the
/// completion handler. Duplicates are acknowledged with `applied = false`.
async fn handle_completion(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CompletionRequest>,
) -> Result<Json<shared::api::CompletionResponse>, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;
    check_worker_id(&request.worker_id)?;

    let now = current_timestamp();
    match state.completion.handle(request, now).await {
        Ok(outcome) => Ok(Json(shared::api::CompletionResponse {
            status: "success".to_string(),
            applied: outcome == CompletionOutcome::Applied,
        })),
        Err(CompletionError::UnknownTask(task_id)) => Err(ApiError::NotFound(format!(
            "Task {} is not known",
            task_id
        ))),
        Err(e @ CompletionError::NotTerminal(_)) => Err(ApiError::BadRequest(e.to_string())),
    }
}

/// Task submission: classifies, estimates, stamps the deadline, enqueues.
async fn handle_submit_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SubmitTaskRequest>,
) -> Result<Json<SubmitTaskResponse>, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;

    if request.user_id.is_empty() {
        return Err(ApiError::BadRequest("user_id must not be empty".to_string()));
    }
    if request.image.is_empty() {
        return Err(ApiError::BadRequest("image must not be empty".to_string()));
    }
    let r = &request.resources;
    if r.cpu_cores < 0.0 || r.memory_gb < 0.0 || r.storage_gb < 0.0 || r.gpu_units < 0.0 {
        return Err(ApiError::BadRequest(
            "Requested resources must be non-negative".to_string(),
        ));
    }

    let now = current_timestamp();
    let task_type = TaskType::classify(request.task_type.as_deref(), &request.resources);
    let tau_seconds = state.tau.get(task_type).await;

    let task = Task::submit(
        uuid::Uuid::new_v4().to_string(),
        request.user_id.clone(),
        request.image,
        request.command,
        request.resources,
        request.task_type,
        request.sla_multiplier,
        request.priority,
        tau_seconds,
        now,
    );

    info!(
        task_id = %task.id,
        user_id = %task.user_id,
        task_type = %task.task_type,
        tau = tau_seconds,
        deadline = task.deadline,
        "Task submitted"
    );

    // In-memory first (authoritative), then the durable mirror.
    state.table.insert(task.clone()).await;
    {
        let mut db = state.database.lock().await;
        if let Err(e) = db.upsert_user(&request.user_id, now).await {
            error!(user_id = %request.user_id, error = %e, "Failed to persist user");
        }
        if let Err(e) = db.upsert_task(&task).await {
            error!(task_id = %task.id, error = %e, "Failed to persist task");
        }
    }

    let response = SubmitTaskResponse {
        status: "success".to_string(),
        task_id: task.id.clone(),
        task_type: task.task_type.as_str().to_string(),
        tau_seconds,
        deadline: task.deadline,
    };
    state.queue.enqueue(task).await;

    Ok(Json(response))
}

/// Task detail lookup.
async fn handle_get_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;

    match state.table.get(&task_id).await {
        Some(task) => Ok(Json(task)),
        None => Err(ApiError::NotFound(format!("Task {} is not known", task_id))),
    }
}

/// Task listing, optionally filtered by `?status=`.
async fn handle_list_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<Task>>, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;

    let status = match params.get("status") {
        Some(raw) => Some(TaskStatus::parse(raw).ok_or_else(|| {
            ApiError::BadRequest(format!("Unknown status filter '{}'", raw))
        })?),
        None => None,
    };

    Ok(Json(state.table.list(status).await))
}

/// User-initiated cancellation.
///
/// A queued task cancels immediately; a dispatched one gets a CancelTask
/// RPC to its worker, which later reports `cancelled` through the
/// completion endpoint.
async fn handle_cancel_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Result<Json<shared::api::ApiResponse<String>>, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;

    let task = state
        .table
        .get(&task_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Task {} is not known", task_id)))?;

    let now = current_timestamp();
    match task.status {
        TaskStatus::Pending | TaskStatus::Queued => {
            state.queue.remove(&task_id).await;
            let updated = state
                .table
                .transition(&task_id, TaskStatus::Cancelled, now)
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            {
                let mut db = state.database.lock().await;
                if let Err(e) = db.upsert_task(&updated).await {
                    error!(task_id = %task_id, error = %e, "Failed to persist cancellation");
                }
            }
            info!(task_id = %task_id, "Queued task cancelled");
            Ok(Json(shared::api::ApiResponse::success(
                "cancelled".to_string(),
            )))
        }
        TaskStatus::Assigned | TaskStatus::Running => {
            let Some(worker_id) = task.assigned_worker.clone() else {
                return Err(ApiError::Internal(
                    "Dispatched task has no worker recorded".to_string(),
                ));
            };
            let Some(worker) = state.registry.get(&worker_id).await else {
                return Err(ApiError::Internal(format!(
                    "Worker {} is not in the registry",
                    worker_id
                )));
            };

            // Fire the graceful stop in the background; the worker confirms
            // through the completion path.
            let client = Arc::clone(&state.worker_client);
            let address = worker.address.clone();
            let task_id_for_rpc = task_id.clone();
            tokio::spawn(async move {
                if let Err(e) = client.cancel_task(&address, &task_id_for_rpc).await {
                    warn!(task_id = %task_id_for_rpc, error = %e, "CancelTask RPC failed");
                }
            });

            info!(task_id = %task_id, worker_id = %worker_id, "Cancellation requested");
            Ok(Json(shared::api::ApiResponse::success(
                "cancellation_requested".to_string(),
            )))
        }
        status => Err(ApiError::BadRequest(format!(
            "Task is already terminal ({})",
            status
        ))),
    }
}

/// Returns buffered log text for a running task, or the stored result log
/// for a finished one.
async fn handle_get_task_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;

    if let Some((text, truncated)) = state.logs.get(&task_id).await {
        return Ok(Json(serde_json::json!({
            "task_id": task_id,
            "log_text": text,
            "truncated": truncated,
            "source": "stream",
        })));
    }

    let result = {
        let mut db = state.database.lock().await;
        db.get_result(&task_id)
            .await
            .map_err(|e| ApiError::Database(e.to_string()))?
    };

    match result {
        Some(result) => Ok(Json(serde_json::json!({
            "task_id": task_id,
            "log_text": result.log_text,
            "truncated": result.log_truncated,
            "source": "result",
        }))),
        None => Err(ApiError::NotFound(format!(
            "No logs recorded for task {}",
            task_id
        ))),
    }
}

/// Fleet listing: registry rows joined with live telemetry.
async fn handle_list_workers(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<WorkerSummary>>, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;

    let workers = state.registry.snapshot().await;
    let telemetry: HashMap<String, crate::telemetry::WorkerTelemetry> = state
        .telemetry
        .snapshot_all()
        .await
        .into_iter()
        .map(|t| (t.worker_id.clone(), t))
        .collect();

    let mut summaries = Vec::with_capacity(workers.len());
    for info in workers {
        let latest = telemetry.get(&info.worker_id);
        summaries.push(WorkerSummary {
            load: latest.map(|t| t.load),
            running_tasks: latest.map(|t| t.running_tasks).unwrap_or(0),
            info,
        });
    }
    Ok(Json(summaries))
}

/// Latest telemetry snapshot for one worker.
async fn handle_worker_telemetry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(worker_id): Path<String>,
) -> Result<Json<crate::telemetry::WorkerTelemetry>, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;
    check_worker_id(&worker_id)?;

    match state.telemetry.latest(&worker_id).await {
        Some(telemetry) => Ok(Json(telemetry)),
        None => Err(ApiError::NotFound(format!(
            "No telemetry recorded for worker {}",
            worker_id
        ))),
    }
}

/// Admin pre-registration: the gate workers must pass before they can
/// attach.
async fn handle_preregister_worker(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PreRegisterWorkerRequest>,
) -> Result<Json<shared::api::ApiResponse<String>>, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;
    check_worker_id(&request.worker_id)?;

    match state
        .registry
        .pre_register(&request.worker_id, &request.address)
        .await
    {
        Ok(()) => {}
        Err(RegistryError::DuplicateWorker(_)) => {
            return Err(ApiError::Conflict(format!(
                "Worker {} is already pre-registered",
                request.worker_id
            )));
        }
        Err(e) => return Err(ApiError::Internal(e.to_string())),
    }

    {
        let mut db = state.database.lock().await;
        if let Err(e) = db
            .upsert_worker(&request.worker_id, &request.address, current_timestamp())
            .await
        {
            error!(worker_id = %request.worker_id, error = %e, "Failed to persist pre-registration");
        }
    }

    Ok(Json(shared::api::ApiResponse::success(
        request.worker_id,
    )))
}

/// Custom error types for the API.
/// A dedicated enum keeps error handling and response formatting
/// consistent across handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Too many requests")]
    TooManyRequests,
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Database error: {0}")]
    Database(String),
}

/// Converts `ApiError` into an HTTP response. Axum calls this whenever a
/// handler returns the `Err` variant.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "Forbidden"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "Bad Request"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "Not Found"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "Conflict"),
            ApiError::TooManyRequests => (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Database Error"),
        };

        let body = Json(serde_json::json!({
            "error": error_message,
            "details": self.to_string()
        }));

        (status, body).into_response()
    }
}

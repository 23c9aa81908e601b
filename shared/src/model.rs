//! Core domain model for the task orchestration system
//!
//! This module defines the task, worker, reservation, and telemetry types
//! shared between the master and the worker-facing wire contract. Everything
//! is keyed by string id; components reference each other by id and resolve
//! through the owning component, so no object cycles exist.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Tolerance used when comparing resource quantities.
///
/// Resource arithmetic runs on f64 and the ledger invariant
/// (available + reserved = total) must survive repeated add/sub cycles.
pub const RESOURCE_EPSILON: f64 = 1e-9;

/// Resource quantities along the four scheduling dimensions.
///
/// Used both for task requests and worker capacities.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// CPU cores (fractional cores allowed)
    #[serde(default)]
    pub cpu_cores: f64,
    /// Memory in gigabytes
    #[serde(default)]
    pub memory_gb: f64,
    /// Storage in gigabytes
    #[serde(default)]
    pub storage_gb: f64,
    /// GPU units
    #[serde(default)]
    pub gpu_units: f64,
}

impl ResourceSpec {
    pub fn new(cpu_cores: f64, memory_gb: f64, storage_gb: f64, gpu_units: f64) -> Self {
        Self {
            cpu_cores,
            memory_gb,
            storage_gb,
            gpu_units,
        }
    }

    /// Returns true if every dimension of `self` fits within `other`.
    ///
    /// This is the feasibility check: a task `fits_within` a worker's
    /// available capacity when all four requested quantities are covered.
    pub fn fits_within(&self, other: &ResourceSpec) -> bool {
        self.cpu_cores <= other.cpu_cores + RESOURCE_EPSILON
            && self.memory_gb <= other.memory_gb + RESOURCE_EPSILON
            && self.storage_gb <= other.storage_gb + RESOURCE_EPSILON
            && self.gpu_units <= other.gpu_units + RESOURCE_EPSILON
    }

    /// Componentwise addition.
    pub fn add(&self, other: &ResourceSpec) -> ResourceSpec {
        ResourceSpec {
            cpu_cores: self.cpu_cores + other.cpu_cores,
            memory_gb: self.memory_gb + other.memory_gb,
            storage_gb: self.storage_gb + other.storage_gb,
            gpu_units: self.gpu_units + other.gpu_units,
        }
    }

    /// Componentwise subtraction. Returns `None` if any dimension would go
    /// negative beyond tolerance; small negative residues from float
    /// arithmetic are clamped to zero.
    pub fn checked_sub(&self, other: &ResourceSpec) -> Option<ResourceSpec> {
        if !other.fits_within(self) {
            return None;
        }
        Some(ResourceSpec {
            cpu_cores: (self.cpu_cores - other.cpu_cores).max(0.0),
            memory_gb: (self.memory_gb - other.memory_gb).max(0.0),
            storage_gb: (self.storage_gb - other.storage_gb).max(0.0),
            gpu_units: (self.gpu_units - other.gpu_units).max(0.0),
        })
    }

    /// Approximate equality within [`RESOURCE_EPSILON`] on every dimension.
    pub fn approx_eq(&self, other: &ResourceSpec) -> bool {
        (self.cpu_cores - other.cpu_cores).abs() <= RESOURCE_EPSILON
            && (self.memory_gb - other.memory_gb).abs() <= RESOURCE_EPSILON
            && (self.storage_gb - other.storage_gb).abs() <= RESOURCE_EPSILON
            && (self.gpu_units - other.gpu_units).abs() <= RESOURCE_EPSILON
    }

    /// All-zero check, used to skip empty reservations.
    pub fn is_zero(&self) -> bool {
        self.cpu_cores == 0.0
            && self.memory_gb == 0.0
            && self.storage_gb == 0.0
            && self.gpu_units == 0.0
    }
}

impl fmt::Display for ResourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu={} mem={}GB storage={}GB gpu={}",
            self.cpu_cores, self.memory_gb, self.storage_gb, self.gpu_units
        )
    }
}

/// The closed task type vocabulary used for runtime estimation and affinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    CpuLight,
    CpuHeavy,
    MemoryHeavy,
    GpuInference,
    GpuTraining,
    Mixed,
}

impl TaskType {
    /// Every member of the vocabulary, for iteration and seeding.
    pub const ALL: [TaskType; 6] = [
        TaskType::CpuLight,
        TaskType::CpuHeavy,
        TaskType::MemoryHeavy,
        TaskType::GpuInference,
        TaskType::GpuTraining,
        TaskType::Mixed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::CpuLight => "cpu-light",
            TaskType::CpuHeavy => "cpu-heavy",
            TaskType::MemoryHeavy => "memory-heavy",
            TaskType::GpuInference => "gpu-inference",
            TaskType::GpuTraining => "gpu-training",
            TaskType::Mixed => "mixed",
        }
    }

    /// Parses a caller-supplied type string. Returns `None` for anything
    /// outside the closed vocabulary.
    pub fn parse(s: &str) -> Option<TaskType> {
        match s {
            "cpu-light" => Some(TaskType::CpuLight),
            "cpu-heavy" => Some(TaskType::CpuHeavy),
            "memory-heavy" => Some(TaskType::MemoryHeavy),
            "gpu-inference" => Some(TaskType::GpuInference),
            "gpu-training" => Some(TaskType::GpuTraining),
            "mixed" => Some(TaskType::Mixed),
            _ => None,
        }
    }

    /// Infers a task type from requested resources.
    ///
    /// Pure function; the rules are ordered and the first match wins:
    /// gpu > 2 and cpu > 4 is training, any gpu is inference, mem > 8 GB is
    /// memory-heavy, cpu > 4 is cpu-heavy, any cpu is cpu-light, otherwise
    /// mixed.
    pub fn infer(resources: &ResourceSpec) -> TaskType {
        if resources.gpu_units > 2.0 && resources.cpu_cores > 4.0 {
            TaskType::GpuTraining
        } else if resources.gpu_units > 0.0 {
            TaskType::GpuInference
        } else if resources.memory_gb > 8.0 {
            TaskType::MemoryHeavy
        } else if resources.cpu_cores > 4.0 {
            TaskType::CpuHeavy
        } else if resources.cpu_cores > 0.0 {
            TaskType::CpuLight
        } else {
            TaskType::Mixed
        }
    }

    /// Resolves the effective type: the caller-supplied value when it is in
    /// the vocabulary, inference from resources otherwise.
    pub fn classify(raw: Option<&str>, resources: &ResourceSpec) -> TaskType {
        raw.and_then(TaskType::parse)
            .unwrap_or_else(|| TaskType::infer(resources))
    }

    /// Seeded runtime estimate in seconds, used before any completion has
    /// been observed for a type.
    pub fn default_tau_seconds(&self) -> f64 {
        match self {
            TaskType::CpuLight => 5.0,
            TaskType::CpuHeavy => 15.0,
            TaskType::MemoryHeavy => 20.0,
            TaskType::GpuInference => 10.0,
            TaskType::GpuTraining => 60.0,
            TaskType::Mixed => 10.0,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<TaskStatus> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "queued" => Some(TaskStatus::Queued),
            "assigned" => Some(TaskStatus::Assigned),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states absorb every further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// The allowed transition edges.
    ///
    /// `assigned -> queued` is the re-enqueue edge taken when a worker
    /// refuses an assignment or the dispatch RPC times out. A task never
    /// leaves a terminal state; in particular `failed -> running` is
    /// forbidden.
    pub fn can_transition(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Queued, Assigned)
                | (Queued, Cancelled)
                | (Queued, Failed)
                | (Assigned, Running)
                | (Assigned, Queued)
                | (Assigned, Failed)
                | (Assigned, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower bound of the accepted SLA multiplier range.
pub const SLA_MULTIPLIER_MIN: f64 = 1.5;
/// Upper bound of the accepted SLA multiplier range.
pub const SLA_MULTIPLIER_MAX: f64 = 2.5;
/// Multiplier applied when the caller supplies none, or a value outside the
/// accepted range.
pub const SLA_MULTIPLIER_DEFAULT: f64 = 2.0;

/// Normalizes the SLA multiplier `k`: values outside `[1.5, 2.5]` (including
/// NaN and a missing value) fall back to the default 2.0.
pub fn normalize_sla_multiplier(k: Option<f64>) -> f64 {
    match k {
        Some(v) if (SLA_MULTIPLIER_MIN..=SLA_MULTIPLIER_MAX).contains(&v) => v,
        _ => SLA_MULTIPLIER_DEFAULT,
    }
}

/// A submitted task and its scheduling state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id
    pub id: String,
    /// Owning user id
    pub user_id: String,
    /// Docker image to run (opaque to the control plane)
    pub image: String,
    /// Command line for the container (opaque to the control plane)
    #[serde(default)]
    pub command: Vec<String>,
    /// Requested resources
    pub resources: ResourceSpec,
    /// The caller-supplied type string, kept verbatim for auditing
    #[serde(default)]
    pub requested_type: Option<String>,
    /// Effective task type (caller value if valid, inferred otherwise)
    pub task_type: TaskType,
    /// SLA multiplier k, already normalized into [1.5, 2.5]
    pub sla_multiplier: f64,
    /// Runtime estimate in seconds at submission time
    pub tau_seconds: f64,
    /// Arrival time A (Unix seconds)
    pub arrival_time: u64,
    /// Deadline D = A + k * tau, computed once at submission and never
    /// mutated afterwards
    pub deadline: f64,
    /// Current lifecycle status
    pub status: TaskStatus,
    /// Optional priority override; higher dispatches first
    #[serde(default)]
    pub priority: i32,
    /// Number of failed dispatch attempts so far
    #[serde(default)]
    pub retry_count: u32,
    /// Worker currently holding the task, if any
    #[serde(default)]
    pub assigned_worker: Option<String>,
    /// When the task was last assigned (Unix seconds)
    #[serde(default)]
    pub assigned_at: Option<u64>,
    /// When the task reached a terminal state (Unix seconds)
    #[serde(default)]
    pub completed_at: Option<u64>,
    /// Machine-readable reason when status is `failed`
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl Task {
    /// Builds a task at submission time.
    ///
    /// Classifies the type, normalizes `k`, and fixes the deadline from the
    /// supplied runtime estimate. The status starts at `queued`; the caller
    /// enqueues and persists it.
    #[allow(clippy::too_many_arguments)]
    pub fn submit(
        id: String,
        user_id: String,
        image: String,
        command: Vec<String>,
        resources: ResourceSpec,
        requested_type: Option<String>,
        sla_multiplier: Option<f64>,
        priority: i32,
        tau_seconds: f64,
        now: u64,
    ) -> Task {
        let task_type = TaskType::classify(requested_type.as_deref(), &resources);
        let k = normalize_sla_multiplier(sla_multiplier);
        Task {
            id,
            user_id,
            image,
            command,
            resources,
            requested_type,
            task_type,
            sla_multiplier: k,
            tau_seconds,
            arrival_time: now,
            deadline: now as f64 + k * tau_seconds,
            status: TaskStatus::Queued,
            priority,
            retry_count: 0,
            assigned_worker: None,
            assigned_at: None,
            completed_at: None,
            failure_reason: None,
        }
    }

    /// Seconds of SLA budget granted at submission (`D - A`).
    pub fn sla_budget_seconds(&self) -> f64 {
        self.deadline - self.arrival_time as f64
    }
}

/// A worker as tracked by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    /// Unique worker id (must be pre-registered before attach)
    pub worker_id: String,
    /// Network address of the worker's RPC endpoint
    pub address: String,
    /// Total capacity reported at attach
    pub total: ResourceSpec,
    /// Capacity remaining after active reservations
    pub available: ResourceSpec,
    /// Cleared when no heartbeat arrives within the inactivity timeout
    pub active: bool,
    /// Last heartbeat (Unix seconds); 0 before the first one
    pub last_heartbeat: u64,
    /// Tasks currently assigned to this worker
    #[serde(default)]
    pub assigned_tasks: HashSet<String>,
}

/// A resource hold created when the scheduler picks a worker for a task.
///
/// Invariant, per worker: available + sum of reservations = total,
/// componentwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub task_id: String,
    pub worker_id: String,
    pub resources: ResourceSpec,
    /// Expiry (Unix seconds); the scrubber evicts past-due reservations
    pub expires_at: u64,
}

/// Descriptor of a container currently running on a worker, as reported in
/// heartbeats.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunningTask {
    pub task_id: String,
    #[serde(default)]
    pub image: String,
}

/// One heartbeat's worth of worker telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub worker_id: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub gpu_percent: f64,
    #[serde(default)]
    pub running_tasks: Vec<RunningTask>,
    /// Ingestion timestamp, stamped by the master (Unix seconds)
    pub timestamp: u64,
}

impl TelemetrySample {
    /// Normalized load: max of the three utilization percentages over 100.
    ///
    /// May exceed 1.0 when a worker reports oversubscription.
    pub fn load(&self) -> f64 {
        (self.cpu_percent.max(self.memory_percent).max(self.gpu_percent)) / 100.0
    }
}

/// Persisted record of a dispatch decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub assignment_id: String,
    pub task_id: String,
    pub worker_id: String,
    /// When the assignment was made (Unix seconds)
    pub assigned_at: u64,
    /// Worker load observed from telemetry at dispatch time
    pub worker_load: f64,
}

/// Persisted terminal outcome of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub worker_id: String,
    /// One of completed / failed / cancelled
    pub status: TaskStatus,
    pub exit_code: i32,
    /// Container log text, capped at the configured limit
    pub log_text: String,
    /// True when `log_text` was cut at the cap
    pub log_truncated: bool,
    /// Completion time (Unix seconds)
    pub completed_at: u64,
}

/// Marker appended to log text cut at the cap.
pub const LOG_TRUNCATION_MARKER: &str = "\n... [truncated]";

/// Truncates log text to `cap` bytes on a char boundary and appends the
/// truncation marker. Returns the (possibly shortened) text and whether it
/// was cut.
pub fn truncate_log_text(text: &str, cap: usize) -> (String, bool) {
    if text.len() <= cap {
        return (text.to_string(), false);
    }
    let mut cut = cap;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = text[..cut].to_string();
    out.push_str(LOG_TRUNCATION_MARKER);
    (out, true)
}

//! Risk-aware worker selection with round-robin fallback
//!
//! The scheduler is a pure function of its inputs plus one pointer read of
//! the active parameter snapshot: it never suspends and holds no locks
//! across worker scoring. Selection runs in four steps: build the task
//! view, filter for feasibility, score the feasible set, and fall back down
//! the ladder (risk-aware, round-robin over feasible, round-robin over all
//! active) when a step produces nothing.

use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use shared::model::{ResourceSpec, Task, TaskType, WorkerInfo};

use crate::params::{ParamsStore, ScoringParams};
use crate::tau::TauStore;

/// Scheduler-facing view of one task, resolved before selection so that
/// `select_worker` stays a pure function.
#[derive(Debug, Clone)]
pub struct TaskView {
    pub task_id: String,
    pub task_type: TaskType,
    pub resources: ResourceSpec,
    /// Current runtime estimate from the tau store
    pub tau_seconds: f64,
    /// Absolute deadline (Unix seconds, fractional), fixed at submission
    pub deadline: f64,
    /// Wall clock at view construction (Unix seconds, fractional)
    pub now: f64,
}

impl TaskView {
    /// Resolves type, runtime estimate, and deadline for a task.
    ///
    /// The deadline was fixed at submission and is reused as-is; only a
    /// record that somehow lacks one (e.g. replayed from an older store)
    /// gets `now + k * tau`. The runtime estimate is always the fresh value
    /// so predictions track recent completions.
    pub async fn build(task: &Task, tau_store: &TauStore, now: u64) -> TaskView {
        let task_type = TaskType::classify(task.requested_type.as_deref(), &task.resources);
        let tau_seconds = tau_store.get(task_type).await;
        let deadline = if task.deadline.is_finite() && task.deadline > 0.0 {
            task.deadline
        } else {
            now as f64 + task.sla_multiplier * tau_seconds
        };
        TaskView {
            task_id: task.id.clone(),
            task_type,
            resources: task.resources,
            tau_seconds,
            deadline,
            now: now as f64,
        }
    }
}

/// Scheduler-facing view of one worker at selection time.
#[derive(Debug, Clone)]
pub struct CandidateWorker {
    pub worker_id: String,
    pub address: String,
    pub active: bool,
    pub available: ResourceSpec,
    /// Latest normalized load from telemetry; 0 when no sample has arrived
    pub load: f64,
}

impl CandidateWorker {
    /// Builds a candidate from a registry snapshot entry plus its telemetry
    /// load.
    pub fn from_worker(info: &WorkerInfo, load: f64) -> CandidateWorker {
        CandidateWorker {
            worker_id: info.worker_id.clone(),
            address: info.address.clone(),
            active: info.active,
            available: info.available,
            load,
        }
    }
}

/// The single scheduling operation every selector implements.
pub trait WorkerSelector {
    /// Picks a worker for the task, or `None` when nothing can take it and
    /// the task should stay queued.
    fn select_worker(&self, task: &TaskView, workers: &[CandidateWorker]) -> Option<String>;
}

/// Round-robin selection over the worker set.
///
/// A single cursor walks the worker ids in lexicographic order. Each call
/// starts one past the cursor and returns the first active worker with a
/// non-empty address that passes the resource filter; success advances the
/// cursor. The cursor survives parameter reloads untouched.
pub struct RoundRobinSelector {
    cursor: Mutex<usize>,
}

impl Default for RoundRobinSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self {
            cursor: Mutex::new(0),
        }
    }

    /// Core rotation. `resource_filter` is `Some` for feasibility-checked
    /// rounds and `None` for the last-resort pass over all active workers.
    pub fn pick(
        &self,
        workers: &[CandidateWorker],
        resource_filter: Option<&ResourceSpec>,
    ) -> Option<String> {
        if workers.is_empty() {
            return None;
        }

        let mut sorted: Vec<&CandidateWorker> = workers.iter().collect();
        sorted.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        let n = sorted.len();

        let mut cursor = self
            .cursor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        for offset in 0..n {
            let index = (*cursor + 1 + offset) % n;
            let worker = sorted[index];
            if !worker.active || worker.address.is_empty() {
                continue;
            }
            if let Some(request) = resource_filter {
                if !request.fits_within(&worker.available) {
                    continue;
                }
            }
            *cursor = index;
            return Some(worker.worker_id.clone());
        }
        None
    }
}

impl WorkerSelector for RoundRobinSelector {
    fn select_worker(&self, task: &TaskView, workers: &[CandidateWorker]) -> Option<String> {
        self.pick(workers, Some(&task.resources))
    }
}

/// Risk-aware selection: minimizes predicted SLA risk over the feasible
/// set, composing a round-robin selector as its fallback dependency.
pub struct RiskAwareSelector {
    params: Arc<ParamsStore>,
    fallback: RoundRobinSelector,
}

impl RiskAwareSelector {
    pub fn new(params: Arc<ParamsStore>) -> Self {
        Self {
            params,
            fallback: RoundRobinSelector::new(),
        }
    }

    /// Predicted execution time on a worker:
    /// `tau * (1 + t1*cpu_ratio + t2*mem_ratio + t3*gpu_ratio + t4*load)`.
    ///
    /// A requested/available ratio with a zero denominator counts as 0 when
    /// nothing is requested and as 1.0 (worst case) otherwise. The result
    /// is clamped to at least tau so anomalous parameters can never predict
    /// faster-than-estimate execution.
    pub fn predicted_execution_seconds(
        params: &ScoringParams,
        task: &TaskView,
        worker: &CandidateWorker,
    ) -> f64 {
        fn ratio(requested: f64, available: f64) -> f64 {
            if requested <= 0.0 {
                0.0
            } else if available <= 0.0 {
                1.0
            } else {
                requested / available
            }
        }

        let theta = &params.theta;
        let predicted = task.tau_seconds
            * (1.0
                + theta.theta1 * ratio(task.resources.cpu_cores, worker.available.cpu_cores)
                + theta.theta2 * ratio(task.resources.memory_gb, worker.available.memory_gb)
                + theta.theta3 * ratio(task.resources.gpu_units, worker.available.gpu_units)
                + theta.theta4 * worker.load);

        // Also catches NaN from pathological inputs.
        if predicted >= task.tau_seconds {
            predicted
        } else {
            task.tau_seconds
        }
    }

    /// Final risk for dispatching the task to a worker. Lower is better.
    pub fn risk_score(
        params: &ScoringParams,
        task: &TaskView,
        worker: &CandidateWorker,
    ) -> f64 {
        let predicted = Self::predicted_execution_seconds(params, task, worker);
        let finish = task.now + predicted;
        let slack_overrun = (finish - task.deadline).max(0.0);

        let base = params.risk.alpha * slack_overrun + params.risk.beta * worker.load;
        base - params.affinity(task.task_type, &worker.worker_id) + params.penalty(&worker.worker_id)
    }

    /// Fallback ladder: round-robin over feasible workers, then round-robin
    /// over all active workers regardless of fit. The dispatcher validates
    /// the last-resort choice when it tries to reserve.
    fn fall_back(&self, task: &TaskView, workers: &[CandidateWorker]) -> Option<String> {
        if let Some(worker_id) = self.fallback.pick(workers, Some(&task.resources)) {
            debug!(task_id = %task.task_id, worker_id = %worker_id, "Round-robin fallback over feasible workers");
            return Some(worker_id);
        }
        let last_resort = self.fallback.pick(workers, None);
        if let Some(worker_id) = &last_resort {
            debug!(task_id = %task.task_id, worker_id = %worker_id, "Last-resort round-robin over all active workers");
        }
        last_resort
    }
}

impl WorkerSelector for RiskAwareSelector {
    fn select_worker(&self, task: &TaskView, workers: &[CandidateWorker]) -> Option<String> {
        let params = self.params.current();

        let feasible: Vec<&CandidateWorker> = workers
            .iter()
            .filter(|w| w.active && task.resources.fits_within(&w.available))
            .collect();

        if feasible.is_empty() {
            debug!(task_id = %task.task_id, "No feasible worker, taking fallback ladder");
            return self.fall_back(task, workers);
        }

        let mut scored: Vec<(f64, &CandidateWorker)> = feasible
            .iter()
            .map(|w| (Self::risk_score(&params, task, w), *w))
            .filter(|(score, _)| score.is_finite())
            .collect();

        if scored.is_empty() {
            warn!(task_id = %task.task_id, "Every risk score was invalid, taking fallback ladder");
            return self.fall_back(task, workers);
        }

        // Deterministic: minimum score, worker id breaking exact ties.
        scored.sort_by(|(score_a, a), (score_b, b)| {
            score_a
                .partial_cmp(score_b)
                .expect("scores were filtered to finite values")
                .then_with(|| a.worker_id.cmp(&b.worker_id))
        });

        let (score, chosen) = &scored[0];
        debug!(
            task_id = %task.task_id,
            worker_id = %chosen.worker_id,
            risk = score,
            candidates = scored.len(),
            "Risk-aware selection"
        );
        Some(chosen.worker_id.clone())
    }
}

/// The selector implementations the dispatcher can be configured with.
pub enum Selector {
    RiskAware(RiskAwareSelector),
    RoundRobin(RoundRobinSelector),
}

impl Selector {
    /// The production default: risk-aware with round-robin fallback.
    pub fn risk_aware(params: Arc<ParamsStore>) -> Selector {
        Selector::RiskAware(RiskAwareSelector::new(params))
    }
}

impl WorkerSelector for Selector {
    fn select_worker(&self, task: &TaskView, workers: &[CandidateWorker]) -> Option<String> {
        match self {
            Selector::RiskAware(inner) => inner.select_worker(task, workers),
            Selector::RoundRobin(inner) => inner.select_worker(task, workers),
        }
    }
}

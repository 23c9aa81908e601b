//! Scheduler parameter snapshots and hot reload
//!
//! Scheduling weights are trained offline and written to a JSON file; the
//! master re-reads that file on a fixed cadence. A snapshot is immutable
//! once active: the scheduler grabs the current `Arc` with a single read
//! lock, so every `select_worker` call sees either the old parameters or
//! the new ones, never a mix. A file that fails to parse or validate keeps
//! the previous snapshot active.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{info, warn};

use shared::model::TaskType;
use shared::utils::calculate_bytes_checksum;

/// Execution-time prediction coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Theta {
    pub theta1: f64,
    pub theta2: f64,
    pub theta3: f64,
    pub theta4: f64,
}

impl Default for Theta {
    fn default() -> Self {
        Self {
            theta1: 0.1,
            theta2: 0.1,
            theta3: 0.3,
            theta4: 0.2,
        }
    }
}

/// Risk weights: alpha scales deadline slack, beta scales load.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskWeights {
    pub alpha: f64,
    pub beta: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            alpha: 10.0,
            beta: 1.0,
        }
    }
}

/// One immutable snapshot of scheduler tuning.
///
/// File format (JSON):
/// `{"theta": {"theta1": ..}, "risk": {"alpha": .., "beta": ..},
///   "affinityMatrix": {"gpu-training": {"worker-1": 5.0}},
///   "penaltyVector": {"worker-2": 15.0}}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoringParams {
    #[serde(default)]
    pub theta: Theta,
    #[serde(default)]
    pub risk: RiskWeights,
    /// Signed reward per (task type, worker), subtracted from base risk
    #[serde(default, rename = "affinityMatrix")]
    pub affinity_matrix: HashMap<String, HashMap<String, f64>>,
    /// Non-negative cost per worker, added to base risk
    #[serde(default, rename = "penaltyVector")]
    pub penalty_vector: HashMap<String, f64>,
}

impl ScoringParams {
    /// Range-checks every field. Violations name the offending value.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("theta1", self.theta.theta1),
            ("theta2", self.theta.theta2),
            ("theta3", self.theta.theta3),
            ("theta4", self.theta.theta4),
        ] {
            if !value.is_finite() || !(0.0..=10.0).contains(&value) {
                return Err(format!("{} must be in [0, 10], got {}", name, value));
            }
        }

        for (name, value) in [("alpha", self.risk.alpha), ("beta", self.risk.beta)] {
            if !value.is_finite() || !(0.0..=1000.0).contains(&value) {
                return Err(format!("{} must be in [0, 1000], got {}", name, value));
            }
        }

        for (task_type, row) in &self.affinity_matrix {
            if TaskType::parse(task_type).is_none() {
                return Err(format!("unknown task type '{}' in affinityMatrix", task_type));
            }
            for (worker_id, value) in row {
                if !value.is_finite() || !(-10.0..=10.0).contains(value) {
                    return Err(format!(
                        "affinity[{}][{}] must be in [-10, 10], got {}",
                        task_type, worker_id, value
                    ));
                }
            }
        }

        for (worker_id, value) in &self.penalty_vector {
            if !value.is_finite() || !(0.0..=100.0).contains(value) {
                return Err(format!(
                    "penalty[{}] must be in [0, 100], got {}",
                    worker_id, value
                ));
            }
        }

        Ok(())
    }

    /// Affinity reward for a (type, worker) pair; 0 when absent.
    pub fn affinity(&self, task_type: TaskType, worker_id: &str) -> f64 {
        self.affinity_matrix
            .get(task_type.as_str())
            .and_then(|row| row.get(worker_id))
            .copied()
            .unwrap_or(0.0)
    }

    /// Penalty cost for a worker; 0 when absent.
    pub fn penalty(&self, worker_id: &str) -> f64 {
        self.penalty_vector.get(worker_id).copied().unwrap_or(0.0)
    }
}

/// Outcome of a reload attempt, for logging and tests.
#[derive(Debug, Clone, PartialEq)]
pub enum ReloadOutcome {
    /// File bytes identical to the active snapshot's source; nothing done
    Unchanged,
    /// New snapshot parsed, validated, and activated
    Replaced,
    /// File missing, unparsable, or out of range; previous snapshot kept
    KeptPrevious(String),
}

/// Holder of the active parameter snapshot.
///
/// Readers take the read lock only long enough to clone the inner `Arc`;
/// the reload loop takes the write lock only to swap the pointer.
pub struct ParamsStore {
    active: RwLock<Arc<ScoringParams>>,
    /// BLAKE3 of the file bytes behind the active snapshot, so reloading an
    /// unchanged file is a no-op.
    fingerprint: Mutex<Option<String>>,
}

impl Default for ParamsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ParamsStore {
    /// Creates a store holding the seeded defaults.
    pub fn new() -> Self {
        Self {
            active: RwLock::new(Arc::new(ScoringParams::default())),
            fingerprint: Mutex::new(None),
        }
    }

    /// Creates a store from the parameter file, falling back to seeded
    /// defaults when the file is missing or invalid. Never fails: a cold
    /// start must not depend on trained parameters existing.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let store = Self::new();
        match store.reload_from_file(&path) {
            ReloadOutcome::Replaced => {
                info!(path = %path.as_ref().display(), "Loaded scheduler parameters");
            }
            ReloadOutcome::Unchanged => {}
            ReloadOutcome::KeptPrevious(reason) => {
                warn!(
                    path = %path.as_ref().display(),
                    reason = %reason,
                    "Scheduler parameter file unavailable, using seeded defaults"
                );
            }
        }
        store
    }

    /// The active snapshot. One short read-lock to clone the pointer.
    pub fn current(&self) -> Arc<ScoringParams> {
        self.active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Attempts to replace the active snapshot from the file.
    pub fn reload_from_file<P: AsRef<Path>>(&self, path: P) -> ReloadOutcome {
        let bytes = match std::fs::read(path.as_ref()) {
            Ok(bytes) => bytes,
            Err(e) => return ReloadOutcome::KeptPrevious(format!("read failed: {}", e)),
        };

        let checksum = calculate_bytes_checksum(&bytes);
        {
            let fingerprint = self
                .fingerprint
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if fingerprint.as_deref() == Some(checksum.as_str()) {
                return ReloadOutcome::Unchanged;
            }
        }

        let params: ScoringParams = match serde_json::from_slice(&bytes) {
            Ok(params) => params,
            Err(e) => return ReloadOutcome::KeptPrevious(format!("parse failed: {}", e)),
        };

        if let Err(reason) = params.validate() {
            return ReloadOutcome::KeptPrevious(format!("validation failed: {}", reason));
        }

        {
            let mut active = self
                .active
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *active = Arc::new(params);
        }
        {
            let mut fingerprint = self
                .fingerprint
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *fingerprint = Some(checksum);
        }

        ReloadOutcome::Replaced
    }
}

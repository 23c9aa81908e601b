//! Runtime estimate store
//!
//! Keeps one exponentially smoothed runtime estimate (tau) per task type.
//! Estimates feed deadline computation at submission and execution-time
//! prediction in the scheduler, and are refreshed from observed runtimes by
//! the completion handler.

use shared::model::TaskType;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Per-type runtime estimates with exponential smoothing.
///
/// Writes are serialized through the write lock; readers take the read
/// half.
pub struct TauStore {
    values: RwLock<HashMap<TaskType, f64>>,
    /// Smoothing factor lambda: tau_new = lambda*observed + (1-lambda)*tau_old
    lambda: f64,
}

impl TauStore {
    /// Creates a store seeded with the per-type defaults.
    pub fn new(lambda: f64) -> Self {
        let mut values = HashMap::new();
        for task_type in TaskType::ALL {
            values.insert(task_type, task_type.default_tau_seconds());
        }
        Self {
            values: RwLock::new(values),
            lambda,
        }
    }

    /// Current estimate for a type. Falls back to the seeded default if the
    /// type has somehow never been seeded.
    pub async fn get(&self, task_type: TaskType) -> f64 {
        let values = self.values.read().await;
        values
            .get(&task_type)
            .copied()
            .unwrap_or_else(|| task_type.default_tau_seconds())
    }

    /// Applies one observation and returns the new estimate.
    pub async fn update(&self, task_type: TaskType, observed_seconds: f64) -> f64 {
        let mut values = self.values.write().await;
        let old = values
            .get(&task_type)
            .copied()
            .unwrap_or_else(|| task_type.default_tau_seconds());
        let new = self.lambda * observed_seconds + (1.0 - self.lambda) * old;
        values.insert(task_type, new);
        debug!(
            task_type = %task_type,
            observed = observed_seconds,
            old,
            new,
            "Updated runtime estimate"
        );
        new
    }

    /// Overwrites an estimate, used when reloading persisted values at
    /// startup.
    pub async fn seed(&self, task_type: TaskType, value: f64) {
        let mut values = self.values.write().await;
        values.insert(task_type, value);
    }

    /// Copy of all current estimates.
    #[allow(dead_code)]
    pub async fn snapshot(&self) -> HashMap<TaskType, f64> {
        let values = self.values.read().await;
        values.clone()
    }
}

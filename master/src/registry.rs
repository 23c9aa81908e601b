//! Worker registry and resource ledger
//!
//! The registry is the authoritative in-memory view of the worker fleet. It
//! gates which workers may connect (only pre-registered ids), tracks
//! capacities and liveness, and owns the reservation ledger that backs the
//! dispatcher's at-most-once resource accounting.
//!
//! Ledger invariant, per worker and per dimension:
//! available + sum of active reservations = total.

use shared::model::{Reservation, ResourceSpec, WorkerInfo};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Errors surfaced by registry operations.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegistryError {
    #[error("worker '{0}' is not pre-registered")]
    NotAuthorized(String),

    #[error("worker '{0}' is already pre-registered")]
    DuplicateWorker(String),

    #[error("worker '{0}' is not known to the registry")]
    UnknownWorker(String),

    #[error("insufficient capacity on worker '{worker_id}' for task '{task_id}'")]
    ResourceShortage { worker_id: String, task_id: String },

    #[error("task '{0}' already holds a reservation")]
    DuplicateReservation(String),

    #[error("no reservation held for task '{0}'")]
    UnknownReservation(String),
}

struct RegistryInner {
    /// All known workers, keyed by worker id. Pre-registered workers exist
    /// here with zero capacity until they attach.
    workers: HashMap<String, WorkerInfo>,
    /// Active reservations, keyed by task id.
    reservations: HashMap<String, Reservation>,
}

/// Authoritative worker table plus reservation ledger.
///
/// All mutations are serialized by the single interior lock; readers take
/// the read half.
pub struct WorkerRegistry {
    inner: RwLock<RegistryInner>,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                workers: HashMap::new(),
                reservations: HashMap::new(),
            }),
        }
    }

    /// Admin path: registers a worker id so it may attach later.
    /// Rejects duplicates rather than silently overwriting.
    pub async fn pre_register(&self, worker_id: &str, address: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        if inner.workers.contains_key(worker_id) {
            return Err(RegistryError::DuplicateWorker(worker_id.to_string()));
        }
        inner.workers.insert(
            worker_id.to_string(),
            WorkerInfo {
                worker_id: worker_id.to_string(),
                address: address.to_string(),
                total: ResourceSpec::default(),
                available: ResourceSpec::default(),
                active: false,
                last_heartbeat: 0,
                assigned_tasks: Default::default(),
            },
        );
        info!(worker_id = %worker_id, "Pre-registered worker");
        Ok(())
    }

    /// Worker connect path: fills in capacities and marks the worker active.
    ///
    /// Succeeds only for pre-registered ids. Available capacity is derived
    /// from the total minus any reservations still held for this worker, so
    /// a re-attach after a master-side view of in-flight tasks stays
    /// consistent with the ledger.
    pub async fn attach(
        &self,
        worker_id: &str,
        address: &str,
        total: ResourceSpec,
        now: u64,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;

        let reserved = sum_reservations(&inner.reservations, worker_id);

        let worker = inner
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| RegistryError::NotAuthorized(worker_id.to_string()))?;

        if !address.is_empty() {
            worker.address = address.to_string();
        }
        worker.total = total;
        worker.available = total.checked_sub(&reserved).unwrap_or_default();
        worker.active = true;
        worker.last_heartbeat = now;

        info!(
            worker_id = %worker_id,
            address = %worker.address,
            total = %total,
            "Worker attached"
        );
        Ok(())
    }

    /// Marks a worker inactive without evicting it. Reservations it holds
    /// stay in place until they complete or expire.
    #[allow(dead_code)]
    pub async fn detach(&self, worker_id: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let worker = inner
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| RegistryError::UnknownWorker(worker_id.to_string()))?;
        worker.active = false;
        info!(worker_id = %worker_id, "Worker detached");
        Ok(())
    }

    /// Records a heartbeat and restores the activity flag.
    pub async fn heartbeat(&self, worker_id: &str, now: u64) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let worker = inner
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| RegistryError::UnknownWorker(worker_id.to_string()))?;
        worker.last_heartbeat = now;
        if !worker.active {
            debug!(worker_id = %worker_id, "Heartbeat from inactive worker, reactivating");
        }
        worker.active = true;
        Ok(())
    }

    /// Read-consistent copy of the full worker table.
    pub async fn snapshot(&self) -> Vec<WorkerInfo> {
        let inner = self.inner.read().await;
        let mut workers: Vec<WorkerInfo> = inner.workers.values().cloned().collect();
        workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        workers
    }

    /// Copy of a single worker's record.
    pub async fn get(&self, worker_id: &str) -> Option<WorkerInfo> {
        let inner = self.inner.read().await;
        inner.workers.get(worker_id).cloned()
    }

    /// Atomically deducts `resources` from the worker's availability and
    /// records the reservation. On error the registry is unchanged.
    ///
    /// The task id is also added to the worker's assigned set, so the
    /// ledger and the assignment view always move together.
    pub async fn reserve(
        &self,
        task_id: &str,
        worker_id: &str,
        resources: ResourceSpec,
        ttl_seconds: u64,
        now: u64,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;

        if inner.reservations.contains_key(task_id) {
            return Err(RegistryError::DuplicateReservation(task_id.to_string()));
        }

        let worker = inner
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| RegistryError::UnknownWorker(worker_id.to_string()))?;

        let remaining =
            worker
                .available
                .checked_sub(&resources)
                .ok_or(RegistryError::ResourceShortage {
                    worker_id: worker_id.to_string(),
                    task_id: task_id.to_string(),
                })?;

        worker.available = remaining;
        worker.assigned_tasks.insert(task_id.to_string());

        inner.reservations.insert(
            task_id.to_string(),
            Reservation {
                task_id: task_id.to_string(),
                worker_id: worker_id.to_string(),
                resources,
                expires_at: now.saturating_add(ttl_seconds),
            },
        );

        debug!(
            task_id = %task_id,
            worker_id = %worker_id,
            resources = %resources,
            "Reserved resources"
        );
        Ok(())
    }

    /// Releases the reservation held by `task_id`, crediting the resources
    /// back and removing the task from the worker's assigned set.
    pub async fn release(&self, task_id: &str) -> Result<Reservation, RegistryError> {
        let mut inner = self.inner.write().await;

        let reservation = inner
            .reservations
            .remove(task_id)
            .ok_or_else(|| RegistryError::UnknownReservation(task_id.to_string()))?;

        if let Some(worker) = inner.workers.get_mut(&reservation.worker_id) {
            worker.available = worker.available.add(&reservation.resources);
            worker.assigned_tasks.remove(task_id);
        } else {
            // Worker evaporated while holding a reservation; nothing to
            // credit but the ledger entry must still go.
            warn!(
                task_id = %task_id,
                worker_id = %reservation.worker_id,
                "Released reservation for unknown worker"
            );
        }

        debug!(
            task_id = %task_id,
            worker_id = %reservation.worker_id,
            "Released reservation"
        );
        Ok(reservation)
    }

    /// Pushes a reservation's expiry out, used once a worker has accepted
    /// the task and the hold must outlive the dispatch window.
    pub async fn extend_reservation(
        &self,
        task_id: &str,
        ttl_seconds: u64,
        now: u64,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let reservation = inner
            .reservations
            .get_mut(task_id)
            .ok_or_else(|| RegistryError::UnknownReservation(task_id.to_string()))?;
        reservation.expires_at = now.saturating_add(ttl_seconds);
        Ok(())
    }

    /// Marks workers inactive when their last heartbeat is older than
    /// `timeout_seconds`. Snapshots and reservations stay for diagnostics.
    /// Returns the ids newly marked inactive.
    pub async fn cleanup_stale(&self, timeout_seconds: u64, now: u64) -> Vec<String> {
        let mut inner = self.inner.write().await;
        let mut stale = Vec::new();
        for worker in inner.workers.values_mut() {
            if worker.active && now.saturating_sub(worker.last_heartbeat) > timeout_seconds {
                worker.active = false;
                stale.push(worker.worker_id.clone());
            }
        }
        if !stale.is_empty() {
            warn!(workers = ?stale, "Marked workers inactive after missed heartbeats");
        }
        stale
    }

    /// Evicts reservations whose expiry has passed, crediting resources
    /// back. Returns the evicted reservations so callers can retry the
    /// affected tasks.
    pub async fn cleanup_expired_reservations(&self, now: u64) -> Vec<Reservation> {
        let mut inner = self.inner.write().await;

        let expired_ids: Vec<String> = inner
            .reservations
            .values()
            .filter(|r| r.expires_at <= now)
            .map(|r| r.task_id.clone())
            .collect();

        let mut evicted = Vec::with_capacity(expired_ids.len());
        for task_id in expired_ids {
            if let Some(reservation) = inner.reservations.remove(&task_id) {
                if let Some(worker) = inner.workers.get_mut(&reservation.worker_id) {
                    worker.available = worker.available.add(&reservation.resources);
                    worker.assigned_tasks.remove(&task_id);
                }
                warn!(
                    task_id = %reservation.task_id,
                    worker_id = %reservation.worker_id,
                    "Evicted expired reservation"
                );
                evicted.push(reservation);
            }
        }
        evicted
    }

    /// Self-heal pass: recomputes availability as total minus the sum of
    /// held reservations and reports how many workers had drifted.
    pub async fn recompute_ledger(&self) -> usize {
        let mut inner = self.inner.write().await;

        let mut reserved_by_worker: HashMap<String, ResourceSpec> = HashMap::new();
        for reservation in inner.reservations.values() {
            let entry = reserved_by_worker
                .entry(reservation.worker_id.clone())
                .or_default();
            *entry = entry.add(&reservation.resources);
        }

        let mut corrected = 0;
        for worker in inner.workers.values_mut() {
            let reserved = reserved_by_worker
                .get(&worker.worker_id)
                .copied()
                .unwrap_or_default();
            let expected = worker.total.checked_sub(&reserved).unwrap_or_default();
            if !worker.available.approx_eq(&expected) {
                warn!(
                    worker_id = %worker.worker_id,
                    available = %worker.available,
                    expected = %expected,
                    "Reservation ledger drift detected, recomputing"
                );
                worker.available = expected;
                corrected += 1;
            }
        }
        corrected
    }

    /// Copy of the reservation held by a task, if any.
    pub async fn reservation_for(&self, task_id: &str) -> Option<Reservation> {
        let inner = self.inner.read().await;
        inner.reservations.get(task_id).cloned()
    }

    /// Number of active reservations.
    pub async fn reservation_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner.reservations.len()
    }
}

fn sum_reservations(reservations: &HashMap<String, Reservation>, worker_id: &str) -> ResourceSpec {
    reservations
        .values()
        .filter(|r| r.worker_id == worker_id)
        .fold(ResourceSpec::default(), |acc, r| acc.add(&r.resources))
}

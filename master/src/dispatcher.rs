//! Queue drain loop: selection, reservation, and worker hand-off
//!
//! The dispatcher is a single cooperative loop. It peeks the head task,
//! snapshots the worker fleet, asks the scheduler for a worker, reserves
//! resources up-front, and only removes the task from the queue once the
//! worker has acknowledged the assignment. Reservation deducts resources
//! before the RPC goes out, so dispatch can never overtake a worker's
//! capacity.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use shared::api::AssignTaskRequest;
use shared::model::{Task, TaskStatus};
use shared::utils::current_timestamp;

use crate::database::MasterDatabase;
use crate::queue::TaskQueue;
use crate::registry::{RegistryError, WorkerRegistry};
use crate::scheduler::{CandidateWorker, Selector, TaskView, WorkerSelector};
use crate::tasks::TaskTable;
use crate::tau::TauStore;
use crate::telemetry::TelemetryManager;
use crate::worker_client::WorkerRpc;

/// Machine-readable failure reason for tasks that ran out of dispatch
/// retries.
pub const REASON_UNSCHEDULABLE: &str = "unschedulable";

/// Dispatch tuning, copied from the master configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Timeout on the AssignTask RPC
    pub rpc_timeout_seconds: u64,
    /// Margin added to the RPC timeout for the initial reservation TTL
    pub reservation_margin_seconds: u64,
    /// Reservation TTL once the worker has accepted
    pub running_reservation_ttl_seconds: u64,
    /// Failed dispatch attempts before the task is marked failed
    pub retry_limit: u32,
    /// Sleep between attempts when no worker can take the head task
    pub backoff: Duration,
}

/// What one dispatch attempt did, for the run loop and for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Queue was empty
    Idle,
    /// Head entry was stale (task no longer queued) and was discarded
    Skipped,
    /// Scheduler returned empty or reservation kept failing; task stays
    /// queued
    NoWorker,
    /// Worker accepted; task is running
    Dispatched,
    /// Worker refused or the RPC failed; task re-enqueued with a bumped
    /// retry count
    Requeued,
    /// Retry budget exhausted; task marked failed
    Failed,
}

/// The dispatch loop and its collaborators.
pub struct Dispatcher<C: WorkerRpc> {
    queue: Arc<TaskQueue>,
    table: Arc<TaskTable>,
    registry: Arc<WorkerRegistry>,
    tau: Arc<TauStore>,
    selector: Arc<Selector>,
    telemetry: Arc<TelemetryManager>,
    database: Arc<Mutex<MasterDatabase>>,
    client: C,
    config: DispatchConfig,
}

impl<C: WorkerRpc> Dispatcher<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<TaskQueue>,
        table: Arc<TaskTable>,
        registry: Arc<WorkerRegistry>,
        tau: Arc<TauStore>,
        selector: Arc<Selector>,
        telemetry: Arc<TelemetryManager>,
        database: Arc<Mutex<MasterDatabase>>,
        client: C,
        config: DispatchConfig,
    ) -> Self {
        Self {
            queue,
            table,
            registry,
            tau,
            selector,
            telemetry,
            database,
            client,
            config,
        }
    }

    /// Runs until the shutdown signal arrives.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Dispatcher started");
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Dispatcher received shutdown signal");
                    break;
                }
                _ = self.queue.wait_for_task(self.config.backoff) => {
                    match self.dispatch_next().await {
                        DispatchOutcome::NoWorker => {
                            // Nothing can take the head task right now; back
                            // off with jitter so retries don't align with
                            // heartbeat cadence.
                            let jitter = rand::rng().random_range(0..100);
                            tokio::time::sleep(
                                self.config.backoff + Duration::from_millis(jitter),
                            )
                            .await;
                        }
                        DispatchOutcome::Idle => {}
                        _ => {
                            // Keep draining while dispatches succeed; the
                            // loop re-enters immediately on the next pass.
                        }
                    }
                }
            }
        }
        info!("Dispatcher stopped");
    }

    /// One pass of the dispatch state machine over the head task.
    pub async fn dispatch_next(&self) -> DispatchOutcome {
        let Some(head) = self.queue.peek().await else {
            return DispatchOutcome::Idle;
        };

        // The queue entry is a snapshot; the table is authoritative. A task
        // cancelled while waiting is discarded here.
        let Some(task) = self.table.get(&head.id).await else {
            warn!(task_id = %head.id, "Queued task missing from table, discarding");
            self.queue.remove(&head.id).await;
            return DispatchOutcome::Skipped;
        };
        if task.status != TaskStatus::Queued {
            debug!(task_id = %task.id, status = %task.status, "Head task no longer queued, discarding");
            self.queue.remove(&task.id).await;
            return DispatchOutcome::Skipped;
        }

        let now = current_timestamp();
        let view = TaskView::build(&task, &self.tau, now).await;

        // Reservation can race with other resource movements; retry
        // selection a few times against fresh snapshots before giving up
        // this round.
        for _attempt in 0..3 {
            let workers = self.registry.snapshot().await;
            let mut candidates = Vec::with_capacity(workers.len());
            for worker in &workers {
                let load = self
                    .telemetry
                    .load_of(&worker.worker_id)
                    .await
                    .unwrap_or(0.0);
                candidates.push(CandidateWorker::from_worker(worker, load));
            }

            let Some(worker_id) = self.selector.select_worker(&view, &candidates) else {
                return DispatchOutcome::NoWorker;
            };

            let ttl = self.config.rpc_timeout_seconds + self.config.reservation_margin_seconds;
            match self
                .registry
                .reserve(&task.id, &worker_id, task.resources, ttl, now)
                .await
            {
                Ok(()) => {
                    let address = candidates
                        .iter()
                        .find(|c| c.worker_id == worker_id)
                        .map(|c| c.address.clone())
                        .unwrap_or_default();
                    return self.hand_off(&task, &worker_id, &address, now).await;
                }
                Err(RegistryError::ResourceShortage { .. }) => {
                    // The last-resort round-robin choice or a raced worker;
                    // take a fresh snapshot and try again.
                    debug!(
                        task_id = %task.id,
                        worker_id = %worker_id,
                        "Reservation failed on capacity, retrying selection"
                    );
                    continue;
                }
                Err(RegistryError::DuplicateReservation(_)) => {
                    // A previous attempt left its hold behind; release and
                    // retry next round.
                    warn!(task_id = %task.id, "Stale reservation found, releasing");
                    let _ = self.registry.release(&task.id).await;
                    continue;
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "Reservation failed");
                    continue;
                }
            }
        }

        DispatchOutcome::NoWorker
    }

    /// Steps 7-9: persist the assignment, call the worker, and finish the
    /// hand-off or roll it back.
    async fn hand_off(
        &self,
        task: &Task,
        worker_id: &str,
        address: &str,
        now: u64,
    ) -> DispatchOutcome {
        let assigned = match self.table.set_assigned(&task.id, worker_id, now).await {
            Ok(task) => task,
            Err(e) => {
                // Status moved under us (e.g. cancellation); undo the hold.
                warn!(task_id = %task.id, error = %e, "Could not mark task assigned");
                let _ = self.registry.release(&task.id).await;
                self.queue.remove(&task.id).await;
                return DispatchOutcome::Skipped;
            }
        };

        let load_at_dispatch = self.telemetry.load_of(worker_id).await.unwrap_or(0.0);
        self.persist_assignment(&assigned, worker_id, load_at_dispatch, now)
            .await;

        let request = AssignTaskRequest {
            task_id: assigned.id.clone(),
            user_id: assigned.user_id.clone(),
            image: assigned.image.clone(),
            command: assigned.command.clone(),
            resources: assigned.resources,
            deadline: assigned.deadline,
        };

        match self.client.assign_task(address, &request).await {
            Ok(ack) if ack.accepted => {
                // The worker is now authoritative for execution. Stretch the
                // reservation past the dispatch window so the scrubber can't
                // reclaim a running task's resources.
                if let Err(e) = self
                    .registry
                    .extend_reservation(
                        &assigned.id,
                        self.config.running_reservation_ttl_seconds,
                        now,
                    )
                    .await
                {
                    warn!(task_id = %assigned.id, error = %e, "Could not extend reservation");
                }

                match self.table.transition(&assigned.id, TaskStatus::Running, now).await {
                    Ok(task) => self.persist_task(&task).await,
                    Err(e) => {
                        error!(task_id = %assigned.id, error = %e, "Could not mark task running")
                    }
                }

                self.queue.remove(&assigned.id).await;
                info!(
                    task_id = %assigned.id,
                    worker_id = %worker_id,
                    load = load_at_dispatch,
                    "Task dispatched and accepted"
                );
                DispatchOutcome::Dispatched
            }
            Ok(ack) => {
                warn!(
                    task_id = %assigned.id,
                    worker_id = %worker_id,
                    message = %ack.message,
                    "Worker refused assignment"
                );
                self.roll_back(&assigned, now, "worker_refused").await
            }
            Err(e) => {
                warn!(
                    task_id = %assigned.id,
                    worker_id = %worker_id,
                    error = %e,
                    "AssignTask RPC failed"
                );
                self.roll_back(&assigned, now, REASON_UNSCHEDULABLE).await
            }
        }
    }

    /// Releases the reservation and either re-enqueues the task or fails it
    /// once the retry budget is spent.
    async fn roll_back(&self, task: &Task, now: u64, reason: &str) -> DispatchOutcome {
        if let Err(e) = self.registry.release(&task.id).await {
            warn!(task_id = %task.id, error = %e, "Could not release reservation");
        }

        let retries = self.table.increment_retry(&task.id).await.unwrap_or(0);

        if retries >= self.config.retry_limit {
            self.queue.remove(&task.id).await;
            match self.table.mark_failed(&task.id, reason, now).await {
                Ok(task) => {
                    self.persist_task(&task).await;
                    warn!(
                        task_id = %task.id,
                        retries,
                        reason = %reason,
                        "Task failed after exhausting dispatch retries"
                    );
                    DispatchOutcome::Failed
                }
                Err(e) => {
                    error!(task_id = %task.id, error = %e, "Could not mark task failed");
                    DispatchOutcome::Failed
                }
            }
        } else {
            match self.table.transition(&task.id, TaskStatus::Queued, now).await {
                Ok(updated) => {
                    // Move the entry to its sort position with the bumped
                    // retry count; the old queue entry still holds the
                    // pre-assignment snapshot.
                    self.queue.remove(&updated.id).await;
                    self.persist_task(&updated).await;
                    self.queue.enqueue(updated).await;
                    DispatchOutcome::Requeued
                }
                Err(e) => {
                    error!(task_id = %task.id, error = %e, "Could not re-enqueue task");
                    DispatchOutcome::Failed
                }
            }
        }
    }

    /// Best-effort persistence of the assignment decision; in-memory state
    /// stays authoritative when the store write fails.
    async fn persist_assignment(&self, task: &Task, worker_id: &str, load: f64, now: u64) {
        self.persist_task(task).await;
        let assignment_id = uuid::Uuid::new_v4().to_string();
        let mut db = self.database.lock().await;
        if let Err(e) = db
            .insert_assignment(&assignment_id, &task.id, worker_id, now, load)
            .await
        {
            error!(task_id = %task.id, error = %e, "Failed to persist assignment record");
        }
    }

    /// Best-effort persistence of a task record.
    async fn persist_task(&self, task: &Task) {
        let mut db = self.database.lock().await;
        if let Err(e) = db.upsert_task(task).await {
            error!(task_id = %task.id, error = %e, "Failed to persist task record");
        }
    }
}

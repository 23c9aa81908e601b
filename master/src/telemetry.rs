//! Per-worker telemetry pipeline: ingestion, snapshots, and fan-out
//!
//! One dedicated loop per attached worker drains a bounded sample queue,
//! maintains the worker's latest snapshot and rolling load window, and
//! forwards processed snapshots to a single fan-out loop that serves
//! subscribers. The heartbeat RPC handler only pushes into the bounded
//! queue: it never blocks on downstream processing, and when the queue is
//! full the oldest sample is dropped and a counter incremented.
//!
//! Ordering: samples for one worker reach every subscriber in ingestion
//! order. Nothing is promised across workers.

use serde::Serialize;
use shared::model::TelemetrySample;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Tuning knobs for the pipeline, copied from the master configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Bounded per-worker sample queue capacity
    pub channel_capacity: usize,
    /// Rolling window length in samples
    pub window_samples: usize,
    /// Outbound channel capacity per subscriber
    pub subscriber_capacity: usize,
    /// How long a subscriber may stay blocked before being dropped
    pub subscriber_grace: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 100,
            window_samples: 60,
            subscriber_capacity: 64,
            subscriber_grace: Duration::from_secs(5),
        }
    }
}

/// Processed per-worker telemetry, also the JSON snapshot sent to
/// subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerTelemetry {
    pub worker_id: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub gpu_percent: f64,
    /// Normalized load at the most recent sample: max(cpu, mem, gpu)/100
    pub load: f64,
    /// Running container count from the latest heartbeat
    pub running_tasks: usize,
    /// Cumulative seconds spent with load above 1.0
    pub overload_seconds: f64,
    /// Samples dropped at ingestion because the queue was full
    pub dropped_samples: u64,
    /// Samples currently in the rolling window
    pub window_len: usize,
    /// Ingestion time of the latest sample (Unix seconds)
    pub timestamp: u64,
    /// Ingestion time of the latest sample, human-readable UTC
    pub timestamp_utc: String,
}

/// What a subscriber wants to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionFilter {
    All,
    Worker(String),
}

impl SubscriptionFilter {
    fn matches(&self, worker_id: &str) -> bool {
        match self {
            SubscriptionFilter::All => true,
            SubscriptionFilter::Worker(id) => id == worker_id,
        }
    }
}

/// Handle returned to a subscriber: snapshots arrive as JSON strings on the
/// receiver. Dropping the receiver unsubscribes on the next fan-out pass.
pub struct Subscription {
    #[allow(dead_code)]
    pub id: u64,
    pub receiver: mpsc::Receiver<String>,
}

struct SubscriberSlot {
    id: u64,
    filter: SubscriptionFilter,
    sender: mpsc::Sender<String>,
    /// Set the first time a send finds the channel full; cleared on success
    blocked_since: Option<Instant>,
}

/// Accumulated state for one worker, maintained by its pipeline loop.
#[derive(Default)]
struct WorkerState {
    latest: Option<TelemetrySample>,
    window: VecDeque<(u64, f64)>,
    overload_seconds: f64,
}

struct WorkerPipe {
    queue: Arc<std::sync::Mutex<VecDeque<TelemetrySample>>>,
    notify: Arc<Notify>,
    dropped: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

/// The telemetry manager: one pipeline per attached worker plus one fan-out
/// loop for subscribers.
pub struct TelemetryManager {
    config: TelemetryConfig,
    pipes: RwLock<HashMap<String, WorkerPipe>>,
    state: Arc<RwLock<HashMap<String, WorkerState>>>,
    snapshots: Arc<RwLock<HashMap<String, WorkerTelemetry>>>,
    fanout_tx: mpsc::Sender<WorkerTelemetry>,
    fanout_handle: Mutex<Option<JoinHandle<()>>>,
    subscribers: Arc<Mutex<Vec<SubscriberSlot>>>,
    next_subscriber_id: AtomicU64,
    shutdown_tx: broadcast::Sender<()>,
}

impl TelemetryManager {
    /// Creates the manager and starts the fan-out loop.
    pub fn new(config: TelemetryConfig) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (fanout_tx, fanout_rx) = mpsc::channel(config.channel_capacity.max(16) * 4);

        let manager = Arc::new(Self {
            config,
            pipes: RwLock::new(HashMap::new()),
            state: Arc::new(RwLock::new(HashMap::new())),
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            fanout_tx,
            fanout_handle: Mutex::new(None),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_subscriber_id: AtomicU64::new(1),
            shutdown_tx,
        });

        let fanout_handle = tokio::spawn(Self::fanout_loop(
            fanout_rx,
            Arc::clone(&manager.subscribers),
            manager.config.subscriber_grace,
            manager.shutdown_tx.subscribe(),
        ));

        {
            // new() runs before any await point in the caller, so this
            // try_lock cannot contend.
            let mut slot = manager
                .fanout_handle
                .try_lock()
                .expect("fanout handle lock free at construction");
            *slot = Some(fanout_handle);
        }

        manager
    }

    /// Starts a dedicated pipeline loop for a worker. Idempotent: an
    /// already-attached worker keeps its existing loop and state.
    pub async fn attach_worker(self: &Arc<Self>, worker_id: &str) {
        let mut pipes = self.pipes.write().await;
        if pipes.contains_key(worker_id) {
            return;
        }

        let queue = Arc::new(std::sync::Mutex::new(VecDeque::new()));
        let notify = Arc::new(Notify::new());
        let dropped = Arc::new(AtomicU64::new(0));

        let handle = tokio::spawn(Self::worker_loop(
            worker_id.to_string(),
            Arc::clone(&queue),
            Arc::clone(&notify),
            Arc::clone(&dropped),
            Arc::clone(&self.state),
            Arc::clone(&self.snapshots),
            self.fanout_tx.clone(),
            self.config.window_samples,
            self.shutdown_tx.subscribe(),
        ));

        pipes.insert(
            worker_id.to_string(),
            WorkerPipe {
                queue,
                notify,
                dropped,
                handle,
            },
        );

        self.state
            .write()
            .await
            .entry(worker_id.to_string())
            .or_default();

        info!(worker_id = %worker_id, "Telemetry pipeline attached");
    }

    /// Stops a worker's pipeline loop. The latest snapshot is retained for
    /// diagnostics.
    #[allow(dead_code)]
    pub async fn detach_worker(&self, worker_id: &str) {
        let mut pipes = self.pipes.write().await;
        if let Some(pipe) = pipes.remove(worker_id) {
            pipe.handle.abort();
            info!(worker_id = %worker_id, "Telemetry pipeline detached");
        }
    }

    /// Non-blocking ingestion called from the heartbeat RPC handler.
    ///
    /// Pushes into the worker's bounded queue; when full, the oldest queued
    /// sample is dropped and the drop counter incremented. Returns false
    /// for workers without an attached pipeline.
    pub async fn ingest(&self, sample: TelemetrySample) -> bool {
        let pipes = self.pipes.read().await;
        let Some(pipe) = pipes.get(&sample.worker_id) else {
            debug!(worker_id = %sample.worker_id, "Dropping sample for unattached worker");
            return false;
        };

        {
            let mut queue = pipe
                .queue
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            queue.push_back(sample);
            if queue.len() > self.config.channel_capacity {
                queue.pop_front();
                pipe.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        pipe.notify.notify_one();
        true
    }

    /// Latest processed snapshot for one worker.
    pub async fn latest(&self, worker_id: &str) -> Option<WorkerTelemetry> {
        let snapshots = self.snapshots.read().await;
        snapshots.get(worker_id).cloned()
    }

    /// Latest normalized load for one worker, if any sample has arrived.
    pub async fn load_of(&self, worker_id: &str) -> Option<f64> {
        let snapshots = self.snapshots.read().await;
        snapshots.get(worker_id).map(|t| t.load)
    }

    /// Latest snapshots for every worker that has ever reported.
    pub async fn snapshot_all(&self) -> Vec<WorkerTelemetry> {
        let snapshots = self.snapshots.read().await;
        let mut all: Vec<WorkerTelemetry> = snapshots.values().cloned().collect();
        all.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        all
    }

    /// Total samples dropped at ingestion for one worker.
    #[allow(dead_code)]
    pub async fn dropped_samples(&self, worker_id: &str) -> u64 {
        let pipes = self.pipes.read().await;
        pipes
            .get(worker_id)
            .map(|p| p.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Registers a subscriber for all workers or a single worker id.
    pub async fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.config.subscriber_capacity);
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.lock().await;
        subscribers.push(SubscriberSlot {
            id,
            filter,
            sender,
            blocked_since: None,
        });
        debug!(subscriber_id = id, "Telemetry subscriber registered");
        Subscription { id, receiver }
    }

    /// Number of live subscribers, as of the last fan-out pass.
    #[allow(dead_code)]
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Stops every loop, draining queued samples first.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(());

        let mut pipes = self.pipes.write().await;
        for (worker_id, pipe) in pipes.drain() {
            if let Err(e) = pipe.handle.await {
                if !e.is_cancelled() {
                    warn!(worker_id = %worker_id, error = %e, "Telemetry pipeline ended abnormally");
                }
            }
        }
        drop(pipes);

        let handle = {
            let mut slot = self.fanout_handle.lock().await;
            slot.take()
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Telemetry fan-out loop ended abnormally");
                }
            }
        }

        info!("Telemetry manager closed");
    }

    /// Dedicated loop for one worker: drains the bounded queue, folds each
    /// sample into the worker's state, and forwards the processed snapshot
    /// to the fan-out loop.
    #[allow(clippy::too_many_arguments)]
    async fn worker_loop(
        worker_id: String,
        queue: Arc<std::sync::Mutex<VecDeque<TelemetrySample>>>,
        notify: Arc<Notify>,
        dropped: Arc<AtomicU64>,
        state: Arc<RwLock<HashMap<String, WorkerState>>>,
        snapshots: Arc<RwLock<HashMap<String, WorkerTelemetry>>>,
        fanout_tx: mpsc::Sender<WorkerTelemetry>,
        window_samples: usize,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = notify.notified() => {
                    Self::drain_queue(
                        &worker_id, &queue, &dropped, &state, &snapshots,
                        &fanout_tx, window_samples,
                    )
                    .await;
                }
                _ = shutdown_rx.recv() => {
                    // Drain whatever is still queued before stopping.
                    Self::drain_queue(
                        &worker_id, &queue, &dropped, &state, &snapshots,
                        &fanout_tx, window_samples,
                    )
                    .await;
                    debug!(worker_id = %worker_id, "Telemetry pipeline received shutdown signal");
                    break;
                }
            }
        }
    }

    async fn drain_queue(
        worker_id: &str,
        queue: &Arc<std::sync::Mutex<VecDeque<TelemetrySample>>>,
        dropped: &Arc<AtomicU64>,
        state: &Arc<RwLock<HashMap<String, WorkerState>>>,
        snapshots: &Arc<RwLock<HashMap<String, WorkerTelemetry>>>,
        fanout_tx: &mpsc::Sender<WorkerTelemetry>,
        window_samples: usize,
    ) {
        loop {
            let sample = {
                let mut queue = queue
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                queue.pop_front()
            };
            let Some(sample) = sample else { break };

            let telemetry = {
                let mut state_map = state.write().await;
                let worker_state = state_map.entry(worker_id.to_string()).or_default();
                Self::apply_sample(
                    worker_state,
                    sample,
                    window_samples,
                    dropped.load(Ordering::Relaxed),
                )
            };

            {
                let mut snapshot_map = snapshots.write().await;
                snapshot_map.insert(worker_id.to_string(), telemetry.clone());
            }

            // Never block the pipeline on fan-out; a full or closed channel
            // loses the broadcast but the snapshot store already has the
            // latest state.
            match fanout_tx.try_send(telemetry) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(worker_id = %worker_id, "Fan-out channel full, snapshot not broadcast");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
    }

    /// Folds one sample into the worker state and produces the snapshot.
    fn apply_sample(
        state: &mut WorkerState,
        sample: TelemetrySample,
        window_samples: usize,
        dropped: u64,
    ) -> WorkerTelemetry {
        let load = sample.load();

        // Overload time integrates the interval between samples while the
        // previous load was above 1.0.
        if let Some(previous) = &state.latest {
            if previous.load() > 1.0 {
                let dt = sample.timestamp.saturating_sub(previous.timestamp);
                state.overload_seconds += dt as f64;
            }
        }

        state.window.push_back((sample.timestamp, load));
        while state.window.len() > window_samples {
            state.window.pop_front();
        }

        let timestamp_utc = chrono::DateTime::from_timestamp(sample.timestamp as i64, 0)
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            .unwrap_or_default();

        let telemetry = WorkerTelemetry {
            worker_id: sample.worker_id.clone(),
            cpu_percent: sample.cpu_percent,
            memory_percent: sample.memory_percent,
            gpu_percent: sample.gpu_percent,
            load,
            running_tasks: sample.running_tasks.len(),
            overload_seconds: state.overload_seconds,
            dropped_samples: dropped,
            window_len: state.window.len(),
            timestamp: sample.timestamp,
            timestamp_utc,
        };

        state.latest = Some(sample);
        telemetry
    }

    /// Single fan-out loop: distributes snapshots to subscribers over their
    /// bounded channels. A subscriber that stays full past the grace period
    /// is dropped; everyone else is unaffected.
    async fn fanout_loop(
        mut fanout_rx: mpsc::Receiver<WorkerTelemetry>,
        subscribers: Arc<Mutex<Vec<SubscriberSlot>>>,
        grace: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                received = fanout_rx.recv() => {
                    let Some(telemetry) = received else { break };
                    let payload = match serde_json::to_string(&telemetry) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(error = %e, "Failed to serialize telemetry snapshot");
                            continue;
                        }
                    };

                    let mut slots = subscribers.lock().await;
                    slots.retain_mut(|slot| {
                        if !slot.filter.matches(&telemetry.worker_id) {
                            return true;
                        }
                        match slot.sender.try_send(payload.clone()) {
                            Ok(()) => {
                                slot.blocked_since = None;
                                true
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => {
                                debug!(subscriber_id = slot.id, "Telemetry subscriber went away");
                                false
                            }
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                let blocked_since =
                                    *slot.blocked_since.get_or_insert_with(Instant::now);
                                if blocked_since.elapsed() > grace {
                                    warn!(
                                        subscriber_id = slot.id,
                                        "Dropping telemetry subscriber blocked past grace period"
                                    );
                                    false
                                } else {
                                    true
                                }
                            }
                        }
                    });
                }
                _ = shutdown_rx.recv() => {
                    debug!("Telemetry fan-out loop received shutdown signal");
                    break;
                }
            }
        }
    }
}

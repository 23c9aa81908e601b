//! Docker Task Orchestration Master
//!
//! The master accepts task submissions, maintains the authoritative worker
//! registry via heartbeats, selects a worker for each task with a
//! risk-aware scheduler, dispatches assignments to workers, processes
//! completion reports, and streams per-worker telemetry to observers.
// This is the main entry point for the master application. It's responsible
// for:
// - Initializing logging and configuration.
// - Constructing the core components and rebuilding state from the store.
// - Spawning the dispatcher, scrubber, and parameter-reload loops.
// - Starting the HTTP API and handling graceful shutdown.

// Use jemalloc as the global allocator for better performance
#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// Master version from Cargo.toml
const MASTER_VERSION: &str = env!("CARGO_PKG_VERSION");

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

mod api;
mod completion;
mod config;
mod database;
mod dispatcher;
mod files;
mod params;
mod queue;
mod registry;
mod scheduler;
mod tasks;
mod tau;
mod telemetry;
mod worker_client;

#[cfg(test)]
mod tests;

use completion::CompletionHandler;
use config::ConfigManager;
use database::MasterDatabase;
use dispatcher::{DispatchConfig, Dispatcher};
use files::FileStore;
use params::ParamsStore;
use queue::TaskQueue;
use registry::WorkerRegistry;
use scheduler::Selector;
use shared::model::TaskStatus;
use shared::utils::current_timestamp;
use tasks::{LogStore, TaskTable};
use tau::TauStore;
use telemetry::{SubscriptionFilter, TelemetryConfig, TelemetryManager};
use worker_client::HttpWorkerClient;

/// Command-line arguments for the master
#[derive(Parser, Debug)]
#[command(name = "master")]
#[command(about = "Control plane for distributed Docker task orchestration", long_about = None)]
struct CliArgs {
    /// Path to the master configuration file (master.toml)
    #[arg(value_name = "CONFIG_FILE")]
    config_file: PathBuf,

    /// Override the listen address from config file
    #[arg(long = "listen-address", value_name = "ADDRESS")]
    listen_address: Option<String>,

    /// Override the API key from config file
    #[arg(long = "api-key", value_name = "KEY")]
    api_key: Option<String>,

    /// Override the data directory from config file
    #[arg(long = "data-dir", value_name = "DIR")]
    data_dir: Option<String>,

    /// Override the scheduler parameter file path from config file
    #[arg(long = "params-file", value_name = "FILE")]
    params_file: Option<String>,

    /// Override the dispatch retry bound from config file
    #[arg(long = "dispatch-retry-limit", value_name = "COUNT")]
    dispatch_retry_limit: Option<u32>,
}

/// The main application structure for the master.
/// It owns the core components; every loop and handler receives them
/// explicitly, so there is no module-level mutable state.
pub struct Master {
    /// The configuration manager, responsible for loading and accessing
    /// master settings.
    pub config_manager: Arc<Mutex<ConfigManager>>,
    /// The address on which the HTTP API listens.
    listen_address: SocketAddr,
    /// Database handle, shared with the API and the loops.
    database: Option<Arc<Mutex<MasterDatabase>>>,
    /// Telemetry manager, kept for draining at shutdown.
    telemetry: Option<Arc<TelemetryManager>>,
    /// Task queue, drained (and counted) at shutdown; entries stay
    /// persisted as queued and reload on the next start.
    queue: Option<Arc<TaskQueue>>,
    /// Handles to the background loops for graceful shutdown.
    dispatcher_task_handle: Option<JoinHandle<()>>,
    scrubber_task_handle: Option<JoinHandle<()>>,
    params_reload_task_handle: Option<JoinHandle<()>>,
    wal_checkpoint_task_handle: Option<JoinHandle<()>>,
    /// Shutdown signal sender for notifying background tasks.
    shutdown_tx: Option<tokio::sync::broadcast::Sender<()>>,
}

impl Master {
    /// Creates a new master instance from a configuration file path.
    pub fn new(config_path: PathBuf) -> Result<Self> {
        let config_manager = ConfigManager::new(config_path)?;
        let master_config = config_manager.master_config.as_ref().expect(
            "Master configuration not loaded. This should not happen as config is loaded in new().",
        );

        let listen_address: SocketAddr = master_config.listen_address.parse().map_err(|e| {
            anyhow::anyhow!(
                "Invalid listen address '{}': {}",
                master_config.listen_address,
                e
            )
        })?;

        Ok(Self {
            config_manager: Arc::new(Mutex::new(config_manager)),
            listen_address,
            database: None,
            telemetry: None,
            queue: None,
            dispatcher_task_handle: None,
            scrubber_task_handle: None,
            params_reload_task_handle: None,
            wal_checkpoint_task_handle: None,
            shutdown_tx: None,
        })
    }

    /// Starts the master and runs until the HTTP server exits.
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting Docker Task Orchestration Master");

        let master_config = {
            let config_manager = self.config_manager.lock().await;
            config_manager.master_config.as_ref()
                .expect("Master configuration not loaded. This should not happen as config is loaded in new().")
                .clone()
        };

        info!(
            listen_address = %self.listen_address,
            data_dir = %master_config.data_dir,
            params_file = %master_config.params_file,
            "Master configuration loaded"
        );

        // Initialize the database. Unreachable storage at startup is fatal;
        // once serving, store failures are logged and survived.
        info!("Initializing database");
        let data_dir = PathBuf::from(&master_config.data_dir);
        let mut database =
            MasterDatabase::new(&data_dir).context("Failed to create database manager")?;
        database
            .initialize()
            .await
            .context("Failed to initialize database")?;
        info!("Database initialized successfully");

        // Core components.
        let registry = Arc::new(WorkerRegistry::new());
        let queue = Arc::new(TaskQueue::new());
        let table = Arc::new(TaskTable::new());
        let tau = Arc::new(TauStore::new(master_config.tau_smoothing_factor));
        let logs = Arc::new(LogStore::new(master_config.log_truncate_bytes));
        let files =
            Arc::new(FileStore::new(&data_dir).context("Failed to create file store")?);
        let params = Arc::new(ParamsStore::load_or_default(&master_config.params_file));
        let telemetry = TelemetryManager::new(TelemetryConfig {
            channel_capacity: master_config.telemetry_channel_capacity,
            window_samples: master_config.telemetry_window_samples,
            subscriber_capacity: master_config.subscriber_channel_capacity,
            subscriber_grace: Duration::from_secs(master_config.subscriber_grace_seconds),
        });

        // Rebuild in-memory state from the store.
        rebuild_state(&mut database, &registry, &queue, &table, &tau).await?;

        let database = Arc::new(Mutex::new(database));
        self.database = Some(Arc::clone(&database));
        self.telemetry = Some(Arc::clone(&telemetry));
        self.queue = Some(Arc::clone(&queue));

        let worker_client = Arc::new(
            HttpWorkerClient::new(
                Duration::from_secs(master_config.dispatch_rpc_timeout_seconds),
                master_config.api_key.clone(),
            )
            .map_err(|e| anyhow::anyhow!("Failed to build worker RPC client: {}", e))?,
        );

        let completion = Arc::new(CompletionHandler::new(
            Arc::clone(&table),
            Arc::clone(&registry),
            Arc::clone(&tau),
            Arc::clone(&logs),
            Arc::clone(&database),
            master_config.log_truncate_bytes,
        ));

        // Create shutdown broadcast channel
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        // Dispatcher loop.
        let dispatcher = Dispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&table),
            Arc::clone(&registry),
            Arc::clone(&tau),
            Arc::new(Selector::risk_aware(Arc::clone(&params))),
            Arc::clone(&telemetry),
            Arc::clone(&database),
            HttpWorkerClient::new(
                Duration::from_secs(master_config.dispatch_rpc_timeout_seconds),
                master_config.api_key.clone(),
            )
            .map_err(|e| anyhow::anyhow!("Failed to build dispatch RPC client: {}", e))?,
            DispatchConfig {
                rpc_timeout_seconds: master_config.dispatch_rpc_timeout_seconds,
                reservation_margin_seconds: master_config.reservation_margin_seconds,
                running_reservation_ttl_seconds: master_config.running_reservation_ttl_seconds,
                retry_limit: master_config.dispatch_retry_limit,
                backoff: Duration::from_millis(master_config.queue_poll_backoff_ms),
            },
        );
        let dispatcher_shutdown_rx = shutdown_tx.subscribe();
        let dispatcher_task = tokio::spawn(async move {
            dispatcher.run(dispatcher_shutdown_rx).await;
        });

        // Debug observer over the subscription surface: every processed
        // telemetry snapshot shows up in the logs at debug level.
        let mut observer = telemetry.subscribe(SubscriptionFilter::All).await;
        let mut observer_shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = observer.receiver.recv() => {
                        match received {
                            Some(snapshot) => debug!(snapshot = %snapshot, "Telemetry snapshot"),
                            None => break,
                        }
                    }
                    _ = observer_shutdown_rx.recv() => break,
                }
            }
        });

        // Application state for the HTTP surface.
        let app_state = api::AppState {
            config: Arc::new(master_config.clone()),
            rate_limiter: api::WorkerRateLimiter::new(
                Duration::from_secs(master_config.rate_limit_window_seconds as u64),
                master_config.rate_limit_max_requests,
            ),
            registry: Arc::clone(&registry),
            queue: Arc::clone(&queue),
            table: Arc::clone(&table),
            telemetry: Arc::clone(&telemetry),
            tau: Arc::clone(&tau),
            logs: Arc::clone(&logs),
            files: Arc::clone(&files),
            completion: Arc::clone(&completion),
            database: Arc::clone(&database),
            worker_client: Arc::clone(&worker_client),
        };
        let rate_limiter = app_state.rate_limiter.clone();

        // Scrubber loop: stale workers, expired reservations, ledger
        // self-heal, and rate limiter cleanup.
        let scrubber_registry = Arc::clone(&registry);
        let scrubber_table = Arc::clone(&table);
        let scrubber_queue = Arc::clone(&queue);
        let scrubber_database = Arc::clone(&database);
        let scrubber_interval = master_config.scrubber_interval_seconds;
        let inactive_timeout = master_config.worker_inactive_timeout_seconds;
        let mut scrubber_shutdown_rx = shutdown_tx.subscribe();
        let scrubber_task = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(scrubber_interval.max(1)));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        scrub_once(
                            &scrubber_registry,
                            &scrubber_table,
                            &scrubber_queue,
                            &scrubber_database,
                            &rate_limiter,
                            inactive_timeout,
                        )
                        .await;
                    }
                    _ = scrubber_shutdown_rx.recv() => {
                        info!("Scrubber task received shutdown signal");
                        break;
                    }
                }
            }
        });

        // Scheduler parameter reload loop.
        let reload_params = Arc::clone(&params);
        let params_file = master_config.params_file.clone();
        let reload_interval = master_config.params_reload_interval_seconds;
        let mut params_shutdown_rx = shutdown_tx.subscribe();
        let params_reload_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(reload_interval.max(1)));
            // The first tick fires immediately and the initial load already
            // happened; skip it.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match reload_params.reload_from_file(&params_file) {
                            params::ReloadOutcome::Replaced => {
                                info!(path = %params_file, "Scheduler parameters reloaded");
                            }
                            params::ReloadOutcome::Unchanged => {
                                debug!("Scheduler parameter file unchanged");
                            }
                            params::ReloadOutcome::KeptPrevious(reason) => {
                                error!(
                                    path = %params_file,
                                    reason = %reason,
                                    "Scheduler parameter reload failed, keeping previous snapshot"
                                );
                            }
                        }
                    }
                    _ = params_shutdown_rx.recv() => {
                        info!("Parameter reload task received shutdown signal");
                        break;
                    }
                }
            }
        });

        // Periodic WAL checkpoint loop.
        let wal_checkpoint_interval_secs = master_config.wal_checkpoint_interval_seconds;
        let db_for_wal = Arc::clone(&database);
        let mut wal_shutdown_rx = shutdown_tx.subscribe();
        let wal_checkpoint_task = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(wal_checkpoint_interval_secs.max(1)));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let mut db = db_for_wal.lock().await;
                        match db.checkpoint_wal().await {
                            Ok(frames) => {
                                debug!("WAL checkpoint completed: {} frames checkpointed", frames);
                            }
                            Err(e) => {
                                warn!("WAL checkpoint failed: {}", e);
                            }
                        }
                    }
                    _ = wal_shutdown_rx.recv() => {
                        info!("WAL checkpoint task received shutdown signal");
                        break;
                    }
                }
            }
        });

        self.dispatcher_task_handle = Some(dispatcher_task);
        self.scrubber_task_handle = Some(scrubber_task);
        self.params_reload_task_handle = Some(params_reload_task);
        self.wal_checkpoint_task_handle = Some(wal_checkpoint_task);

        // Set up the REST/RPC surface.
        let app = api::create_router(app_state);

        info!("Starting HTTP server on {}", self.listen_address);
        let listener = tokio::net::TcpListener::bind(self.listen_address)
            .await
            .with_context(|| {
                format!(
                    "Failed to bind TCP listener to {}. \
                     Check if port is already in use (EADDRINUSE) or requires elevated permissions (EACCES).",
                    self.listen_address
                )
            })?;

        // Create a shutdown signal receiver for axum
        let shutdown_signal = {
            let mut rx = shutdown_tx.subscribe();
            async move {
                let _ = rx.recv().await;
                info!("HTTP server received shutdown signal");
            }
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        Ok(())
    }

    /// Performs a graceful shutdown of the master.
    ///
    /// Shutdown sequence:
    /// 1. Broadcast the shutdown signal (stops intake and the loops)
    /// 2. Join the dispatcher, scrubber, reload, and WAL loops with the
    ///    configured budget
    /// 3. Drain and close the telemetry pipelines
    /// 4. Close the database connection
    pub async fn shutdown(&mut self) {
        info!("Shutting down Docker Task Orchestration Master gracefully");

        let shutdown_timeout_secs = {
            let config_manager = self.config_manager.lock().await;
            config_manager
                .master_config
                .as_ref()
                .map(|c| c.graceful_shutdown_timeout_seconds)
                .unwrap_or(30)
        };

        if let Some(shutdown_tx) = &self.shutdown_tx {
            if let Err(e) = shutdown_tx.send(()) {
                warn!("Failed to send shutdown signal: {}", e);
            }
        }

        for (name, handle) in [
            ("dispatcher", self.dispatcher_task_handle.take()),
            ("scrubber", self.scrubber_task_handle.take()),
            ("parameter reload", self.params_reload_task_handle.take()),
            ("WAL checkpoint", self.wal_checkpoint_task_handle.take()),
        ] {
            let Some(handle) = handle else { continue };
            info!(
                "Waiting for {} task to complete (timeout: {}s)",
                name, shutdown_timeout_secs
            );
            match tokio::time::timeout(Duration::from_secs(shutdown_timeout_secs), handle).await {
                Ok(Ok(())) => {
                    info!("{} task completed successfully", name);
                }
                Ok(Err(e)) => {
                    warn!("{} task panicked: {}", name, e);
                }
                Err(_) => {
                    warn!("{} task shutdown timeout reached, aborting", name);
                }
            }
        }

        if let Some(queue) = self.queue.take() {
            let pending = queue.drain().await;
            if !pending.is_empty() {
                info!(
                    "Leaving {} queued tasks in the store for the next start",
                    pending.len()
                );
            }
        }

        if let Some(telemetry) = self.telemetry.take() {
            info!("Closing telemetry pipelines");
            match tokio::time::timeout(
                Duration::from_secs(shutdown_timeout_secs),
                telemetry.close(),
            )
            .await
            {
                Ok(()) => info!("Telemetry pipelines closed"),
                Err(_) => warn!("Telemetry close timed out"),
            }
        }

        if let Some(database_arc) = &self.database {
            info!("Closing database connection");
            let mut db = database_arc.lock().await;
            db.close().await;
            info!("Database connection closed");
        }

        info!("Master shutdown complete");
    }
}

/// Rebuilds in-memory state from the durable store at startup:
/// pre-registered workers enter the registry inactive, persisted runtime
/// estimates replace the seeds, and queued tasks re-enter the queue.
async fn rebuild_state(
    database: &mut MasterDatabase,
    registry: &Arc<WorkerRegistry>,
    queue: &Arc<TaskQueue>,
    table: &Arc<TaskTable>,
    tau: &Arc<TauStore>,
) -> Result<()> {
    let workers = database
        .load_preregistered_workers()
        .await
        .context("Failed to load pre-registered workers")?;
    for (worker_id, address) in &workers {
        if let Err(e) = registry.pre_register(worker_id, address).await {
            warn!(worker_id = %worker_id, error = %e, "Skipping stored worker");
        }
    }
    info!("Loaded {} pre-registered workers", workers.len());

    let tau_values = database
        .load_tau_values()
        .await
        .context("Failed to load runtime estimates")?;
    let tau_count = tau_values.len();
    for (task_type, value) in tau_values {
        tau.seed(task_type, value).await;
    }
    info!("Loaded {} persisted runtime estimates", tau_count);

    let queued = database
        .query_tasks_by_status(TaskStatus::Queued)
        .await
        .context("Failed to load queued tasks")?;
    let queued_count = queued.len();
    for task in queued {
        table.insert(task.clone()).await;
        queue.enqueue(task).await;
    }
    info!("Requeued {} tasks from the store", queued_count);

    // Tasks the store saw as dispatched come back for visibility; their
    // workers will re-report or the scrubber will age them out.
    for status in [TaskStatus::Assigned, TaskStatus::Running] {
        let tasks = database
            .query_tasks_by_status(status)
            .await
            .context("Failed to load in-flight tasks")?;
        for task in tasks {
            table.insert(task).await;
        }
    }

    Ok(())
}

/// One scrubber pass: mark silent workers inactive, evict expired
/// reservations (re-queueing their tasks), heal ledger drift, and drop
/// stale rate limiter entries.
async fn scrub_once(
    registry: &Arc<WorkerRegistry>,
    table: &Arc<TaskTable>,
    queue: &Arc<TaskQueue>,
    database: &Arc<Mutex<MasterDatabase>>,
    rate_limiter: &api::WorkerRateLimiter,
    inactive_timeout: u64,
) {
    let now = current_timestamp();

    let stale = registry.cleanup_stale(inactive_timeout, now).await;
    if !stale.is_empty() {
        info!(workers = ?stale, "Workers marked inactive");
    }

    let evicted = registry.cleanup_expired_reservations(now).await;
    for reservation in evicted {
        let Some(task) = table.get(&reservation.task_id).await else {
            continue;
        };
        if task.status != TaskStatus::Assigned {
            continue;
        }
        match table
            .transition(&reservation.task_id, TaskStatus::Queued, now)
            .await
        {
            Ok(updated) => {
                warn!(
                    task_id = %updated.id,
                    worker_id = %reservation.worker_id,
                    "Re-queueing task after reservation expiry"
                );
                {
                    let mut db = database.lock().await;
                    if let Err(e) = db.upsert_task(&updated).await {
                        error!(task_id = %updated.id, error = %e, "Failed to persist re-queued task");
                    }
                }
                queue.enqueue(updated).await;
            }
            Err(e) => {
                error!(
                    task_id = %reservation.task_id,
                    error = %e,
                    "Could not re-queue task after reservation expiry"
                );
            }
        }
    }

    let corrected = registry.recompute_ledger().await;
    if corrected > 0 {
        warn!(workers = corrected, "Healed reservation ledger drift");
    }

    rate_limiter.cleanup_stale_entries().await;
}

/// Sets up signal handlers for graceful shutdown.
/// Returns a future that completes when a shutdown signal is received.
///
/// On Unix systems, handles SIGTERM and SIGINT signals.
/// On non-Unix systems, handles Ctrl+C.
async fn setup_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let sigterm = signal(SignalKind::terminate());
        let sigint = signal(SignalKind::interrupt());

        match (sigterm, sigint) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to register signal handlers: {}", e);
                error!("Falling back to Ctrl+C only");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to wait for Ctrl+C: {}", e);
                } else {
                    info!("Received Ctrl+C");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to receive Ctrl+C signal: {}", e);
        } else {
            info!("Received Ctrl+C");
        }
    }
}

/// Master entry point
///
/// Initializes logging, loads configuration, creates the master instance,
/// and runs until a shutdown signal is received.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging.
    let file_appender = tracing_appender::rolling::daily("./logs", "master.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Configure logging with proper RUST_LOG environment variable handling
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("master=info,shared=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    // Parse command-line arguments
    let cli_args = CliArgs::parse();

    info!(version = MASTER_VERSION, "Docker Task Orchestration Master starting up");
    info!("Configuration file: {}", cli_args.config_file.display());

    // Create and initialize the master. Exit if initialization fails.
    let mut master = match Master::new(cli_args.config_file) {
        Ok(master) => master,
        Err(e) => {
            error!("Failed to initialize master: {}", e);
            std::process::exit(1);
        }
    };

    // Apply command-line overrides if provided
    if cli_args.listen_address.is_some()
        || cli_args.api_key.is_some()
        || cli_args.data_dir.is_some()
        || cli_args.params_file.is_some()
        || cli_args.dispatch_retry_limit.is_some()
    {
        let changed = {
            let mut config_manager = master.config_manager.lock().await;
            match config_manager.override_and_persist_config(
                cli_args.listen_address,
                cli_args.api_key,
                cli_args.data_dir,
                cli_args.params_file,
                cli_args.dispatch_retry_limit,
            ) {
                Ok(changed) => changed,
                Err(e) => {
                    error!("Failed to apply configuration overrides: {}", e);
                    std::process::exit(1);
                }
            }
        };

        if changed {
            info!("Configuration overrides applied and persisted to disk");
            let master_config = {
                let config_manager = master.config_manager.lock().await;
                config_manager.master_config.as_ref()
                    .expect("Master configuration not loaded. This should not happen as config is loaded in new().")
                    .clone()
            };
            master.listen_address = master_config
                .listen_address
                .parse()
                .map_err(|e| {
                    error!("Invalid listen address after override: {}", e);
                    std::process::exit(1);
                })
                .unwrap();
        } else {
            info!("Command-line values match existing config, no changes needed");
        }
    }

    // Run the master and the shutdown signal handler concurrently.
    tokio::select! {
        result = master.run() => {
            if let Err(e) = result {
                error!("Master error: {}", e);
                std::process::exit(1);
            }
        }
        _ = setup_shutdown_signal() => {
            info!("Shutdown signal received, initiating graceful shutdown");
        }
    }

    // Perform graceful shutdown.
    master.shutdown().await;
    info!("Master shutdown complete");
    Ok(())
}

//! Tests for the dispatch loop, driven through a stub worker RPC

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use shared::api::{AssignAck, AssignTaskRequest};
use shared::model::{ResourceSpec, TaskStatus, TaskType};
use tempfile::TempDir;
use tokio::sync::Mutex;

use crate::database::MasterDatabase;
use crate::dispatcher::{DispatchConfig, DispatchOutcome, Dispatcher};
use crate::params::ParamsStore;
use crate::queue::TaskQueue;
use crate::registry::WorkerRegistry;
use crate::scheduler::Selector;
use crate::tasks::TaskTable;
use crate::tau::TauStore;
use crate::telemetry::{TelemetryConfig, TelemetryManager};
use crate::worker_client::{WorkerRpc, WorkerRpcError};

use super::support::{queued_task, resources};

#[derive(Clone, Copy, PartialEq)]
enum StubMode {
    Accept,
    Refuse,
    Fail,
}

/// Worker RPC stand-in that records calls and answers per the configured
/// mode.
struct StubWorkerRpc {
    mode: StubMode,
    calls: Arc<StdMutex<Vec<(String, String)>>>,
}

impl StubWorkerRpc {
    fn new(mode: StubMode) -> Self {
        Self {
            mode,
            calls: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl WorkerRpc for StubWorkerRpc {
    async fn assign_task(
        &self,
        address: &str,
        request: &AssignTaskRequest,
    ) -> Result<AssignAck, WorkerRpcError> {
        self.calls
            .lock()
            .unwrap()
            .push((address.to_string(), request.task_id.clone()));
        match self.mode {
            StubMode::Accept => Ok(AssignAck {
                accepted: true,
                message: String::new(),
            }),
            StubMode::Refuse => Ok(AssignAck {
                accepted: false,
                message: "at capacity".to_string(),
            }),
            StubMode::Fail => Err(WorkerRpcError::Timeout),
        }
    }

    async fn cancel_task(&self, _address: &str, _task_id: &str) -> Result<(), WorkerRpcError> {
        Ok(())
    }
}

struct Fixture {
    _dir: TempDir,
    dispatcher: Dispatcher<StubWorkerRpc>,
    queue: Arc<TaskQueue>,
    table: Arc<TaskTable>,
    registry: Arc<WorkerRegistry>,
    database: Arc<Mutex<MasterDatabase>>,
    calls: Arc<StdMutex<Vec<(String, String)>>>,
}

async fn fixture(mode: StubMode, retry_limit: u32) -> Fixture {
    let dir = TempDir::new().unwrap();
    let mut db = MasterDatabase::new(dir.path()).unwrap();
    db.initialize().await.unwrap();
    let database = Arc::new(Mutex::new(db));

    let queue = Arc::new(TaskQueue::new());
    let table = Arc::new(TaskTable::new());
    let registry = Arc::new(WorkerRegistry::new());
    let tau = Arc::new(TauStore::new(0.2));
    let telemetry = TelemetryManager::new(TelemetryConfig::default());
    let selector = Arc::new(Selector::risk_aware(Arc::new(ParamsStore::new())));

    let client = StubWorkerRpc::new(mode);
    let calls = Arc::clone(&client.calls);

    let dispatcher = Dispatcher::new(
        Arc::clone(&queue),
        Arc::clone(&table),
        Arc::clone(&registry),
        tau,
        selector,
        telemetry,
        Arc::clone(&database),
        client,
        DispatchConfig {
            rpc_timeout_seconds: 10,
            reservation_margin_seconds: 30,
            running_reservation_ttl_seconds: 3600,
            retry_limit,
            backoff: Duration::from_millis(10),
        },
    );

    Fixture {
        _dir: dir,
        dispatcher,
        queue,
        table,
        registry,
        database,
        calls,
    }
}

async fn add_worker(fixture: &Fixture, worker_id: &str, cpu: f64, mem: f64, gpu: f64) {
    fixture.registry.pre_register(worker_id, "").await.unwrap();
    fixture
        .registry
        .attach(
            worker_id,
            &format!("http://{}:8651", worker_id),
            ResourceSpec::new(cpu, mem, 100.0, gpu),
            100,
        )
        .await
        .unwrap();
}

async fn submit(fixture: &Fixture, task_id: &str, cpu: f64, mem: f64) {
    let task = queued_task(
        task_id,
        resources(cpu, mem, 0.0),
        TaskType::CpuHeavy,
        2.0,
        15.0,
        100,
    );
    fixture.table.insert(task.clone()).await;
    fixture.queue.enqueue(task).await;
}

#[tokio::test]
async fn test_empty_queue_is_idle() {
    let fixture = fixture(StubMode::Accept, 3).await;
    assert_eq!(fixture.dispatcher.dispatch_next().await, DispatchOutcome::Idle);
}

#[tokio::test]
async fn test_successful_dispatch_runs_task() {
    let fixture = fixture(StubMode::Accept, 3).await;
    add_worker(&fixture, "w1", 16.0, 32.0, 4.0).await;
    submit(&fixture, "t1", 4.0, 8.0).await;

    let outcome = fixture.dispatcher.dispatch_next().await;
    assert_eq!(outcome, DispatchOutcome::Dispatched);

    // Dequeued only after the ack.
    assert!(fixture.queue.is_empty().await);

    let task = fixture.table.get("t1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.assigned_worker.as_deref(), Some("w1"));

    // Reservation survives past the dispatch window.
    let reservation = fixture.registry.reservation_for("t1").await.unwrap();
    assert!(reservation.expires_at >= 3600);

    // The worker was called at its registered address.
    let calls = fixture.calls.lock().unwrap();
    assert_eq!(calls.as_slice(), &[("http://w1:8651".to_string(), "t1".to_string())]);
}

#[tokio::test]
async fn test_dispatch_persists_assignment_record() {
    let fixture = fixture(StubMode::Accept, 3).await;
    add_worker(&fixture, "w1", 16.0, 32.0, 4.0).await;
    submit(&fixture, "t1", 4.0, 8.0).await;

    fixture.dispatcher.dispatch_next().await;

    let mut db = fixture.database.lock().await;
    let assignments = db.assignments_by_worker("w1").await.unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].task_id, "t1");

    let stored = db.get_task("t1").await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Running);
}

#[tokio::test]
async fn test_refusal_requeues_with_retry_count() {
    let fixture = fixture(StubMode::Refuse, 3).await;
    add_worker(&fixture, "w1", 16.0, 32.0, 4.0).await;
    submit(&fixture, "t1", 4.0, 8.0).await;

    let outcome = fixture.dispatcher.dispatch_next().await;
    assert_eq!(outcome, DispatchOutcome::Requeued);

    let task = fixture.table.get("t1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.retry_count, 1);
    assert!(task.assigned_worker.is_none());

    // The reservation was rolled back and the task is back in the queue.
    assert_eq!(fixture.registry.reservation_count().await, 0);
    assert_eq!(fixture.queue.len().await, 1);
}

#[tokio::test]
async fn test_retry_budget_exhaustion_fails_task() {
    let fixture = fixture(StubMode::Refuse, 2).await;
    add_worker(&fixture, "w1", 16.0, 32.0, 4.0).await;
    submit(&fixture, "t1", 4.0, 8.0).await;

    assert_eq!(
        fixture.dispatcher.dispatch_next().await,
        DispatchOutcome::Requeued
    );
    assert_eq!(
        fixture.dispatcher.dispatch_next().await,
        DispatchOutcome::Failed
    );

    let task = fixture.table.get("t1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.failure_reason.as_deref(), Some("worker_refused"));
    assert!(fixture.queue.is_empty().await);
    assert_eq!(fixture.registry.reservation_count().await, 0);
}

#[tokio::test]
async fn test_rpc_timeout_counts_against_retry_budget() {
    let fixture = fixture(StubMode::Fail, 1).await;
    add_worker(&fixture, "w1", 16.0, 32.0, 4.0).await;
    submit(&fixture, "t1", 4.0, 8.0).await;

    assert_eq!(
        fixture.dispatcher.dispatch_next().await,
        DispatchOutcome::Failed
    );
    let task = fixture.table.get("t1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(
        task.failure_reason.as_deref(),
        Some(crate::dispatcher::REASON_UNSCHEDULABLE)
    );
}

/// Scenario: no feasible worker. The task stays queued, nothing is
/// dequeued, and no reservation is created.
#[tokio::test]
async fn test_no_feasible_worker_keeps_task_queued() {
    let fixture = fixture(StubMode::Accept, 3).await;
    add_worker(&fixture, "w1", 1.0, 2.0, 0.0).await;
    submit(&fixture, "t1", 4.0, 8.0).await;

    let outcome = fixture.dispatcher.dispatch_next().await;
    assert_eq!(outcome, DispatchOutcome::NoWorker);

    assert_eq!(fixture.queue.len().await, 1);
    assert_eq!(
        fixture.table.get("t1").await.unwrap().status,
        TaskStatus::Queued
    );
    assert_eq!(fixture.registry.reservation_count().await, 0);
    // The worker RPC was never attempted.
    assert_eq!(fixture.calls.lock().unwrap().len(), 0);
}

#[tokio::test]
async fn test_no_workers_at_all_keeps_task_queued() {
    let fixture = fixture(StubMode::Accept, 3).await;
    submit(&fixture, "t1", 4.0, 8.0).await;

    assert_eq!(
        fixture.dispatcher.dispatch_next().await,
        DispatchOutcome::NoWorker
    );
    assert_eq!(fixture.queue.len().await, 1);
}

#[tokio::test]
async fn test_stale_cancelled_head_is_discarded() {
    let fixture = fixture(StubMode::Accept, 3).await;
    add_worker(&fixture, "w1", 16.0, 32.0, 4.0).await;
    submit(&fixture, "t1", 4.0, 8.0).await;

    // The user cancels while the task waits in the queue.
    fixture
        .table
        .transition("t1", TaskStatus::Cancelled, 110)
        .await
        .unwrap();

    assert_eq!(
        fixture.dispatcher.dispatch_next().await,
        DispatchOutcome::Skipped
    );
    assert!(fixture.queue.is_empty().await);
    assert_eq!(fixture.calls.lock().unwrap().len(), 0);
}

/// Reservation-based backpressure: once the first task holds most of the
/// worker, the second cannot be dispatched past its capacity.
#[tokio::test]
async fn test_reservation_backpressure_prevents_oversubscription() {
    let fixture = fixture(StubMode::Accept, 3).await;
    add_worker(&fixture, "w1", 8.0, 32.0, 0.0).await;
    submit(&fixture, "t1", 6.0, 8.0).await;
    submit(&fixture, "t2", 6.0, 8.0).await;

    assert_eq!(
        fixture.dispatcher.dispatch_next().await,
        DispatchOutcome::Dispatched
    );
    // Only 2 cores remain; the second 6-core task cannot go anywhere.
    assert_eq!(
        fixture.dispatcher.dispatch_next().await,
        DispatchOutcome::NoWorker
    );

    assert_eq!(fixture.queue.len().await, 1);
    let worker = fixture.registry.get("w1").await.unwrap();
    assert!(worker.available.cpu_cores >= 2.0 - 1e-9);
    // Exactly one assignment reached the worker.
    assert_eq!(fixture.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_requeued_task_can_dispatch_to_second_worker() {
    // First worker refuses, but the retry path leaves the task queued for
    // the next pass, which may pick any worker again.
    let fixture = fixture(StubMode::Refuse, 5).await;
    add_worker(&fixture, "w1", 16.0, 32.0, 4.0).await;
    submit(&fixture, "t1", 4.0, 8.0).await;

    assert_eq!(
        fixture.dispatcher.dispatch_next().await,
        DispatchOutcome::Requeued
    );
    assert_eq!(
        fixture.dispatcher.dispatch_next().await,
        DispatchOutcome::Requeued
    );
    let task = fixture.table.get("t1").await.unwrap();
    assert_eq!(task.retry_count, 2);
    assert_eq!(fixture.registry.reservation_count().await, 0);
}

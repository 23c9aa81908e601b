//! Tests for the completion handler

use std::sync::Arc;

use shared::api::CompletionRequest;
use shared::model::{ResourceSpec, TaskStatus, TaskType, LOG_TRUNCATION_MARKER};
use tempfile::TempDir;
use tokio::sync::Mutex;

use crate::completion::{CompletionError, CompletionHandler, CompletionOutcome};
use crate::database::MasterDatabase;
use crate::registry::WorkerRegistry;
use crate::tasks::{LogStore, TaskTable};
use crate::tau::TauStore;

use super::support::{queued_task, resources};

struct Fixture {
    _dir: TempDir,
    handler: CompletionHandler,
    table: Arc<TaskTable>,
    registry: Arc<WorkerRegistry>,
    tau: Arc<TauStore>,
    logs: Arc<LogStore>,
    database: Arc<Mutex<MasterDatabase>>,
}

async fn fixture_with_log_cap(log_cap: usize) -> Fixture {
    let dir = TempDir::new().unwrap();
    let mut db = MasterDatabase::new(dir.path()).unwrap();
    db.initialize().await.unwrap();
    let database = Arc::new(Mutex::new(db));

    let table = Arc::new(TaskTable::new());
    let registry = Arc::new(WorkerRegistry::new());
    let tau = Arc::new(TauStore::new(0.2));
    let logs = Arc::new(LogStore::new(log_cap));

    let handler = CompletionHandler::new(
        Arc::clone(&table),
        Arc::clone(&registry),
        Arc::clone(&tau),
        Arc::clone(&logs),
        Arc::clone(&database),
        log_cap,
    );

    Fixture {
        _dir: dir,
        handler,
        table,
        registry,
        tau,
        logs,
        database,
    }
}

async fn fixture() -> Fixture {
    fixture_with_log_cap(65536).await
}

/// Seeds a cpu-heavy task in `running` state assigned to w1 at t=1000, with
/// a live reservation.
async fn seed_running_task(fixture: &Fixture, task_id: &str) {
    let mut task = queued_task(
        task_id,
        resources(4.0, 8.0, 0.0),
        TaskType::CpuHeavy,
        2.0,
        15.0,
        1_000,
    );
    task.status = TaskStatus::Queued;
    fixture.table.insert(task).await;

    fixture.registry.pre_register("w1", "").await.unwrap();
    fixture
        .registry
        .attach("w1", "http://w1:8651", ResourceSpec::new(16.0, 32.0, 100.0, 4.0), 1_000)
        .await
        .unwrap();
    fixture
        .registry
        .reserve(task_id, "w1", resources(4.0, 8.0, 0.0), 3600, 1_000)
        .await
        .unwrap();

    fixture.table.set_assigned(task_id, "w1", 1_000).await.unwrap();
    fixture
        .table
        .transition(task_id, TaskStatus::Running, 1_000)
        .await
        .unwrap();
}

fn report(task_id: &str, status: TaskStatus, log_text: &str) -> CompletionRequest {
    CompletionRequest {
        task_id: task_id.to_string(),
        worker_id: "w1".to_string(),
        status,
        exit_code: if status == TaskStatus::Completed { 0 } else { 1 },
        log_text: log_text.to_string(),
    }
}

#[tokio::test]
async fn test_successful_completion_updates_estimate() {
    let fixture = fixture().await;
    seed_running_task(&fixture, "t1").await;

    // Assigned at 1000, completed at 1025: 25 seconds observed.
    let outcome = fixture
        .handler
        .handle(report("t1", TaskStatus::Completed, "done"), 1_025)
        .await
        .unwrap();
    assert_eq!(outcome, CompletionOutcome::Applied);

    // tau: 0.2 * 25 + 0.8 * 15 = 17.0
    assert!((fixture.tau.get(TaskType::CpuHeavy).await - 17.0).abs() < 1e-9);

    let task = fixture.table.get("t1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.completed_at, Some(1_025));
}

#[tokio::test]
async fn test_failed_task_leaves_estimate_unchanged() {
    let fixture = fixture().await;
    seed_running_task(&fixture, "t1").await;

    fixture
        .handler
        .handle(report("t1", TaskStatus::Failed, "oom"), 1_025)
        .await
        .unwrap();

    assert_eq!(fixture.tau.get(TaskType::CpuHeavy).await, 15.0);
    assert_eq!(
        fixture.table.get("t1").await.unwrap().status,
        TaskStatus::Failed
    );
}

#[tokio::test]
async fn test_cancelled_task_leaves_estimate_unchanged() {
    let fixture = fixture().await;
    seed_running_task(&fixture, "t1").await;

    fixture
        .handler
        .handle(report("t1", TaskStatus::Cancelled, ""), 1_010)
        .await
        .unwrap();

    assert_eq!(fixture.tau.get(TaskType::CpuHeavy).await, 15.0);
}

#[tokio::test]
async fn test_completion_releases_reservation() {
    let fixture = fixture().await;
    seed_running_task(&fixture, "t1").await;
    assert_eq!(fixture.registry.reservation_count().await, 1);

    fixture
        .handler
        .handle(report("t1", TaskStatus::Completed, ""), 1_020)
        .await
        .unwrap();

    assert_eq!(fixture.registry.reservation_count().await, 0);
    let worker = fixture.registry.get("w1").await.unwrap();
    assert!(worker.assigned_tasks.is_empty());
    assert!(worker
        .available
        .approx_eq(&ResourceSpec::new(16.0, 32.0, 100.0, 4.0)));
}

#[tokio::test]
async fn test_duplicate_report_is_acknowledged_and_ignored() {
    let fixture = fixture().await;
    seed_running_task(&fixture, "t1").await;

    fixture
        .handler
        .handle(report("t1", TaskStatus::Completed, "first"), 1_025)
        .await
        .unwrap();
    let tau_after_first = fixture.tau.get(TaskType::CpuHeavy).await;

    // A replay with a different status and time changes nothing.
    let outcome = fixture
        .handler
        .handle(report("t1", TaskStatus::Failed, "second"), 1_999)
        .await
        .unwrap();
    assert_eq!(outcome, CompletionOutcome::Duplicate);

    assert_eq!(fixture.tau.get(TaskType::CpuHeavy).await, tau_after_first);
    let task = fixture.table.get("t1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.completed_at, Some(1_025));

    // The stored result still carries the first report's log.
    let mut db = fixture.database.lock().await;
    let result = db.get_result("t1").await.unwrap().unwrap();
    assert!(result.log_text.contains("first"));
}

#[tokio::test]
async fn test_unknown_task_report_errors() {
    let fixture = fixture().await;
    let result = fixture
        .handler
        .handle(report("ghost", TaskStatus::Completed, ""), 1_000)
        .await;
    assert!(matches!(result, Err(CompletionError::UnknownTask(_))));
}

#[tokio::test]
async fn test_non_terminal_status_rejected() {
    let fixture = fixture().await;
    seed_running_task(&fixture, "t1").await;
    let result = fixture
        .handler
        .handle(report("t1", TaskStatus::Running, ""), 1_000)
        .await;
    assert!(matches!(result, Err(CompletionError::NotTerminal(_))));
}

#[tokio::test]
async fn test_log_text_truncated_with_marker() {
    let fixture = fixture_with_log_cap(64).await;
    seed_running_task(&fixture, "t1").await;

    let long_log = "x".repeat(500);
    fixture
        .handler
        .handle(report("t1", TaskStatus::Completed, &long_log), 1_020)
        .await
        .unwrap();

    let mut db = fixture.database.lock().await;
    let result = db.get_result("t1").await.unwrap().unwrap();
    assert!(result.log_truncated);
    assert!(result.log_text.ends_with(LOG_TRUNCATION_MARKER));
    assert!(result.log_text.len() <= 64 + LOG_TRUNCATION_MARKER.len());
}

#[tokio::test]
async fn test_streamed_chunks_merged_into_result() {
    let fixture = fixture().await;
    seed_running_task(&fixture, "t1").await;

    fixture.logs.append("t1", "streamed line\n").await;
    fixture
        .handler
        .handle(report("t1", TaskStatus::Completed, "final line"), 1_020)
        .await
        .unwrap();

    let mut db = fixture.database.lock().await;
    let result = db.get_result("t1").await.unwrap().unwrap();
    assert!(result.log_text.contains("streamed line"));
    assert!(result.log_text.contains("final line"));

    // The buffer is released after the merge.
    assert!(fixture.logs.get("t1").await.is_none());
}

#[tokio::test]
async fn test_completion_while_assigned_steps_through_dag() {
    let fixture = fixture().await;

    let task = queued_task(
        "t1",
        resources(2.0, 2.0, 0.0),
        TaskType::CpuLight,
        2.0,
        5.0,
        1_000,
    );
    fixture.table.insert(task).await;
    fixture.table.set_assigned("t1", "w1", 1_000).await.unwrap();

    // The worker reported before the dispatcher marked the task running.
    let outcome = fixture
        .handler
        .handle(report("t1", TaskStatus::Completed, ""), 1_005)
        .await
        .unwrap();
    assert_eq!(outcome, CompletionOutcome::Applied);
    assert_eq!(
        fixture.table.get("t1").await.unwrap().status,
        TaskStatus::Completed
    );
}

#[tokio::test]
async fn test_sla_outcome_recorded() {
    let fixture = fixture().await;
    seed_running_task(&fixture, "t1").await;

    // Budget is k * tau = 30 seconds; 25 observed meets it.
    fixture
        .handler
        .handle(report("t1", TaskStatus::Completed, ""), 1_025)
        .await
        .unwrap();

    // The write is best-effort but with a healthy store it lands.
    let mut db = fixture.database.lock().await;
    let conn = db.get_connection().unwrap();
    let met: i64 = conn
        .query_row(
            "SELECT met FROM sla_outcomes WHERE task_id = 't1'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(met, 1);
}

//! Shared helpers for master tests

use shared::model::{ResourceSpec, Task, TaskStatus, TaskType};

use crate::scheduler::CandidateWorker;

/// A task in `queued` state with a fixed arrival time and deadline.
#[allow(clippy::too_many_arguments)]
pub fn queued_task(
    id: &str,
    resources: ResourceSpec,
    task_type: TaskType,
    k: f64,
    tau: f64,
    arrival: u64,
) -> Task {
    Task {
        id: id.to_string(),
        user_id: "user-1".to_string(),
        image: "alpine:3".to_string(),
        command: vec!["true".to_string()],
        resources,
        requested_type: Some(task_type.as_str().to_string()),
        task_type,
        sla_multiplier: k,
        tau_seconds: tau,
        arrival_time: arrival,
        deadline: arrival as f64 + k * tau,
        status: TaskStatus::Queued,
        priority: 0,
        retry_count: 0,
        assigned_worker: None,
        assigned_at: None,
        completed_at: None,
        failure_reason: None,
    }
}

/// An active candidate worker with the given availability and load.
pub fn candidate(id: &str, cpu: f64, mem: f64, gpu: f64, load: f64) -> CandidateWorker {
    CandidateWorker {
        worker_id: id.to_string(),
        address: format!("http://{}.cluster.local:8651", id),
        active: true,
        available: ResourceSpec::new(cpu, mem, 100.0, gpu),
        load,
    }
}

pub fn resources(cpu: f64, mem: f64, gpu: f64) -> ResourceSpec {
    ResourceSpec::new(cpu, mem, 0.0, gpu)
}

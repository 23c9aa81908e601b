//! Tests for the core domain model

use crate::model::*;

#[test]
fn test_resource_fits_within() {
    let request = ResourceSpec::new(4.0, 8.0, 10.0, 1.0);
    let plenty = ResourceSpec::new(16.0, 32.0, 100.0, 4.0);
    let exact = ResourceSpec::new(4.0, 8.0, 10.0, 1.0);
    let short_gpu = ResourceSpec::new(16.0, 32.0, 100.0, 0.0);

    assert!(request.fits_within(&plenty));
    assert!(request.fits_within(&exact));
    assert!(!request.fits_within(&short_gpu));
}

#[test]
fn test_resource_checked_sub() {
    let total = ResourceSpec::new(8.0, 16.0, 50.0, 2.0);
    let used = ResourceSpec::new(4.0, 8.0, 10.0, 1.0);

    let rest = total.checked_sub(&used).unwrap();
    assert!(rest.approx_eq(&ResourceSpec::new(4.0, 8.0, 40.0, 1.0)));

    let too_much = ResourceSpec::new(9.0, 1.0, 1.0, 0.0);
    assert!(total.checked_sub(&too_much).is_none());
}

#[test]
fn test_resource_sub_then_add_restores() {
    let total = ResourceSpec::new(8.0, 16.0, 50.0, 2.0);
    let held = ResourceSpec::new(2.5, 7.25, 12.0, 1.0);

    let after = total.checked_sub(&held).unwrap().add(&held);
    assert!(after.approx_eq(&total));
}

#[test]
fn test_task_type_serde_kebab_case() {
    let json = serde_json::to_string(&TaskType::GpuInference).unwrap();
    assert_eq!(json, "\"gpu-inference\"");

    let parsed: TaskType = serde_json::from_str("\"memory-heavy\"").unwrap();
    assert_eq!(parsed, TaskType::MemoryHeavy);
}

#[test]
fn test_task_type_inference_rules() {
    // gpu > 2 and cpu > 4 -> training
    assert_eq!(
        TaskType::infer(&ResourceSpec::new(8.0, 16.0, 0.0, 4.0)),
        TaskType::GpuTraining
    );
    // any gpu otherwise -> inference
    assert_eq!(
        TaskType::infer(&ResourceSpec::new(2.0, 4.0, 0.0, 1.0)),
        TaskType::GpuInference
    );
    // gpu > 2 but cpu <= 4 is still inference
    assert_eq!(
        TaskType::infer(&ResourceSpec::new(4.0, 4.0, 0.0, 4.0)),
        TaskType::GpuInference
    );
    // mem > 8 -> memory-heavy
    assert_eq!(
        TaskType::infer(&ResourceSpec::new(2.0, 16.0, 0.0, 0.0)),
        TaskType::MemoryHeavy
    );
    // cpu > 4 -> cpu-heavy
    assert_eq!(
        TaskType::infer(&ResourceSpec::new(8.0, 4.0, 0.0, 0.0)),
        TaskType::CpuHeavy
    );
    // any cpu -> cpu-light
    assert_eq!(
        TaskType::infer(&ResourceSpec::new(1.0, 2.0, 0.0, 0.0)),
        TaskType::CpuLight
    );
    // nothing requested -> mixed
    assert_eq!(
        TaskType::infer(&ResourceSpec::default()),
        TaskType::Mixed
    );
}

#[test]
fn test_classify_prefers_valid_caller_value() {
    let resources = ResourceSpec::new(1.0, 2.0, 0.0, 0.0);
    assert_eq!(
        TaskType::classify(Some("gpu-training"), &resources),
        TaskType::GpuTraining
    );
    // Unknown strings fall back to inference
    assert_eq!(
        TaskType::classify(Some("super-heavy"), &resources),
        TaskType::CpuLight
    );
    assert_eq!(TaskType::classify(None, &resources), TaskType::CpuLight);
}

#[test]
fn test_status_transition_dag() {
    use TaskStatus::*;

    assert!(Pending.can_transition(Queued));
    assert!(Queued.can_transition(Assigned));
    assert!(Assigned.can_transition(Running));
    assert!(Running.can_transition(Completed));
    assert!(Running.can_transition(Failed));
    assert!(Running.can_transition(Cancelled));

    // Re-enqueue after a refused dispatch
    assert!(Assigned.can_transition(Queued));

    // Terminal states absorb everything
    assert!(!Failed.can_transition(Running));
    assert!(!Completed.can_transition(Running));
    assert!(!Cancelled.can_transition(Queued));

    // No skipping straight from queued to running
    assert!(!Queued.can_transition(Running));
}

#[test]
fn test_sla_multiplier_normalization() {
    assert_eq!(normalize_sla_multiplier(Some(1.5)), 1.5);
    assert_eq!(normalize_sla_multiplier(Some(2.5)), 2.5);
    assert_eq!(normalize_sla_multiplier(Some(1.8)), 1.8);
    // Outside the range falls back to the default, not the nearest bound
    assert_eq!(normalize_sla_multiplier(Some(0.5)), 2.0);
    assert_eq!(normalize_sla_multiplier(Some(3.0)), 2.0);
    assert_eq!(normalize_sla_multiplier(Some(f64::NAN)), 2.0);
    assert_eq!(normalize_sla_multiplier(None), 2.0);
}

#[test]
fn test_task_submit_fixes_deadline() {
    let task = Task::submit(
        "t-1".to_string(),
        "u-1".to_string(),
        "alpine:3".to_string(),
        vec!["echo".to_string(), "hi".to_string()],
        ResourceSpec::new(2.0, 4.0, 1.0, 0.0),
        None,
        Some(1.5),
        0,
        20.0,
        1_000,
    );

    assert_eq!(task.task_type, TaskType::CpuLight);
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.sla_multiplier, 1.5);
    assert!((task.deadline - 1_030.0).abs() < 1e-9);
    assert!((task.sla_budget_seconds() - 30.0).abs() < 1e-9);
}

#[test]
fn test_task_submit_clamps_bad_multiplier() {
    let task = Task::submit(
        "t-2".to_string(),
        "u-1".to_string(),
        "alpine:3".to_string(),
        Vec::new(),
        ResourceSpec::new(2.0, 4.0, 1.0, 0.0),
        None,
        Some(9.0),
        0,
        10.0,
        500,
    );
    assert_eq!(task.sla_multiplier, 2.0);
    assert!((task.deadline - 520.0).abs() < 1e-9);
}

#[test]
fn test_telemetry_sample_load_is_max_dimension() {
    let sample = TelemetrySample {
        worker_id: "w1".to_string(),
        cpu_percent: 40.0,
        memory_percent: 85.0,
        gpu_percent: 10.0,
        running_tasks: Vec::new(),
        timestamp: 0,
    };
    assert!((sample.load() - 0.85).abs() < 1e-9);
}

#[test]
fn test_telemetry_load_can_exceed_one() {
    let sample = TelemetrySample {
        worker_id: "w1".to_string(),
        cpu_percent: 130.0,
        memory_percent: 20.0,
        gpu_percent: 0.0,
        running_tasks: Vec::new(),
        timestamp: 0,
    };
    assert!((sample.load() - 1.3).abs() < 1e-9);
}

#[test]
fn test_log_truncation() {
    let short = "hello";
    let (text, truncated) = truncate_log_text(short, 64);
    assert_eq!(text, "hello");
    assert!(!truncated);

    let long = "x".repeat(100);
    let (text, truncated) = truncate_log_text(&long, 64);
    assert!(truncated);
    assert!(text.starts_with(&"x".repeat(64)));
    assert!(text.ends_with(LOG_TRUNCATION_MARKER));
}

#[test]
fn test_log_truncation_respects_char_boundary() {
    // Multi-byte characters must not be split mid-sequence
    let long = "é".repeat(40); // 2 bytes each, 80 bytes total
    let (text, truncated) = truncate_log_text(&long, 63);
    assert!(truncated);
    assert!(text.ends_with(LOG_TRUNCATION_MARKER));
    // The retained prefix is valid UTF-8 by construction; 63 is mid-char so
    // the cut backs off to 62 bytes = 31 chars.
    let prefix = &text[..text.len() - LOG_TRUNCATION_MARKER.len()];
    assert_eq!(prefix.chars().count(), 31);
}

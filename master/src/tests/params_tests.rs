//! Tests for scheduler parameter loading, validation, and hot reload

use std::io::Write;

use shared::model::TaskType;
use tempfile::NamedTempFile;

use crate::params::{ParamsStore, ReloadOutcome, RiskWeights, ScoringParams, Theta};

fn write_params_file(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

const VALID_PARAMS: &str = r#"{
    "theta": {"theta1": 0.2, "theta2": 0.1, "theta3": 0.4, "theta4": 0.3},
    "risk": {"alpha": 12.0, "beta": 2.0},
    "affinityMatrix": {"gpu-training": {"worker-1": 5.0}},
    "penaltyVector": {"worker-2": 15.0}
}"#;

#[test]
fn test_defaults_when_file_missing() {
    let store = ParamsStore::load_or_default("/nonexistent/params.json");
    let params = store.current();
    assert_eq!(params.theta, Theta::default());
    assert_eq!(params.risk, RiskWeights::default());
    assert!(params.affinity_matrix.is_empty());
    assert!(params.penalty_vector.is_empty());
}

#[test]
fn test_seeded_default_values() {
    let theta = Theta::default();
    assert_eq!(
        (theta.theta1, theta.theta2, theta.theta3, theta.theta4),
        (0.1, 0.1, 0.3, 0.2)
    );
    let risk = RiskWeights::default();
    assert_eq!((risk.alpha, risk.beta), (10.0, 1.0));
}

#[test]
fn test_valid_file_replaces_snapshot() {
    let file = write_params_file(VALID_PARAMS);
    let store = ParamsStore::new();

    assert_eq!(store.reload_from_file(file.path()), ReloadOutcome::Replaced);

    let params = store.current();
    assert_eq!(params.risk.alpha, 12.0);
    assert_eq!(params.affinity(TaskType::GpuTraining, "worker-1"), 5.0);
    assert_eq!(params.penalty("worker-2"), 15.0);
    // Absent keys default to zero.
    assert_eq!(params.affinity(TaskType::CpuLight, "worker-1"), 0.0);
    assert_eq!(params.penalty("worker-9"), 0.0);
}

#[test]
fn test_reload_of_unchanged_file_is_noop() {
    let file = write_params_file(VALID_PARAMS);
    let store = ParamsStore::new();

    assert_eq!(store.reload_from_file(file.path()), ReloadOutcome::Replaced);
    assert_eq!(store.reload_from_file(file.path()), ReloadOutcome::Unchanged);
    assert_eq!(store.reload_from_file(file.path()), ReloadOutcome::Unchanged);
}

#[test]
fn test_parse_failure_keeps_previous_snapshot() {
    let good = write_params_file(VALID_PARAMS);
    let store = ParamsStore::new();
    store.reload_from_file(good.path());

    let bad = write_params_file("{not json at all");
    let outcome = store.reload_from_file(bad.path());
    assert!(matches!(outcome, ReloadOutcome::KeptPrevious(_)));

    // The earlier snapshot is fully intact.
    let params = store.current();
    assert_eq!(params.risk.alpha, 12.0);
}

#[test]
fn test_out_of_range_values_keep_previous_snapshot() {
    let store = ParamsStore::new();

    for bad_json in [
        // theta outside [0, 10]
        r#"{"theta": {"theta1": 99.0, "theta2": 0.1, "theta3": 0.3, "theta4": 0.2}}"#,
        // affinity outside [-10, 10]
        r#"{"affinityMatrix": {"mixed": {"w": 50.0}}}"#,
        // penalty outside [0, 100]
        r#"{"penaltyVector": {"w": -5.0}}"#,
        // unknown task type key
        r#"{"affinityMatrix": {"warp-drive": {"w": 1.0}}}"#,
        // non-finite alpha
        r#"{"risk": {"alpha": 1e999, "beta": 1.0}}"#,
    ] {
        let file = write_params_file(bad_json);
        let outcome = store.reload_from_file(file.path());
        assert!(
            matches!(outcome, ReloadOutcome::KeptPrevious(_)),
            "expected rejection for: {}",
            bad_json
        );
    }

    // Still the seeded defaults.
    assert_eq!(store.current().risk.alpha, 10.0);
}

#[test]
fn test_snapshot_is_immutable_while_held() {
    let store = ParamsStore::new();
    let held = store.current();

    let file = write_params_file(VALID_PARAMS);
    store.reload_from_file(file.path());

    // The clone taken before the reload still sees the old values; the
    // store serves the new ones. No call mixes the two.
    assert_eq!(held.risk.alpha, 10.0);
    assert_eq!(store.current().risk.alpha, 12.0);
}

#[test]
fn test_partial_document_fills_defaults() {
    let file = write_params_file(r#"{"risk": {"alpha": 3.0, "beta": 0.5}}"#);
    let store = ParamsStore::new();
    assert_eq!(store.reload_from_file(file.path()), ReloadOutcome::Replaced);

    let params = store.current();
    assert_eq!(params.risk.alpha, 3.0);
    assert_eq!(params.theta, Theta::default());
    assert!(params.affinity_matrix.is_empty());
}

#[test]
fn test_validate_accepts_boundary_values() {
    let params = ScoringParams {
        theta: Theta {
            theta1: 0.0,
            theta2: 10.0,
            theta3: 0.0,
            theta4: 10.0,
        },
        risk: RiskWeights {
            alpha: 0.0,
            beta: 1000.0,
        },
        ..Default::default()
    };
    assert!(params.validate().is_ok());

    let mut params = ScoringParams::default();
    params
        .affinity_matrix
        .entry("mixed".to_string())
        .or_default()
        .insert("w".to_string(), -10.0);
    params.penalty_vector.insert("w".to_string(), 100.0);
    assert!(params.validate().is_ok());
}

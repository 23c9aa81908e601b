//! Tests for the telemetry pipeline: ingestion, processing, and fan-out

use std::time::Duration;

use shared::model::{RunningTask, TelemetrySample};

use crate::telemetry::{SubscriptionFilter, TelemetryConfig, TelemetryManager};

fn sample(worker_id: &str, cpu: f64, mem: f64, gpu: f64, ts: u64) -> TelemetrySample {
    TelemetrySample {
        worker_id: worker_id.to_string(),
        cpu_percent: cpu,
        memory_percent: mem,
        gpu_percent: gpu,
        running_tasks: Vec::new(),
        timestamp: ts,
    }
}

fn small_config() -> TelemetryConfig {
    TelemetryConfig {
        channel_capacity: 4,
        window_samples: 8,
        subscriber_capacity: 16,
        subscriber_grace: Duration::from_millis(50),
    }
}

/// Polls until the latest snapshot for a worker reports the expected
/// timestamp, bounded by a timeout.
async fn wait_for_snapshot(manager: &TelemetryManager, worker_id: &str, ts: u64) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Some(t) = manager.latest(worker_id).await {
                if t.timestamp >= ts {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("telemetry snapshot did not appear in time");
}

#[tokio::test]
async fn test_ingest_for_unattached_worker_is_rejected() {
    let manager = TelemetryManager::new(small_config());
    assert!(!manager.ingest(sample("ghost", 10.0, 10.0, 0.0, 100)).await);
    manager.close().await;
}

#[tokio::test]
async fn test_snapshot_reflects_latest_sample() {
    let manager = TelemetryManager::new(small_config());
    manager.attach_worker("w1").await;

    manager.ingest(sample("w1", 40.0, 85.0, 10.0, 100)).await;
    wait_for_snapshot(&manager, "w1", 100).await;

    let telemetry = manager.latest("w1").await.unwrap();
    assert!((telemetry.load - 0.85).abs() < 1e-9);
    assert_eq!(telemetry.timestamp, 100);
    assert_eq!(manager.load_of("w1").await, Some(0.85));

    manager.ingest(sample("w1", 90.0, 20.0, 0.0, 110)).await;
    wait_for_snapshot(&manager, "w1", 110).await;
    assert_eq!(manager.load_of("w1").await, Some(0.9));

    manager.close().await;
}

#[tokio::test]
async fn test_running_task_count_tracked() {
    let manager = TelemetryManager::new(small_config());
    manager.attach_worker("w1").await;

    let mut s = sample("w1", 10.0, 10.0, 0.0, 100);
    s.running_tasks = vec![
        RunningTask {
            task_id: "t1".to_string(),
            image: "alpine:3".to_string(),
        },
        RunningTask {
            task_id: "t2".to_string(),
            image: "alpine:3".to_string(),
        },
    ];
    manager.ingest(s).await;
    wait_for_snapshot(&manager, "w1", 100).await;

    assert_eq!(manager.latest("w1").await.unwrap().running_tasks, 2);
    manager.close().await;
}

#[tokio::test]
async fn test_overload_time_integrates_between_samples() {
    let manager = TelemetryManager::new(small_config());
    manager.attach_worker("w1").await;

    // Load 1.3 from t=100 to t=110, then back under 1.0.
    manager.ingest(sample("w1", 130.0, 20.0, 0.0, 100)).await;
    manager.ingest(sample("w1", 50.0, 20.0, 0.0, 110)).await;
    manager.ingest(sample("w1", 50.0, 20.0, 0.0, 120)).await;
    wait_for_snapshot(&manager, "w1", 120).await;

    let telemetry = manager.latest("w1").await.unwrap();
    assert!((telemetry.overload_seconds - 10.0).abs() < 1e-9);
    manager.close().await;
}

#[tokio::test]
async fn test_full_queue_drops_oldest_and_counts() {
    let manager = TelemetryManager::new(small_config());
    manager.attach_worker("w1").await;

    // The per-worker loop only runs when this task yields; pushing more
    // than the capacity back-to-back exercises the drop-oldest path.
    for ts in 0..10u64 {
        manager.ingest(sample("w1", ts as f64, 0.0, 0.0, 100 + ts)).await;
    }

    wait_for_snapshot(&manager, "w1", 109).await;
    let telemetry = manager.latest("w1").await.unwrap();

    // The newest sample always survives; at least the overflow beyond the
    // queue capacity was dropped and counted.
    assert_eq!(telemetry.timestamp, 109);
    assert!(manager.dropped_samples("w1").await >= 6);

    manager.close().await;
}

#[tokio::test]
async fn test_subscriber_receives_samples_in_ingestion_order() {
    let manager = TelemetryManager::new(small_config());
    manager.attach_worker("w1").await;

    let mut subscription = manager.subscribe(SubscriptionFilter::All).await;

    for ts in [101u64, 102, 103] {
        manager.ingest(sample("w1", ts as f64, 0.0, 0.0, ts)).await;
        // Let the pipeline run so each sample is processed before the next
        // is pushed; ordering is per-worker end to end.
        wait_for_snapshot(&manager, "w1", ts).await;
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        let payload = tokio::time::timeout(Duration::from_secs(1), subscription.receiver.recv())
            .await
            .expect("subscriber should receive")
            .expect("channel open");
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["worker_id"], "w1");
        seen.push(value["timestamp"].as_u64().unwrap());
    }
    assert_eq!(seen, vec![101, 102, 103]);

    manager.close().await;
}

#[tokio::test]
async fn test_worker_filter_only_sees_its_worker() {
    let manager = TelemetryManager::new(small_config());
    manager.attach_worker("w1").await;
    manager.attach_worker("w2").await;

    let mut subscription = manager
        .subscribe(SubscriptionFilter::Worker("w2".to_string()))
        .await;

    manager.ingest(sample("w1", 10.0, 0.0, 0.0, 101)).await;
    wait_for_snapshot(&manager, "w1", 101).await;
    manager.ingest(sample("w2", 20.0, 0.0, 0.0, 102)).await;
    wait_for_snapshot(&manager, "w2", 102).await;

    let payload = tokio::time::timeout(Duration::from_secs(1), subscription.receiver.recv())
        .await
        .expect("subscriber should receive")
        .expect("channel open");
    let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
    assert_eq!(value["worker_id"], "w2");

    // Nothing else arrives for the filtered subscriber.
    let extra =
        tokio::time::timeout(Duration::from_millis(100), subscription.receiver.recv()).await;
    assert!(extra.is_err());

    manager.close().await;
}

#[tokio::test]
async fn test_blocked_subscriber_dropped_without_affecting_others() {
    let config = TelemetryConfig {
        channel_capacity: 64,
        window_samples: 8,
        subscriber_capacity: 1,
        subscriber_grace: Duration::from_millis(20),
    };
    let manager = TelemetryManager::new(config);
    manager.attach_worker("w1").await;

    // The stuck subscriber never reads; the healthy one drains.
    let _stuck = manager.subscribe(SubscriptionFilter::All).await;
    let mut healthy = manager.subscribe(SubscriptionFilter::All).await;
    assert_eq!(manager.subscriber_count().await, 2);

    // Fill the stuck channel, then keep publishing past the grace period.
    for round in 0..6u64 {
        manager.ingest(sample("w1", 10.0, 0.0, 0.0, 200 + round)).await;
        wait_for_snapshot(&manager, "w1", 200 + round).await;
        // Drain the healthy subscriber so only the stuck one backs up.
        while healthy.receiver.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(15)).await;
    }

    assert_eq!(manager.subscriber_count().await, 1);

    // The healthy subscriber still receives.
    manager.ingest(sample("w1", 10.0, 0.0, 0.0, 300)).await;
    let payload = tokio::time::timeout(Duration::from_secs(1), healthy.receiver.recv())
        .await
        .expect("healthy subscriber should receive")
        .expect("channel open");
    assert!(payload.contains("w1"));

    manager.close().await;
}

#[tokio::test]
async fn test_detach_retains_snapshot_for_diagnostics() {
    let manager = TelemetryManager::new(small_config());
    manager.attach_worker("w1").await;
    manager.ingest(sample("w1", 40.0, 10.0, 0.0, 100)).await;
    wait_for_snapshot(&manager, "w1", 100).await;

    manager.detach_worker("w1").await;
    assert!(manager.latest("w1").await.is_some());
    // Ingestion for a detached worker is rejected again.
    assert!(!manager.ingest(sample("w1", 50.0, 10.0, 0.0, 110)).await);

    manager.close().await;
}

#[tokio::test]
async fn test_close_stops_pipelines() {
    let manager = TelemetryManager::new(small_config());
    manager.attach_worker("w1").await;
    manager.ingest(sample("w1", 40.0, 10.0, 0.0, 100)).await;

    tokio::time::timeout(Duration::from_secs(2), manager.close())
        .await
        .expect("close should drain and return promptly");
}

use chrono::Duration;
use meshcert::monitoring::{AlertKind, AlertSeverity};
use meshcert::ServiceType;

use crate::lifecycle::support::Harness;

fn write_broken_bundle(harness: &Harness, service: &str) {
    let dir = harness.config.storage.root_dir.join(service);
    std::fs::create_dir_all(&dir).unwrap();
    for file in ["cert.pem", "key.pem", "ca.pem"] {
        std::fs::write(dir.join(file), "garbage").unwrap();
    }
}

#[tokio::test]
async fn test_metrics_cycle_counts() {
    let harness = Harness::new().await;
    let components = &harness.components;
    components.rotation.issue("redis", ServiceType::InternalService, &[]).await.unwrap();
    harness.clock.advance(Duration::days(70));
    components.rotation.issue("postgres", ServiceType::InternalService, &[]).await.unwrap();
    write_broken_bundle(&harness, "legacy");

    let snapshot = components.dashboard.collect_metrics().await.unwrap();
    assert_eq!(snapshot.total, 3);
    assert_eq!(snapshot.valid, 2);
    assert_eq!(snapshot.expiring_soon, 1);
    assert_eq!(snapshot.expired, 0);
    assert_eq!(snapshot.unreadable, 1);
    assert_eq!(snapshot.load_latency.count, 3);

    harness.clock.advance(Duration::days(25));
    let snapshot = components.dashboard.collect_metrics().await.unwrap();
    assert_eq!(snapshot.valid, 1);
    assert_eq!(snapshot.expiring_soon, 0);
    assert_eq!(snapshot.expired, 1);

    assert_eq!(components.dashboard.metrics_history().len(), 2);
    let dashboard = components.dashboard.snapshot();
    assert_eq!(dashboard.history_points, 2);
    assert_eq!(dashboard.metrics.unwrap().expired, 1);
    assert!(!dashboard.stale);
}

#[tokio::test]
async fn test_history_respects_retention() {
    let harness = Harness::with_config(|config| config.monitoring.history_retention_hours = 2).await;
    let components = &harness.components;
    components.rotation.issue("redis", ServiceType::InternalService, &[]).await.unwrap();

    for _ in 0..4 {
        components.dashboard.collect_metrics().await.unwrap();
        harness.clock.advance(Duration::hours(1));
    }
    // Only cycles collected within the last two hours are kept.
    let history = components.dashboard.metrics_history();
    assert_eq!(history.len(), 3);
    assert!(history.windows(2).all(|w| w[0].collected_at < w[1].collected_at));
}

#[tokio::test]
async fn test_health_check_severities() {
    let harness = Harness::new().await;
    let components = &harness.components;
    components.rotation.issue("redis", ServiceType::InternalService, &[]).await.unwrap();
    write_broken_bundle(&harness, "legacy");

    harness.clock.advance(Duration::days(65));
    let report = components.dashboard.run_health_check().await.unwrap();
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].service, "legacy");

    let redis = components.alerts.active_for("redis");
    assert_eq!(redis.len(), 1);
    assert_eq!((redis[0].kind, redis[0].severity), (AlertKind::Expiry, AlertSeverity::Warning));
    let legacy = components.alerts.active_for("legacy");
    assert_eq!((legacy[0].kind, legacy[0].severity), (AlertKind::Storage, AlertSeverity::Error));

    // Escalation replaces the WARNING with an ERROR for the same condition.
    harness.clock.advance(Duration::days(20));
    components.dashboard.run_health_check().await.unwrap();
    let redis = components.alerts.active_for("redis");
    assert_eq!(redis.len(), 1);
    assert_eq!(redis[0].severity, AlertSeverity::Error);
    assert!(!components.dashboard.snapshot().alerts.is_empty());
    assert!(!components.alerts.has_critical());
}

#[tokio::test]
async fn test_all_unreadable_keeps_last_snapshot() {
    let harness = Harness::new().await;
    let components = &harness.components;
    write_broken_bundle(&harness, "legacy");

    assert!(components.dashboard.collect_metrics().await.is_err());
    let snapshot = components.dashboard.snapshot();
    assert!(snapshot.stale);
    assert!(snapshot.metrics.is_none());
    assert!(snapshot.last_error.is_some());
}

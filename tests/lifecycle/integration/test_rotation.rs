use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;
use meshcert::monitoring::{AlertKind, AlertSeverity};
use meshcert::rotation::{LifecycleState, RotationReason};
use meshcert::ServiceType;

use crate::lifecycle::support::Harness;

#[tokio::test]
async fn test_expired_bundle_alerts_once_then_rotates() {
    let harness = Harness::new().await;
    let components = &harness.components;
    let issued = components.rotation.issue("redis", ServiceType::InternalService, &[]).await.unwrap();

    harness.clock.advance(Duration::days(91));
    components.rotation.issue("postgres", ServiceType::InternalService, &[]).await.unwrap();

    components.dashboard.run_health_check().await.unwrap();
    components.dashboard.run_health_check().await.unwrap();

    let alerts = components.alerts.active_for("redis");
    assert_eq!(alerts.len(), 1, "{:?}", alerts);
    assert_eq!(alerts[0].kind, AlertKind::Expiry);
    assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    assert_eq!(alerts[0].occurrences, 2);
    assert!(components.alerts.has_critical());
    assert!(components.alerts.active_for("postgres").is_empty());

    let outcome = components.rotation.check_and_rotate("redis").await.unwrap();
    assert!(outcome.rotated);
    assert_eq!(outcome.state_before, Some(LifecycleState::Expired));
    assert_eq!(outcome.reason, Some(RotationReason::Expired));
    assert_eq!(outcome.previous_serial, Some(issued.bundle.serial_number()));
    assert!(components.alerts.active_for("redis").is_empty());

    components.dashboard.run_health_check().await.unwrap();
    assert!(components.alerts.active().is_empty());
    assert_eq!(components.alerts.resolved().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checks_rotate_once() {
    let harness = Harness::new().await;
    let rotation = harness.components.rotation.clone();
    let issued = rotation.issue("postgres", ServiceType::InternalService, &[]).await.unwrap();

    harness.clock.advance(Duration::days(70));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let rotation = Arc::clone(&rotation);
        handles.push(tokio::spawn(async move { rotation.check_and_rotate("postgres").await }));
    }

    let mut rotated = 0;
    let mut fingerprints = HashSet::new();
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        if outcome.rotated {
            rotated += 1;
        }
        fingerprints.insert(outcome.bundle.fingerprint().to_string());
    }
    assert_eq!(rotated, 1);
    assert_eq!(fingerprints.len(), 1);

    let current = harness.components.store.load("postgres").await.unwrap();
    assert!(fingerprints.contains(current.fingerprint()));
    let old = harness
        .components
        .store
        .load_serial("postgres", issued.bundle.serial_number())
        .await
        .unwrap();
    assert_eq!(old.fingerprint(), issued.bundle.fingerprint());
}

#[tokio::test]
async fn test_fresh_bundle_is_left_alone() {
    let harness = Harness::new().await;
    let rotation = &harness.components.rotation;
    let issued = rotation.issue("ai-service", ServiceType::InternalService, &[]).await.unwrap();

    harness.clock.advance(Duration::days(59));
    for _ in 0..3 {
        let outcome = rotation.check_and_rotate("ai-service").await.unwrap();
        assert!(!outcome.rotated);
        assert_eq!(outcome.state_before, Some(LifecycleState::Fresh));
        assert_eq!(outcome.bundle.serial_number(), issued.bundle.serial_number());
    }

    let schedule = rotation.schedule("ai-service").unwrap();
    assert_eq!(schedule.rotate_at, issued.bundle.not_after() - Duration::days(30));
}

#[tokio::test]
async fn test_rotation_survives_restart() {
    let harness = Harness::new().await;
    harness.components.rotation.issue("redis", ServiceType::InternalService, &[]).await.unwrap();

    harness.clock.advance(Duration::days(65));
    let rotated = harness.components.rotation.check_and_rotate("redis").await.unwrap();
    assert!(rotated.rotated);
    assert_eq!(rotated.reason, Some(RotationReason::WarningThreshold));

    let restarted = harness.restart().await;
    let current = restarted.store.load("redis").await.unwrap();
    assert_eq!(current.fingerprint(), rotated.bundle.fingerprint());
    assert!(!restarted.rotation.check_and_rotate("redis").await.unwrap().rotated);

    let next = restarted.rotation.force_rotate("redis").await.unwrap();
    assert!(next.rotated);
    assert!(next.bundle.serial_number() > rotated.bundle.serial_number());
}

#[tokio::test]
async fn test_sweep_reports_every_service() {
    let harness = Harness::new().await;
    let rotation = &harness.components.rotation;
    rotation.issue("redis", ServiceType::InternalService, &[]).await.unwrap();
    harness.clock.advance(Duration::days(40));
    rotation.issue("postgres", ServiceType::InternalService, &[]).await.unwrap();

    // redis is 80 days old, postgres 40
    harness.clock.advance(Duration::days(40));
    let summary = rotation.rotate_all().await.unwrap();
    assert!(summary.failures.is_empty());
    assert_eq!(summary.outcomes.len(), 2);
    assert_eq!(summary.rotated_count(), 1);

    let rotated: Vec<_> = summary.outcomes.iter().filter(|o| o.rotated).collect();
    assert_eq!(rotated[0].bundle.service_name(), "redis");
}

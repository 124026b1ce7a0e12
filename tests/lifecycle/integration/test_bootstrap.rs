use std::sync::Arc;

use meshcert::cli::exit;
use meshcert::cli::{execute, CommandContext, Commands};
use meshcert::config::{AppConfig, SinkKind};
use meshcert::observability::MetricsRecorder;
use meshcert::pki::RootOrigin;
use meshcert::rotation::RotationReason;

use crate::lifecycle::support::{config_for, CachedKeys, Harness};

#[tokio::test]
async fn test_bootstrap_issues_inventory_once() {
    let harness = Harness::new().await;
    let components = &harness.components;
    assert_eq!(components.ca.origin(), RootOrigin::Created);

    for spec in harness.config.services.iter() {
        let outcome = components.rotation.ensure_bundle(spec).await.unwrap();
        assert!(outcome.rotated, "{} should have been issued", spec.name);
        assert_eq!(outcome.reason, Some(RotationReason::Missing));
    }

    let mut expected: Vec<String> = harness.config.services.iter().map(|s| s.name.clone()).collect();
    expected.sort();
    assert_eq!(components.store.list_services().await.unwrap(), expected);

    let gateway = components.store.load("api-gateway").await.unwrap();
    assert_eq!(gateway.service_type(), meshcert::ServiceType::ApiGateway);

    // A second run over the same directories changes nothing.
    let restarted = harness.restart().await;
    assert_eq!(restarted.ca.origin(), RootOrigin::Loaded);
    assert_eq!(restarted.ca.public().fingerprint(), components.ca.public().fingerprint());

    for spec in harness.config.services.iter() {
        let outcome = restarted.rotation.ensure_bundle(spec).await.unwrap();
        assert!(!outcome.rotated, "{} was reissued", spec.name);
    }

    let report = restarted.dashboard.run_health_check().await.unwrap();
    assert_eq!(report.records.len(), 6);
    assert_eq!(report.healthy_count(), 6);
    assert!(report.failures.is_empty());
    assert!(restarted.alerts.active().is_empty());
}

#[tokio::test]
async fn test_extra_domain_is_added_to_every_bundle() {
    let harness = Harness::with_config(|config| {
        config.issuance.extra_domain = Some("mesh.internal".to_string());
        config.services.0.truncate(1);
    })
    .await;

    let spec = harness.config.services.iter().next().unwrap().clone();
    harness.components.rotation.ensure_bundle(&spec).await.unwrap();

    let bundle = harness.components.store.load(&spec.name).await.unwrap();
    assert!(bundle.sans().contains(&format!("{}.mesh.internal", spec.name)));
}

fn context_for(config: AppConfig) -> CommandContext {
    CommandContext::new(config, MetricsRecorder::new()).with_key_generator(Arc::new(CachedKeys))
}

#[tokio::test]
async fn test_bootstrap_publishes_bundles_it_did_not_issue() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(dir.path());
    config.services.0.truncate(2);
    let names: Vec<String> = config.services.iter().map(|s| s.name.clone()).collect();

    let first = execute(&context_for(config.clone()), Commands::Bootstrap).await.unwrap();
    assert_eq!(first.exit_code, exit::SUCCESS);

    // Publishing switched on, but the sink cannot write.
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"").unwrap();
    let mut failing = config.clone();
    failing.publish.enabled = true;
    failing.publish.sink = SinkKind::Directory;
    failing.publish.directory = Some(blocker.join("secrets"));
    let report = execute(&context_for(failing), Commands::Bootstrap).await.unwrap();
    assert_eq!(report.exit_code, exit::PUBLISH);
    assert_eq!(report.body["rotated"], 0);

    // Next run with a working sink publishes every existing bundle.
    let secrets = dir.path().join("secrets");
    let mut publishing = config.clone();
    publishing.publish.enabled = true;
    publishing.publish.sink = SinkKind::Directory;
    publishing.publish.directory = Some(secrets.clone());
    let report = execute(&context_for(publishing), Commands::Bootstrap).await.unwrap();
    assert_eq!(report.exit_code, exit::SUCCESS);
    assert_eq!(report.body["rotated"], 0);

    for name in &names {
        let path = secrets.join("default").join(format!("{}-mtls-certs.json", name));
        assert!(path.exists(), "{} was not published", name);
    }
}

use std::collections::HashSet;
use std::sync::Arc;

use meshcert::pki::{CertificateValidator, KeyAlgorithm, ServiceType, SystemClock};
use meshcert::MeshCertError;
use tokio::task::JoinSet;

use crate::lifecycle::support::{ca_for, config_for};

#[test]
fn test_internal_service_identity() {
    let dir = tempfile::tempdir().unwrap();
    let ca = ca_for(&config_for(dir.path()), Arc::new(SystemClock));

    let bundle = ca
        .issue_certificate("ai-service", ServiceType::InternalService, &["ai.example.com".to_string()])
        .unwrap();

    assert_eq!(bundle.service_name(), "ai-service");
    assert_eq!(bundle.service_type(), ServiceType::InternalService);
    assert_eq!(bundle.key_algorithm(), KeyAlgorithm::Rsa { bits: 2048 });
    assert_eq!(
        bundle.sans(),
        [
            "ai-service",
            "ai-service.default",
            "ai-service.default.svc",
            "ai-service.default.svc.cluster.local",
            "ai.example.com",
        ]
    );
    assert_eq!(bundle.not_after() - bundle.not_before(), chrono::Duration::days(90));
    assert_eq!(bundle.fullchain_pem().matches("BEGIN CERTIFICATE").count(), 2);

    let result = CertificateValidator::new(Arc::new(SystemClock)).validate(&bundle, ca.public()).unwrap();
    assert!(result.valid, "{:?}", result);
}

#[test]
fn test_type_specific_sans() {
    let dir = tempfile::tempdir().unwrap();
    let ca = ca_for(&config_for(dir.path()), Arc::new(SystemClock));

    let gateway = ca.issue_certificate("api-gateway", ServiceType::ApiGateway, &[]).unwrap();
    assert!(gateway.sans().contains(&"*.api-gateway.default.svc.cluster.local".to_string()));
    assert_eq!(gateway.service_type(), ServiceType::ApiGateway);

    let device = ca.issue_certificate("edge-01", ServiceType::Device, &[]).unwrap();
    assert_eq!(device.sans(), ["edge-01"]);
}

#[test]
fn test_illegal_service_name_is_issuance_error() {
    let dir = tempfile::tempdir().unwrap();
    let ca = ca_for(&config_for(dir.path()), Arc::new(SystemClock));

    for name in ["", "../escape", "Upper"] {
        let err = ca.issue_certificate(name, ServiceType::InternalService, &[]).unwrap_err();
        assert!(matches!(err, MeshCertError::Issuance { .. }), "{name}: {err}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_issuance_yields_distinct_serials() {
    let dir = tempfile::tempdir().unwrap();
    let ca = Arc::new(ca_for(&config_for(dir.path()), Arc::new(SystemClock)));

    let mut tasks = JoinSet::new();
    for i in 0..100 {
        let ca = ca.clone();
        tasks.spawn_blocking(move || {
            ca.issue_certificate(&format!("svc-{i}"), ServiceType::InternalService, &[])
                .unwrap()
                .serial_number()
        });
    }

    let mut serials = HashSet::new();
    while let Some(serial) = tasks.join_next().await {
        assert!(serials.insert(serial.unwrap()), "duplicate serial");
    }
    assert_eq!(serials.len(), 100);
    assert_eq!(ca.last_serial().unwrap(), *serials.iter().max().unwrap());
}

#[test]
fn test_serials_continue_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());

    let first = ca_for(&config, Arc::new(SystemClock));
    let before = first.issue_certificate("redis", ServiceType::InternalService, &[]).unwrap();
    let fingerprint = first.public().fingerprint().to_string();
    drop(first);

    let reloaded = ca_for(&config, Arc::new(SystemClock));
    assert_eq!(reloaded.public().fingerprint(), fingerprint);
    let after = reloaded.issue_certificate("redis", ServiceType::InternalService, &[]).unwrap();
    assert!(after.serial_number() > before.serial_number());
}

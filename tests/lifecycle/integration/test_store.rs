use std::sync::Arc;

use meshcert::config::StorageConfig;
use meshcert::pki::{ServiceType, SystemClock};
use meshcert::storage::{CertificateStore, FileCertificateStore};
use meshcert::MeshCertError;

use crate::lifecycle::support::{ca_for, config_for};

fn store_at(root: &std::path::Path) -> FileCertificateStore {
    let config = StorageConfig { root_dir: root.join("certs"), ..StorageConfig::default() };
    FileCertificateStore::new(&config).unwrap()
}

#[tokio::test]
async fn test_round_trip_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let ca = ca_for(&config_for(dir.path()), Arc::new(SystemClock));
    let store = store_at(dir.path());

    let bundle = ca.issue_certificate("redis", ServiceType::InternalService, &[]).unwrap();
    store.save(&bundle).await.unwrap();
    store.evict_cached("redis").await;

    let loaded = store.load("redis").await.unwrap();
    assert_eq!(loaded.fingerprint(), bundle.fingerprint());
    assert_eq!(loaded.key_pem(), bundle.key_pem());
    assert_eq!(loaded.ca_pem(), bundle.ca_pem());
    assert_eq!(loaded.service_type(), ServiceType::InternalService);

    let service_dir = store.service_dir("redis");
    assert_eq!(std::fs::read_to_string(service_dir.join("cert.pem")).unwrap(), bundle.cert_pem());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(service_dir.join("key.pem")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

#[tokio::test]
async fn test_history_and_listing() {
    let dir = tempfile::tempdir().unwrap();
    let ca = ca_for(&config_for(dir.path()), Arc::new(SystemClock));
    let store = store_at(dir.path());

    let first = ca.issue_certificate("redis", ServiceType::InternalService, &[]).unwrap();
    let second = ca.issue_certificate("redis", ServiceType::InternalService, &[]).unwrap();
    let gateway = ca.issue_certificate("api-gateway", ServiceType::ApiGateway, &[]).unwrap();
    for bundle in [&first, &second, &gateway] {
        store.save(bundle).await.unwrap();
    }

    assert_eq!(store.load("redis").await.unwrap().serial_number(), second.serial_number());
    let superseded = store.load_serial("redis", first.serial_number()).await.unwrap();
    assert_eq!(superseded.fingerprint(), first.fingerprint());
    assert!(store.load_serial("redis", 999_999).await.unwrap_err().is_not_found());

    assert_eq!(store.list_services().await.unwrap(), vec!["api-gateway", "redis"]);

    store.remove("redis").await.unwrap();
    let err = store.load("redis").await.unwrap_err();
    assert!(matches!(err, MeshCertError::NotFound { .. }), "{err}");
    assert_eq!(store.list_services().await.unwrap(), vec!["api-gateway"]);
}

#[tokio::test]
async fn test_two_instances_share_a_root() {
    let dir = tempfile::tempdir().unwrap();
    let ca = ca_for(&config_for(dir.path()), Arc::new(SystemClock));
    let writer = store_at(dir.path());
    let reader = store_at(dir.path());

    let bundle = ca.issue_certificate("postgres", ServiceType::InternalService, &[]).unwrap();
    writer.save(&bundle).await.unwrap();
    assert_eq!(reader.load("postgres").await.unwrap().fingerprint(), bundle.fingerprint());

    let rotated = ca.issue_certificate("postgres", ServiceType::InternalService, &[]).unwrap();
    writer.save(&rotated).await.unwrap();
    reader.evict_cached("postgres").await;
    assert_eq!(reader.load("postgres").await.unwrap().fingerprint(), rotated.fingerprint());
}

#[tokio::test]
async fn test_illegal_names_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path());

    for name in ["../etc", "Redis", ""] {
        let err = store.load(name).await.unwrap_err();
        assert!(matches!(err, MeshCertError::Validation { .. }), "{name}: {err}");
    }
}

use std::sync::Arc;

use meshcert::backup::{create_backup, read_backup, restore_backup, BackupKey};
use meshcert::cli::exit;
use meshcert::cli::{execute, CommandContext, Commands};
use meshcert::observability::MetricsRecorder;
use meshcert::storage::{CertificateStore, FileCertificateStore};
use meshcert::{MeshCertError, ServiceType};
use zeroize::Zeroizing;

use crate::lifecycle::support::{config_for, CachedKeys, Harness};

fn key() -> BackupKey {
    BackupKey::from_bytes(Zeroizing::new([0x5a; 32]))
}

#[tokio::test]
async fn test_backup_restores_into_fresh_directories() {
    let source = Harness::new().await;
    for spec in source.config.services.iter() {
        source.components.rotation.ensure_bundle(spec).await.unwrap();
    }
    let out = tempfile::tempdir().unwrap();
    let manifest = create_backup(
        &source.components.ca,
        source.components.store.as_ref(),
        &key(),
        out.path(),
    )
    .await
    .unwrap();
    assert_eq!(manifest.services.len(), 6);
    assert!(manifest.skipped.is_empty());
    assert_eq!(manifest.ca_fingerprint, source.components.ca.public().fingerprint());

    let payload = read_backup(&manifest.path, &key()).await.unwrap();
    assert_eq!(payload.bundles.len(), 6);
    assert_eq!(payload.serial, source.components.ca.last_serial().unwrap().to_string());

    let target = tempfile::tempdir().unwrap();
    let target_config = config_for(target.path());
    let store = FileCertificateStore::new(&target_config.storage).unwrap();
    let report = restore_backup(&manifest.path, &key(), &target_config.ca.dir, &store, false)
        .await
        .unwrap();
    assert_eq!(report.services.len(), 6);

    let restored = meshcert::startup::Components::build_with(
        target_config,
        MetricsRecorder::new(),
        Arc::new(store),
        Arc::new(CachedKeys),
        source.clock.clone(),
    )
    .await
    .unwrap();
    assert_eq!(restored.ca.public().fingerprint(), source.components.ca.public().fingerprint());

    let health = restored.dashboard.run_health_check().await.unwrap();
    assert_eq!(health.healthy_count(), 6);

    // New serials continue after the backed-up counter.
    let next = restored.rotation.issue("redis", ServiceType::InternalService, &[]).await.unwrap();
    assert!(next.bundle.serial_number() > source.components.ca.last_serial().unwrap());
}

#[tokio::test]
async fn test_restore_does_not_overwrite_without_force() {
    let harness = Harness::new().await;
    harness.components.rotation.issue("redis", ServiceType::InternalService, &[]).await.unwrap();
    let out = tempfile::tempdir().unwrap();
    let manifest =
        create_backup(&harness.components.ca, harness.components.store.as_ref(), &key(), out.path())
            .await
            .unwrap();

    let other = Harness::with_config(|config| config.ca.key_bits = 2048).await;
    let err = restore_backup(
        &manifest.path,
        &key(),
        &other.config.ca.dir,
        other.components.store.as_ref(),
        false,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, MeshCertError::Backup { .. }), "{err}");
    assert!(other.components.store.list_services().await.unwrap().is_empty());

    restore_backup(&manifest.path, &key(), &other.config.ca.dir, other.components.store.as_ref(), true)
        .await
        .unwrap();
    let reloaded = other.restart().await;
    assert_eq!(reloaded.ca.public().fingerprint(), harness.components.ca.public().fingerprint());
}

#[tokio::test]
async fn test_wrong_key_is_backup_error() {
    let harness = Harness::new().await;
    let out = tempfile::tempdir().unwrap();
    let manifest =
        create_backup(&harness.components.ca, harness.components.store.as_ref(), &key(), out.path())
            .await
            .unwrap();

    let wrong = BackupKey::from_bytes(Zeroizing::new([0x01; 32]));
    let err = read_backup(&manifest.path, &wrong).await.unwrap_err();
    assert_eq!(err.category(), meshcert::errors::ErrorCategory::Backup);
}

#[tokio::test]
async fn test_cli_backup_and_restore() {
    let source_dir = tempfile::tempdir().unwrap();
    let mut config = config_for(source_dir.path());
    config.services.0.truncate(2);
    let context = CommandContext::new(config, MetricsRecorder::new())
        .with_key_generator(Arc::new(CachedKeys))
        .with_backup_key(key());

    let out = tempfile::tempdir().unwrap();
    let err = execute(&context, Commands::Backup { output: out.path().to_path_buf() }).await.unwrap_err();
    assert_eq!(exit::code_for_error(&err), exit::BACKUP);

    execute(&context, Commands::Bootstrap).await.unwrap();
    let report = execute(&context, Commands::Backup { output: out.path().to_path_buf() }).await.unwrap();
    assert_eq!(report.exit_code, exit::SUCCESS);
    let path = std::path::PathBuf::from(report.body["path"].as_str().unwrap());

    let target_dir = tempfile::tempdir().unwrap();
    let target = CommandContext::new(config_for(target_dir.path()), MetricsRecorder::new())
        .with_key_generator(Arc::new(CachedKeys))
        .with_backup_key(key());
    let restored = execute(&target, Commands::Restore { input: path, force: false }).await.unwrap();
    assert_eq!(restored.exit_code, exit::SUCCESS);
    assert_eq!(restored.body["services"].as_array().unwrap().len(), 2);

    let health = execute(&target, Commands::Health).await.unwrap();
    assert_eq!(health.exit_code, exit::SUCCESS);
}

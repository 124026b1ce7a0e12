use std::sync::Mutex;

use meshcert::config::AppConfig;
use meshcert::MeshCertError;

/// Configuration loading reads process-wide environment variables.
static ENV_MUTEX: Mutex<()> = Mutex::new(());

const THRESHOLD_VAR: &str = "MESHCERT__ROTATION__WARNING_THRESHOLD_DAYS";
const NAMESPACE_VAR: &str = "MESHCERT__ISSUANCE__NAMESPACE";

struct EnvGuard {
    vars: Vec<(&'static str, Option<String>)>,
}

impl EnvGuard {
    fn set(pairs: &[(&'static str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(name, value)| {
                let previous = std::env::var(name).ok();
                std::env::set_var(name, value);
                (*name, previous)
            })
            .collect();
        Self { vars }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (name, previous) in &self.vars {
            match previous {
                Some(value) => std::env::set_var(name, value),
                None => std::env::remove_var(name),
            }
        }
    }
}

fn write_config(dir: &std::path::Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("meshcert.yaml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_environment_override() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let _env = EnvGuard::set(&[(THRESHOLD_VAR, "14")]);

    let config = AppConfig::load(None).unwrap();
    assert_eq!(config.rotation.warning_threshold_days, 14);
    assert_eq!(config.rotation.warning_threshold(), chrono::Duration::days(14));
    assert_eq!(config.issuance.leaf_validity_days, 90);
}

#[test]
fn test_file_values_and_precedence() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        "issuance:\n  namespace: payments\n  leaf_validity_days: 60\nrotation:\n  warning_threshold_days: 20\n",
    );

    let config = AppConfig::load(Some(&path)).unwrap();
    assert_eq!(config.issuance.namespace, "payments");
    assert_eq!(config.issuance.leaf_validity_days, 60);
    assert_eq!(config.rotation.warning_threshold_days, 20);
    assert_eq!(config.issuance.cluster_domain, "cluster.local");

    let _env = EnvGuard::set(&[(NAMESPACE_VAR, "edge")]);
    let config = AppConfig::load(Some(&path)).unwrap();
    assert_eq!(config.issuance.namespace, "edge");
    assert_eq!(config.issuance.leaf_validity_days, 60);
}

#[test]
fn test_threshold_longer_than_validity_rejected() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        "issuance:\n  leaf_validity_days: 30\nrotation:\n  warning_threshold_days: 30\n",
    );

    let err = AppConfig::load(Some(&path)).unwrap_err();
    assert!(matches!(err, MeshCertError::Validation { .. }), "{err}");
}

#[test]
fn test_missing_file_is_config_error() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().unwrap();

    let err = AppConfig::load(Some(&dir.path().join("absent.yaml"))).unwrap_err();
    assert!(matches!(err, MeshCertError::Config { .. }), "{err}");
    assert_eq!(err.category(), meshcert::errors::ErrorCategory::Config);
}

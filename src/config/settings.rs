//! # Configuration Settings
//!
//! Defines the configuration structure for certificate lifecycle management.
//! Every policy value (validity, thresholds, intervals) lives here so operators
//! can tune it without a rebuild.

use crate::errors::{MeshCertError, Result};
use crate::pki::ServiceType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::Validate;

/// Environment variable prefix; nested keys use `__`, e.g.
/// `MESHCERT__ROTATION__WARNING_THRESHOLD_DAYS=14`.
pub const ENV_PREFIX: &str = "MESHCERT";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Bundle storage configuration
    #[validate(nested)]
    pub storage: StorageConfig,

    /// Root CA configuration
    #[validate(nested)]
    pub ca: CaConfig,

    /// Leaf issuance defaults
    #[validate(nested)]
    pub issuance: IssuanceConfig,

    /// Rotation policy
    #[validate(nested)]
    pub rotation: RotationConfig,

    /// Monitoring cycles and alert thresholds
    #[validate(nested)]
    pub monitoring: MonitoringConfig,

    /// Cluster publishing
    #[validate(nested)]
    pub publish: PublishConfig,

    /// Retry policy for issuance and store writes
    #[validate(nested)]
    pub retry: RetrySettings,

    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,

    /// Services issued by `bootstrap`
    pub services: ServiceInventory,
}

impl AppConfig {
    /// Load configuration from defaults, an optional file and `MESHCERT__*`
    /// environment variables, in increasing order of precedence.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&AppConfig::default())?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            if !path.exists() {
                return Err(MeshCertError::config(format!(
                    "Configuration file {} does not exist",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(MeshCertError::from)?;
        self.validate_custom()
    }

    /// Cross-field rules the validator derive cannot express
    fn validate_custom(&self) -> Result<()> {
        if self.rotation.warning_threshold_days >= self.issuance.leaf_validity_days {
            return Err(MeshCertError::validation_field(
                "Warning threshold must be shorter than the leaf validity period",
                "rotation.warning_threshold_days",
            ));
        }

        if self.monitoring.error_threshold_days >= self.rotation.warning_threshold_days {
            return Err(MeshCertError::validation_field(
                "Error threshold must be shorter than the warning threshold",
                "monitoring.error_threshold_days",
            ));
        }

        if self.publish.enabled {
            match self.publish.sink {
                SinkKind::Http if self.publish.endpoint.is_none() => {
                    return Err(MeshCertError::validation_field(
                        "HTTP publishing requires an endpoint",
                        "publish.endpoint",
                    ));
                }
                SinkKind::Directory if self.publish.directory.is_none() => {
                    return Err(MeshCertError::validation_field(
                        "Directory publishing requires a directory",
                        "publish.directory",
                    ));
                }
                _ => {}
            }
        }

        let mut seen = std::collections::HashSet::new();
        for service in &self.services.0 {
            if !seen.insert(service.name.as_str()) {
                return Err(MeshCertError::validation_field(
                    format!("Service '{}' is listed more than once", service.name),
                    "services",
                ));
            }
        }

        Ok(())
    }
}

/// Bundle storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one sub-directory per service
    pub root_dir: PathBuf,

    /// How long a cached bundle is served before re-reading disk
    #[validate(range(min = 1, message = "Cache TTL must be at least 1 second"))]
    pub cache_ttl_seconds: u64,

    /// Upper bound on cached bundles
    #[validate(range(min = 1, message = "Cache must hold at least one entry"))]
    pub cache_max_entries: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./data/certs"),
            cache_ttl_seconds: 300,
            cache_max_entries: 1024,
        }
    }
}

impl StorageConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

/// Root CA configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CaConfig {
    /// Directory holding `ca-key.pem`, `ca.pem` and the serial counter
    pub dir: PathBuf,

    #[validate(length(min = 1, message = "CA common name cannot be empty"))]
    pub common_name: String,

    #[validate(length(min = 1, message = "CA organization cannot be empty"))]
    pub organization: String,

    /// Root certificate lifetime
    #[validate(range(min = 1, max = 36500, message = "CA validity must be 1..=36500 days"))]
    pub validity_days: u32,

    /// Root RSA modulus size
    #[validate(range(min = 2048, max = 8192, message = "CA key must be 2048..=8192 bits"))]
    pub key_bits: usize,

    /// Leaf RSA modulus size
    #[validate(range(min = 2048, max = 8192, message = "Leaf key must be 2048..=8192 bits"))]
    pub leaf_key_bits: usize,
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/ca"),
            common_name: "meshcert Root CA".to_string(),
            organization: "meshcert".to_string(),
            validity_days: 3650,
            key_bits: 4096,
            leaf_key_bits: 2048,
        }
    }
}

/// Leaf issuance defaults
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct IssuanceConfig {
    #[validate(range(min = 1, max = 825, message = "Leaf validity must be 1..=825 days"))]
    pub leaf_validity_days: u32,

    /// Namespace used for cluster SANs and published secrets
    #[validate(length(min = 1, message = "Namespace cannot be empty"))]
    pub namespace: String,

    #[validate(length(min = 1, message = "Cluster domain cannot be empty"))]
    pub cluster_domain: String,

    /// Optional private DNS zone; adds `{service}.{extra_domain}` to every SAN set
    pub extra_domain: Option<String>,
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            leaf_validity_days: 90,
            namespace: "default".to_string(),
            cluster_domain: "cluster.local".to_string(),
            extra_domain: None,
        }
    }
}

/// Rotation policy
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RotationConfig {
    /// Rotate once the remaining validity is at or below this many days
    #[validate(range(min = 1, message = "Warning threshold must be at least 1 day"))]
    pub warning_threshold_days: u32,

    /// Period of the background rotation sweep
    #[validate(range(min = 1, message = "Sweep interval must be at least 1 second"))]
    pub sweep_interval_seconds: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self { warning_threshold_days: 30, sweep_interval_seconds: 3600 }
    }
}

impl RotationConfig {
    pub fn warning_threshold(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.warning_threshold_days))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

/// Monitoring cycles and alert thresholds
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MonitoringConfig {
    #[validate(range(min = 1, message = "Metrics interval must be at least 1 second"))]
    pub metrics_interval_seconds: u64,

    #[validate(range(min = 1, message = "Health check interval must be at least 1 second"))]
    pub health_check_interval_seconds: u64,

    /// Remaining validity at or below which an alert escalates to ERROR
    #[validate(range(min = 1, message = "Error threshold must be at least 1 day"))]
    pub error_threshold_days: u32,

    /// How long completed metrics cycles are retained
    #[validate(range(min = 1, max = 720, message = "History retention must be 1..=720 hours"))]
    pub history_retention_hours: u32,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_interval_seconds: 300,
            health_check_interval_seconds: 600,
            error_threshold_days: 7,
            history_retention_hours: 24,
        }
    }
}

impl MonitoringConfig {
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_seconds)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    pub fn history_retention(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.history_retention_hours))
    }
}

/// Which secret sink the publisher hands records to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    None,
    Directory,
    Http,
}

/// Cluster publishing configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PublishConfig {
    pub enabled: bool,

    pub sink: SinkKind,

    /// Output directory for the directory sink
    pub directory: Option<PathBuf>,

    /// Base URL for the HTTP sink
    #[validate(url(message = "Publish endpoint must be a valid URL"))]
    pub endpoint: Option<String>,

    #[validate(range(min = 1, max = 120, message = "Publish timeout must be 1..=120 seconds"))]
    pub timeout_seconds: u64,

    /// Apply the strict mTLS policy for the namespace during bootstrap
    pub enforce_strict_mtls: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sink: SinkKind::None,
            directory: None,
            endpoint: None,
            timeout_seconds: 10,
            enforce_strict_mtls: true,
        }
    }
}

impl PublishConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Retry policy for issuance and store writes
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RetrySettings {
    #[validate(range(min = 1, max = 10, message = "Retry attempts must be 1..=10"))]
    pub max_attempts: u32,

    pub initial_backoff_ms: u64,

    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_attempts: 3, initial_backoff_ms: 100, max_backoff_ms: 5000 }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,

    /// Expose a Prometheus endpoint
    pub enable_metrics: bool,

    /// Metrics server port (0 = disabled)
    pub metrics_port: u16,

    /// Global `service` label on exported metrics
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logging: false,
            enable_metrics: false,
            metrics_port: 9464,
            service_name: "meshcert".to_string(),
        }
    }
}

impl ObservabilityConfig {
    /// Get metrics bind address (None if disabled)
    pub fn metrics_bind_address(&self) -> Option<String> {
        if self.metrics_port == 0 {
            None
        } else {
            Some(format!("0.0.0.0:{}", self.metrics_port))
        }
    }
}

/// One entry of the bootstrap inventory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,

    #[serde(rename = "type", default)]
    pub service_type: ServiceType,

    /// Extra SANs appended after the type defaults
    #[serde(default)]
    pub sans: Vec<String>,
}

impl ServiceSpec {
    pub fn new(name: &str, service_type: ServiceType) -> Self {
        Self { name: name.to_string(), service_type, sans: Vec::new() }
    }
}

/// Services issued by `bootstrap`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ServiceInventory(pub Vec<ServiceSpec>);

impl Default for ServiceInventory {
    fn default() -> Self {
        Self(vec![
            ServiceSpec::new("ai-service", ServiceType::InternalService),
            ServiceSpec::new("child-service", ServiceType::InternalService),
            ServiceSpec::new("parent-service", ServiceType::InternalService),
            ServiceSpec::new("api-gateway", ServiceType::ApiGateway),
            ServiceSpec::new("postgres", ServiceType::InternalService),
            ServiceSpec::new("redis", ServiceType::InternalService),
        ])
    }
}

impl ServiceInventory {
    pub fn iter(&self) -> impl Iterator<Item = &ServiceSpec> {
        self.0.iter()
    }

    pub fn get(&self, name: &str) -> Option<&ServiceSpec> {
        self.0.iter().find(|spec| spec.name == name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.issuance.leaf_validity_days, 90);
        assert_eq!(config.rotation.warning_threshold_days, 30);
        assert_eq!(config.monitoring.metrics_interval(), Duration::from_secs(300));
        assert_eq!(config.monitoring.health_check_interval(), Duration::from_secs(600));
        assert_eq!(config.services.len(), 6);
    }

    #[test]
    fn test_threshold_ordering_enforced() {
        let mut config = AppConfig::default();
        config.rotation.warning_threshold_days = 90;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.monitoring.error_threshold_days = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_small_keys_rejected() {
        let mut config = AppConfig::default();
        config.ca.leaf_key_bits = 1024;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Leaf key"));
    }

    #[test]
    fn test_http_sink_requires_endpoint() {
        let mut config = AppConfig::default();
        config.publish.enabled = true;
        config.publish.sink = SinkKind::Http;
        assert!(config.validate().is_err());

        config.publish.endpoint = Some("http://127.0.0.1:8080".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_services_rejected() {
        let mut config = AppConfig::default();
        config.services.0.push(ServiceSpec::new("redis", ServiceType::Device));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_service_inventory_deserializes_type_names() {
        let yaml = "- name: edge-1\n  type: device\n- name: gw\n  type: api-gateway\n  sans: [gw.example.internal]\n";
        let inventory: ServiceInventory = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(inventory.get("edge-1").unwrap().service_type, ServiceType::Device);
        assert_eq!(inventory.get("gw").unwrap().sans, vec!["gw.example.internal".to_string()]);
    }
}

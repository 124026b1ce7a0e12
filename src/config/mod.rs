//! # Configuration Management
//!
//! Layered configuration for the certificate lifecycle subsystem: built-in
//! defaults, an optional YAML/TOML file, then `MESHCERT__*` environment variables.

pub mod settings;

pub use settings::{
    AppConfig, CaConfig, IssuanceConfig, MonitoringConfig, ObservabilityConfig, PublishConfig,
    RetrySettings, RotationConfig, ServiceInventory, ServiceSpec, SinkKind, StorageConfig,
    ENV_PREFIX,
};

//! # meshcert
//!
//! Mutual-TLS certificate lifecycle management for a fleet of services and
//! edge devices: a file-backed root CA, leaf issuance bound to service
//! identity, durable bundle storage, validation, expiry-driven rotation,
//! monitoring with alerting, and publication of bundles to a cluster.
//!
//! ## Architecture
//!
//! ```text
//! CLI → RotationManager → CertificateAuthority → CertificateStore
//!            ↓                                        ↓
//!     ClusterPublisher                       MonitoringDashboard → AlertManager
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use meshcert::{config::AppConfig, observability::MetricsRecorder, startup::Components};
//!
//! #[tokio::main]
//! async fn main() -> meshcert::Result<()> {
//!     let config = AppConfig::load(None)?;
//!     let components = Components::build(config.clone(), MetricsRecorder::new()).await?;
//!     for spec in config.services.iter() {
//!         components.rotation.ensure_bundle(spec).await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod backup;
pub mod cli;
pub mod config;
pub mod errors;
pub mod monitoring;
pub mod observability;
pub mod pki;
pub mod publish;
pub mod retry;
pub mod rotation;
pub mod scheduler;
pub mod startup;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types and traits
pub use config::AppConfig;
pub use errors::{MeshCertError, Result};
pub use pki::{CertificateAuthority, CertificateBundle, CertificateValidator, ServiceType};
pub use rotation::RotationManager;
pub use storage::CertificateStore;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

//! # Structured Logging
//!
//! Subscriber setup and span macros for certificate lifecycle operations.
//!
//! `RUST_LOG` takes precedence over the configured level so operators can
//! raise verbosity for one module without touching configuration files.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ObservabilityConfig;
use crate::errors::{MeshCertError, Result};

/// Create a span for an operation on one service's certificate.
///
/// ```rust,ignore
/// let span = cert_span!("rotate", "ai-service");
/// let span = cert_span!("issue", "ai-service", service_type = "device");
/// ```
#[macro_export]
macro_rules! cert_span {
    ($operation:expr, $service:expr) => {
        tracing::info_span!(
            "cert_operation",
            operation = %$operation,
            service = %$service,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $service:expr, $($field:tt)*) => {
        tracing::info_span!(
            "cert_operation",
            operation = %$operation,
            service = %$service,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a span for one run of a periodic cycle (metrics, health, sweep)
#[macro_export]
macro_rules! cycle_span {
    ($cycle:expr) => {
        tracing::debug_span!("lifecycle_cycle", cycle = %$cycle, cycle_id = %uuid::Uuid::new_v4())
    };
    ($cycle:expr, $($field:tt)*) => {
        tracing::debug_span!(
            "lifecycle_cycle",
            cycle = %$cycle,
            cycle_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Build the env filter: `RUST_LOG` if set, otherwise `level`.
pub fn build_filter(level: &str) -> Result<EnvFilter> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives),
        _ => EnvFilter::try_new(level),
    }
    .map_err(|e| MeshCertError::config(format!("Invalid log filter: {}", e)))
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays machine-parsable.
///
/// Returns `false` when a subscriber was already installed (tests, embedding).
pub fn init_logging(config: &ObservabilityConfig) -> Result<bool> {
    let filter = build_filter(&config.log_level)?;
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(true);

    let installed = if config.json_logging {
        builder.json().flatten_event(true).try_init().is_ok()
    } else {
        builder.compact().try_init().is_ok()
    };
    Ok(installed)
}

/// Log configuration at startup
pub fn log_config_info(config: &crate::config::AppConfig) {
    tracing::info!(
        storage_root = %config.storage.root_dir.display(),
        ca_dir = %config.ca.dir.display(),
        leaf_validity_days = config.issuance.leaf_validity_days,
        warning_threshold_days = config.rotation.warning_threshold_days,
        metrics_interval_secs = config.monitoring.metrics_interval_seconds,
        health_interval_secs = config.monitoring.health_check_interval_seconds,
        publish_sink = ?config.publish.sink,
        metrics_enabled = %config.observability.enable_metrics,
        "meshcert configuration"
    );
}

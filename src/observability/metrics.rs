//! # Metrics Collection
//!
//! Prometheus metrics for issuance, rotation, monitoring and publishing.
//!
//! Recording goes through the `metrics` facade; without an installed exporter
//! every call is a no-op, which is what the CLI and tests rely on.

use crate::config::ObservabilityConfig;
use crate::errors::{MeshCertError, Result};
use ::tracing::{info, warn};
use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Per-cycle certificate counts published as gauges
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CertificateCounts {
    pub total: u64,
    pub valid: u64,
    pub expiring_soon: u64,
    pub expired: u64,
    pub invalid: u64,
}

/// Metrics recorder that tracks certificate lifecycle metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    /// Create a new metrics recorder instance
    pub fn new() -> Self {
        Self
    }

    /// Record a leaf issuance attempt and its signing latency
    pub fn record_issuance(&self, service_type: &str, success: bool, duration: f64) {
        let status = if success { "success" } else { "error" };
        let labels = [("service_type", service_type.to_string()), ("status", status.to_string())];
        counter!("certificates_issued_total", &labels).increment(1);
        histogram!("certificate_issue_duration_seconds").record(duration);
    }

    /// Record a rotation check outcome (`rotated`, `unchanged`, `failed`)
    pub fn record_rotation(&self, outcome: &str) {
        counter!("certificate_rotations_total", "outcome" => outcome.to_string()).increment(1);
    }

    /// Update certificate population gauges
    pub fn update_certificate_counts(&self, counts: &CertificateCounts) {
        gauge!("certificates_total").set(counts.total as f64);
        gauge!("certificates_valid").set(counts.valid as f64);
        gauge!("certificates_expiring_soon").set(counts.expiring_soon as f64);
        gauge!("certificates_expired").set(counts.expired as f64);
        gauge!("certificates_invalid").set(counts.invalid as f64);
    }

    /// Record remaining validity for one service
    pub fn set_days_until_expiry(&self, service: &str, days: i64) {
        gauge!("certificate_days_until_expiry", "service" => service.to_string()).set(days as f64);
    }

    /// Record how long a store load took
    pub fn record_load_latency(&self, duration: f64, success: bool) {
        let status = if success { "success" } else { "error" };
        histogram!("certificate_load_duration_seconds", "status" => status).record(duration);
    }

    /// Record how long a validation took
    pub fn record_validate_latency(&self, duration: f64) {
        histogram!("certificate_validate_duration_seconds").record(duration);
    }

    /// Record a raised alert
    pub fn record_alert(&self, severity: &str, kind: &str) {
        let labels = [("severity", severity.to_string()), ("kind", kind.to_string())];
        counter!("certificate_alerts_total", &labels).increment(1);
    }

    /// Update the active-alert gauge for a severity
    pub fn set_active_alerts(&self, severity: &str, count: usize) {
        gauge!("certificate_alerts_active", "severity" => severity.to_string()).set(count as f64);
    }

    /// Record a publish attempt
    pub fn record_publish(&self, target: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        let labels = [("target", target.to_string()), ("status", status.to_string())];
        counter!("certificate_publish_total", &labels).increment(1);
    }

    /// Record a completed periodic cycle
    pub fn record_cycle(&self, cycle: &str, success: bool, duration: f64) {
        let status = if success { "success" } else { "error" };
        counter!("lifecycle_cycles_total", "cycle" => cycle.to_string(), "status" => status)
            .increment(1);
        histogram!("lifecycle_cycle_duration_seconds", "cycle" => cycle.to_string())
            .record(duration);
    }

    /// Register baseline metrics so Prometheus exports appear before events occur.
    pub fn register_certificate_metrics(&self) {
        describe_counter!(
            "certificates_issued_total",
            Unit::Count,
            "Leaf certificates issued, by service type and outcome"
        );
        describe_histogram!(
            "certificate_issue_duration_seconds",
            Unit::Seconds,
            "Time spent generating a key and signing a leaf"
        );
        describe_counter!(
            "certificate_rotations_total",
            Unit::Count,
            "Rotation checks grouped by outcome"
        );
        describe_gauge!("certificates_total", Unit::Count, "Bundles known to the store");
        describe_gauge!("certificates_valid", Unit::Count, "Bundles passing validation");
        describe_gauge!(
            "certificates_expiring_soon",
            Unit::Count,
            "Valid bundles inside the rotation window"
        );
        describe_gauge!("certificates_expired", Unit::Count, "Bundles past notAfter");
        describe_gauge!(
            "certificates_invalid",
            Unit::Count,
            "Bundles failing chain, extension or identity checks"
        );
        describe_gauge!(
            "certificate_days_until_expiry",
            Unit::Count,
            "Whole days of validity left per service"
        );
        describe_histogram!(
            "certificate_load_duration_seconds",
            Unit::Seconds,
            "Store load latency"
        );
        describe_histogram!(
            "certificate_validate_duration_seconds",
            Unit::Seconds,
            "Validator latency"
        );
        describe_counter!("certificate_alerts_total", Unit::Count, "Alerts raised");
        describe_gauge!("certificate_alerts_active", Unit::Count, "Unresolved alerts");
        describe_counter!("certificate_publish_total", Unit::Count, "Publish attempts");

        self.update_certificate_counts(&CertificateCounts::default());
        for severity in ["INFO", "WARNING", "ERROR", "CRITICAL"] {
            gauge!("certificate_alerts_active", "severity" => severity).set(0.0);
        }
        for outcome in ["rotated", "unchanged", "failed"] {
            counter!("certificate_rotations_total", "outcome" => outcome).absolute(0);
        }
    }
}

/// Initialize the Prometheus exporter
///
/// Returns the recorder to hand to components; recording is a no-op when the
/// exporter is disabled.
pub fn init_metrics(config: &ObservabilityConfig) -> Result<MetricsRecorder> {
    let recorder = MetricsRecorder::new();
    if !config.enable_metrics {
        return Ok(recorder);
    }

    let metrics_addr = match config.metrics_bind_address() {
        Some(addr) => addr,
        None => {
            warn!("Metrics disabled: no bind address configured");
            return Ok(recorder);
        }
    };

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        MeshCertError::config(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", &config.service_name)
        .install()
        .map_err(|e| {
            MeshCertError::config(format!("Failed to initialize metrics exporter: {}", e))
        })?;

    recorder.register_certificate_metrics();

    info!(
        metrics_addr = %metrics_addr,
        service_name = %config.service_name,
        "Metrics collection initialized"
    );

    Ok(recorder)
}

//! # Monitoring
//!
//! Periodic metrics collection, health checks and alerting over the store's
//! contents.

pub mod alerts;
pub mod dashboard;
pub mod health;

pub use alerts::{Alert, AlertHandler, AlertKind, AlertManager, AlertSeverity, LoggingAlertHandler};
pub use dashboard::{
    DashboardOptions, DashboardSnapshot, HealthReport, LatencyStats, MetricsSnapshot,
    MonitoringDashboard, ServiceFailure,
};
pub use health::{alert_kind_for, severity_for, HealthRecord, SeverityThresholds};

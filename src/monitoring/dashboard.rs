//! # Monitoring Dashboard
//!
//! Two independent cycles feed a read-only snapshot:
//!
//! - the metrics cycle walks `list_all()` and counts bundles by state,
//!   timing loads and validations;
//! - the health-check cycle validates every current bundle and raises or
//!   resolves alerts.
//!
//! Each cycle builds its result off to the side and swaps it in when done,
//! so `snapshot()` never waits on a running cycle. When a cycle fails the
//! previous result is kept and the snapshot is flagged stale.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::alerts::{Alert, AlertKind, AlertManager, AlertSeverity};
use super::health::{alert_kind_for, severity_for, HealthRecord, SeverityThresholds};
use crate::config::AppConfig;
use crate::cycle_span;
use crate::errors::{MeshCertError, Result};
use crate::observability::{CertificateCounts, MetricsRecorder};
use crate::pki::{CaPublic, CertificateBundle, CertificateValidator, ValidationReason};
use crate::scheduler::spawn_periodic;
use crate::storage::CertificateStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_ms: f64,
    pub max_ms: f64,
}

impl LatencyStats {
    fn observe(&mut self, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        self.mean_ms = (self.mean_ms * self.count as f64 + ms) / (self.count + 1) as f64;
        self.max_ms = self.max_ms.max(ms);
        self.count += 1;
    }
}

/// Result of one completed metrics cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub collected_at: DateTime<Utc>,
    pub total: u64,
    pub valid: u64,
    pub expiring_soon: u64,
    pub expired: u64,
    pub invalid: u64,
    pub unreadable: u64,
    pub load_latency: LatencyStats,
    pub validate_latency: LatencyStats,
    pub cycle_duration_ms: u64,
}

/// A service the health check could not evaluate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFailure {
    pub service: String,
    pub error: String,
}

/// Result of one completed health-check cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub checked_at: DateTime<Utc>,
    pub records: Vec<HealthRecord>,
    pub failures: Vec<ServiceFailure>,
}

impl HealthReport {
    pub fn healthy_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_valid).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    /// Set when the most recent attempt of either cycle failed
    pub stale: bool,
    pub last_error: Option<String>,
    pub metrics: Option<MetricsSnapshot>,
    pub health: Option<HealthReport>,
    pub alerts: Vec<Alert>,
    pub history_points: usize,
}

impl DashboardSnapshot {
    pub fn critical_alerts(&self) -> usize {
        self.alerts.iter().filter(|a| a.severity == AlertSeverity::Critical).count()
    }
}

#[derive(Debug, Clone, Default)]
struct CycleState {
    metrics: Option<MetricsSnapshot>,
    health: Option<HealthReport>,
    metrics_failed: bool,
    health_failed: bool,
    last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DashboardOptions {
    pub thresholds: SeverityThresholds,
    pub history_retention: chrono::Duration,
    pub metrics_interval: Duration,
    pub health_interval: Duration,
}

impl DashboardOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            thresholds: SeverityThresholds {
                warning_days: i64::from(config.rotation.warning_threshold_days),
                error_days: i64::from(config.monitoring.error_threshold_days),
            },
            history_retention: config.monitoring.history_retention(),
            metrics_interval: config.monitoring.metrics_interval(),
            health_interval: config.monitoring.health_check_interval(),
        }
    }
}

impl Default for DashboardOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

#[derive(Debug)]
pub struct MonitoringDashboard {
    store: Arc<dyn CertificateStore>,
    validator: CertificateValidator,
    ca: CaPublic,
    alerts: Arc<AlertManager>,
    options: DashboardOptions,
    metrics: MetricsRecorder,
    state: RwLock<Arc<CycleState>>,
    history: Mutex<VecDeque<MetricsSnapshot>>,
}

impl MonitoringDashboard {
    pub fn new(
        store: Arc<dyn CertificateStore>,
        validator: CertificateValidator,
        ca: CaPublic,
        alerts: Arc<AlertManager>,
        options: DashboardOptions,
        metrics: MetricsRecorder,
    ) -> Self {
        Self {
            store,
            validator,
            ca,
            alerts,
            options,
            metrics,
            state: RwLock::new(Arc::new(CycleState::default())),
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn alerts(&self) -> &Arc<AlertManager> {
        &self.alerts
    }

    /// Last completed results plus the currently active alerts.
    pub fn snapshot(&self) -> DashboardSnapshot {
        let state = self.current_state();
        DashboardSnapshot {
            generated_at: self.validator.now(),
            stale: state.metrics_failed || state.health_failed,
            last_error: state.last_error.clone(),
            metrics: state.metrics.clone(),
            health: state.health.clone(),
            alerts: self.alerts.active(),
            history_points: self.history.lock().map(|h| h.len()).unwrap_or(0),
        }
    }

    /// Completed metrics cycles inside the retention window, oldest first.
    pub fn metrics_history(&self) -> Vec<MetricsSnapshot> {
        self.history.lock().map(|h| h.iter().cloned().collect()).unwrap_or_default()
    }

    /// One metrics cycle over every stored bundle.
    pub async fn collect_metrics(&self) -> Result<MetricsSnapshot> {
        let started = Instant::now();
        let now = self.validator.now();
        let mut snapshot = MetricsSnapshot {
            collected_at: now,
            total: 0,
            valid: 0,
            expiring_soon: 0,
            expired: 0,
            invalid: 0,
            unreadable: 0,
            load_latency: LatencyStats::default(),
            validate_latency: LatencyStats::default(),
            cycle_duration_ms: 0,
        };

        let mut bundles = self.store.list_all();
        loop {
            let load_started = Instant::now();
            let Some(item) = bundles.next().await else { break };
            snapshot.load_latency.observe(load_started.elapsed());
            snapshot.total += 1;

            let bundle = match item {
                Ok(bundle) => {
                    self.metrics.record_load_latency(load_started.elapsed().as_secs_f64(), true);
                    bundle
                }
                Err(e) => {
                    self.metrics.record_load_latency(load_started.elapsed().as_secs_f64(), false);
                    debug!(error = %e, "Skipping unreadable bundle in metrics cycle");
                    snapshot.unreadable += 1;
                    continue;
                }
            };

            let validate_started = Instant::now();
            let result = self.validator.validate(&bundle, &self.ca);
            snapshot.validate_latency.observe(validate_started.elapsed());
            self.metrics.record_validate_latency(validate_started.elapsed().as_secs_f64());

            match result {
                Ok(result) if result.valid => {
                    snapshot.valid += 1;
                    if bundle.days_until_expiry(now) <= self.options.thresholds.warning_days {
                        snapshot.expiring_soon += 1;
                    }
                }
                Ok(result) if result.reason == ValidationReason::Expired => snapshot.expired += 1,
                Ok(_) => snapshot.invalid += 1,
                Err(_) => snapshot.unreadable += 1,
            }
            self.metrics.set_days_until_expiry(bundle.service_name(), bundle.days_until_expiry(now));
        }
        drop(bundles);

        if snapshot.total > 0 && snapshot.unreadable == snapshot.total {
            let message = format!("none of the {} stored bundles could be read", snapshot.total);
            warn!("Metrics cycle failed: {}; keeping last snapshot", message);
            self.metrics.record_cycle("metrics", false, started.elapsed().as_secs_f64());
            self.update_state(|state| {
                state.metrics_failed = true;
                state.last_error = Some(message.clone());
            });
            return Err(MeshCertError::internal(message));
        }

        snapshot.cycle_duration_ms = started.elapsed().as_millis() as u64;
        self.metrics.update_certificate_counts(&CertificateCounts {
            total: snapshot.total,
            valid: snapshot.valid,
            expiring_soon: snapshot.expiring_soon,
            expired: snapshot.expired,
            invalid: snapshot.invalid,
        });
        self.metrics.record_cycle("metrics", true, started.elapsed().as_secs_f64());

        self.push_history(snapshot.clone(), now);
        self.update_state(|state| {
            state.metrics = Some(snapshot.clone());
            state.metrics_failed = false;
        });

        info!(
            total = snapshot.total,
            valid = snapshot.valid,
            expiring_soon = snapshot.expiring_soon,
            expired = snapshot.expired,
            invalid = snapshot.invalid,
            unreadable = snapshot.unreadable,
            "Metrics cycle complete"
        );
        Ok(snapshot)
    }

    /// One health-check cycle: validate every current bundle, then raise or
    /// resolve alerts per service.
    pub async fn run_health_check(&self) -> Result<HealthReport> {
        let started = Instant::now();
        let services = match self.store.list_services().await {
            Ok(services) => services,
            Err(e) => {
                warn!(error = %e, "Health check could not list services; keeping last snapshot");
                self.metrics.record_cycle("health", false, started.elapsed().as_secs_f64());
                self.update_state(|state| {
                    state.health_failed = true;
                    state.last_error = Some(e.to_string());
                });
                return Err(e);
            }
        };

        let now = self.validator.now();
        let mut records = Vec::with_capacity(services.len());
        let mut failures = Vec::new();

        for service in services {
            match self.check_service(&service, now).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => failures.push(ServiceFailure { service, error: e.to_string() }),
            }
        }

        let report = HealthReport { checked_at: now, records, failures };
        self.metrics.record_cycle("health", true, started.elapsed().as_secs_f64());
        self.update_state(|state| {
            state.health = Some(report.clone());
            state.health_failed = false;
        });

        info!(
            checked = report.records.len(),
            healthy = report.healthy_count(),
            failures = report.failures.len(),
            critical_alerts = self.alerts.count_active(AlertSeverity::Critical),
            "Health check complete"
        );
        Ok(report)
    }

    async fn check_service(&self, service: &str, now: DateTime<Utc>) -> Result<Option<HealthRecord>> {
        let bundle = match self.store.load(service).await {
            Ok(bundle) => bundle,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => {
                self.alerts
                    .raise(
                        service,
                        AlertKind::Storage,
                        AlertSeverity::Error,
                        format!("current bundle is unreadable and needs manual repair: {}", e),
                    )
                    .await;
                return Err(e);
            }
        };
        self.alerts.resolve_condition(service, AlertKind::Storage);

        let result = match self.validator.validate(&bundle, &self.ca) {
            Ok(result) => result,
            Err(e) => {
                self.alerts
                    .raise(
                        service,
                        AlertKind::Storage,
                        AlertSeverity::Error,
                        format!("current bundle cannot be parsed: {}", e),
                    )
                    .await;
                return Err(e);
            }
        };

        let record = HealthRecord::from_validation(&bundle, &result, now);
        match severity_for(record.days_until_expiry, result.reason, &self.options.thresholds) {
            Some(severity) => {
                let kind = alert_kind_for(result.reason);
                let other = if kind == AlertKind::Validation { AlertKind::Expiry } else { AlertKind::Validation };
                self.alerts.resolve_condition(service, other);
                self.alerts.raise(service, kind, severity, alert_message(&bundle, &record)).await;
            }
            None => {
                self.alerts.resolve_condition(service, AlertKind::Expiry);
                self.alerts.resolve_condition(service, AlertKind::Validation);
            }
        }
        Ok(Some(record))
    }

    /// Start both periodic cycles. In-flight cycles finish before the tasks
    /// observe `shutdown`.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let metrics_dashboard = Arc::clone(self);
        let metrics_task = spawn_periodic(
            "metrics",
            self.options.metrics_interval,
            shutdown.clone(),
            move || {
                let dashboard = Arc::clone(&metrics_dashboard);
                async move {
                    if let Err(e) = dashboard.collect_metrics().instrument(cycle_span!("metrics")).await {
                        warn!(error = %e, "Metrics cycle failed");
                    }
                }
            },
        );

        let health_dashboard = Arc::clone(self);
        let health_task = spawn_periodic(
            "health",
            self.options.health_interval,
            shutdown,
            move || {
                let dashboard = Arc::clone(&health_dashboard);
                async move {
                    if let Err(e) = dashboard.run_health_check().instrument(cycle_span!("health")).await {
                        warn!(error = %e, "Health check cycle failed");
                    }
                }
            },
        );

        vec![metrics_task, health_task]
    }

    fn current_state(&self) -> Arc<CycleState> {
        match self.state.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn update_state(&self, apply: impl FnOnce(&mut CycleState)) {
        let mut guard = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = CycleState::clone(&guard);
        apply(&mut next);
        *guard = Arc::new(next);
    }

    fn push_history(&self, snapshot: MetricsSnapshot, now: DateTime<Utc>) {
        let cutoff = now - self.options.history_retention;
        if let Ok(mut history) = self.history.lock() {
            while history.front().is_some_and(|oldest| oldest.collected_at < cutoff) {
                history.pop_front();
            }
            history.push_back(snapshot);
        }
    }
}

fn alert_message(bundle: &CertificateBundle, record: &HealthRecord) -> String {
    match record.reason {
        ValidationReason::Ok => format!(
            "certificate expires in {} days (notAfter {})",
            record.days_until_expiry,
            bundle.not_after()
        ),
        ValidationReason::Expired => format!("certificate expired at {}", bundle.not_after()),
        reason => match &record.failure_reason {
            Some(detail) => format!("certificate failed validation ({}): {}", reason, detail),
            None => format!("certificate failed validation ({})", reason),
        },
    }
}

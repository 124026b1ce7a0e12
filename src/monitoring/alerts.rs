//! # Alerts
//!
//! Active alerts are deduplicated per `(service, kind, severity)`: raising the
//! same condition again bumps its occurrence count instead of producing a new
//! alert. Raising a different severity for the same `(service, kind)`
//! supersedes the old one, so a service escalating from WARNING to ERROR
//! carries exactly one expiry alert.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::{MeshCertError, Result};
use crate::observability::MetricsRecorder;
use crate::pki::Clock;

/// Resolved alerts kept for reporting
const RESOLVED_HISTORY_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    pub const ALL: [AlertSeverity; 4] =
        [AlertSeverity::Info, AlertSeverity::Warning, AlertSeverity::Error, AlertSeverity::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "INFO",
            AlertSeverity::Warning => "WARNING",
            AlertSeverity::Error => "ERROR",
            AlertSeverity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What condition an alert is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    /// Remaining validity inside a threshold, or already expired
    Expiry,
    /// Chain, extension or identity mismatch
    Validation,
    /// Unreadable or unwritable bundle
    Storage,
    /// Secret or policy propagation failed
    Publish,
    /// Issuance during rotation failed
    Rotation,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Expiry => "expiry",
            AlertKind::Validation => "validation",
            AlertKind::Storage => "storage",
            AlertKind::Publish => "publish",
            AlertKind::Rotation => "rotation",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub severity: AlertSeverity,
    pub kind: AlertKind,
    pub subject_service: String,
    pub message: String,
    pub raised_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub occurrences: u32,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn is_active(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// Receives every newly raised alert at or above its registered severity.
#[async_trait]
pub trait AlertHandler: Send + Sync + fmt::Debug {
    async fn handle(&self, alert: &Alert);
}

/// Writes alerts to the log at a level matching their severity.
#[derive(Debug, Default)]
pub struct LoggingAlertHandler;

#[async_trait]
impl AlertHandler for LoggingAlertHandler {
    async fn handle(&self, alert: &Alert) {
        match alert.severity {
            AlertSeverity::Critical | AlertSeverity::Error => error!(
                alert_id = %alert.id,
                severity = %alert.severity,
                kind = %alert.kind,
                service = %alert.subject_service,
                "{}", alert.message
            ),
            AlertSeverity::Warning => warn!(
                alert_id = %alert.id,
                severity = %alert.severity,
                kind = %alert.kind,
                service = %alert.subject_service,
                "{}", alert.message
            ),
            AlertSeverity::Info => info!(
                alert_id = %alert.id,
                kind = %alert.kind,
                service = %alert.subject_service,
                "{}", alert.message
            ),
        }
    }
}

type AlertKey = (String, AlertKind, AlertSeverity);

#[derive(Debug)]
pub struct AlertManager {
    active: DashMap<AlertKey, Alert>,
    resolved: Mutex<VecDeque<Alert>>,
    handlers: Vec<(AlertSeverity, Arc<dyn AlertHandler>)>,
    clock: Arc<dyn Clock>,
    metrics: MetricsRecorder,
}

impl AlertManager {
    pub fn new(clock: Arc<dyn Clock>, metrics: MetricsRecorder) -> Self {
        Self {
            active: DashMap::new(),
            resolved: Mutex::new(VecDeque::new()),
            handlers: Vec::new(),
            clock,
            metrics,
        }
    }

    /// Dispatch alerts of `min_severity` or worse to `handler`.
    pub fn with_handler(mut self, min_severity: AlertSeverity, handler: Arc<dyn AlertHandler>) -> Self {
        self.handlers.push((min_severity, handler));
        self
    }

    /// Raise (or refresh) an alert. Handlers only see the first occurrence.
    pub async fn raise(
        &self,
        service: &str,
        kind: AlertKind,
        severity: AlertSeverity,
        message: impl Into<String>,
    ) -> Alert {
        let message = message.into();
        let now = self.clock.now();
        let key = (service.to_string(), kind, severity);

        if let Some(mut existing) = self.active.get_mut(&key) {
            existing.occurrences += 1;
            existing.last_seen_at = now;
            existing.message = message;
            return existing.clone();
        }

        let superseded: Vec<AlertKey> = self
            .active
            .iter()
            .filter(|e| e.key().0 == service && e.key().1 == kind)
            .map(|e| e.key().clone())
            .collect();
        for old in superseded {
            self.close(&old, now);
        }

        let alert = Alert {
            id: Uuid::new_v4(),
            severity,
            kind,
            subject_service: service.to_string(),
            message,
            raised_at: now,
            last_seen_at: now,
            occurrences: 1,
            acknowledged_at: None,
            resolved_at: None,
        };
        self.active.insert(key, alert.clone());
        self.metrics.record_alert(severity.as_str(), kind.as_str());
        self.publish_gauges();

        for (min_severity, handler) in &self.handlers {
            if severity >= *min_severity {
                handler.handle(&alert).await;
            }
        }
        alert
    }

    /// Mark an alert as seen by an operator. It stays active.
    pub fn acknowledge(&self, id: Uuid) -> Result<Alert> {
        let now = self.clock.now();
        let mut entry = self
            .active
            .iter_mut()
            .find(|e| e.value().id == id)
            .ok_or_else(|| MeshCertError::not_found("alert", id.to_string()))?;
        if entry.acknowledged_at.is_none() {
            entry.acknowledged_at = Some(now);
        }
        Ok(entry.value().clone())
    }

    /// Resolve one alert by id.
    pub fn resolve(&self, id: Uuid) -> Result<Alert> {
        let key = self
            .active
            .iter()
            .find(|e| e.value().id == id)
            .map(|e| e.key().clone())
            .ok_or_else(|| MeshCertError::not_found("alert", id.to_string()))?;
        self.close(&key, self.clock.now())
            .ok_or_else(|| MeshCertError::not_found("alert", id.to_string()))
    }

    /// Resolve every active alert of `kind` for `service`; returns how many.
    pub fn resolve_condition(&self, service: &str, kind: AlertKind) -> usize {
        let now = self.clock.now();
        let keys: Vec<AlertKey> = self
            .active
            .iter()
            .filter(|e| e.key().0 == service && e.key().1 == kind)
            .map(|e| e.key().clone())
            .collect();
        keys.iter().filter(|key| self.close(key, now).is_some()).count()
    }

    /// Active alerts, most severe first, then oldest first.
    pub fn active(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.active.iter().map(|e| e.value().clone()).collect();
        alerts.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.raised_at.cmp(&b.raised_at)));
        alerts
    }

    pub fn active_for(&self, service: &str) -> Vec<Alert> {
        self.active().into_iter().filter(|a| a.subject_service == service).collect()
    }

    pub fn count_active(&self, severity: AlertSeverity) -> usize {
        self.active.iter().filter(|e| e.key().2 == severity).count()
    }

    pub fn has_critical(&self) -> bool {
        self.count_active(AlertSeverity::Critical) > 0
    }

    /// Recently resolved alerts, newest last.
    pub fn resolved(&self) -> Vec<Alert> {
        self.resolved.lock().map(|h| h.iter().cloned().collect()).unwrap_or_default()
    }

    fn close(&self, key: &AlertKey, now: DateTime<Utc>) -> Option<Alert> {
        let (_, mut alert) = self.active.remove(key)?;
        alert.resolved_at = Some(now);
        info!(
            alert_id = %alert.id,
            service = %alert.subject_service,
            kind = %alert.kind,
            severity = %alert.severity,
            "Alert resolved"
        );
        if let Ok(mut history) = self.resolved.lock() {
            if history.len() >= RESOLVED_HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(alert.clone());
        }
        self.publish_gauges();
        Some(alert)
    }

    fn publish_gauges(&self) {
        for severity in AlertSeverity::ALL {
            self.metrics.set_active_alerts(severity.as_str(), self.count_active(severity));
        }
    }
}

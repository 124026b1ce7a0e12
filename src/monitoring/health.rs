//! Health records and the expiry-to-severity policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::alerts::{AlertKind, AlertSeverity};
use crate::pki::{CertificateBundle, ValidationReason, ValidationResult};

/// Point-in-time validity of one service's current bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub service: String,
    pub is_valid: bool,
    pub reason: ValidationReason,
    pub days_until_expiry: i64,
    pub not_after: DateTime<Utc>,
    pub serial: String,
    pub fingerprint: String,
    pub last_checked_at: DateTime<Utc>,
    pub failure_reason: Option<String>,
}

impl HealthRecord {
    pub fn from_validation(
        bundle: &CertificateBundle,
        result: &ValidationResult,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            service: bundle.service_name().to_string(),
            is_valid: result.valid,
            reason: result.reason,
            days_until_expiry: bundle.days_until_expiry(now),
            not_after: bundle.not_after(),
            serial: bundle.serial_number().to_string(),
            fingerprint: bundle.fingerprint().to_string(),
            last_checked_at: now,
            failure_reason: result.detail.clone(),
        }
    }
}

/// Whole-day thresholds that turn days until expiry into alert severities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeverityThresholds {
    /// At or below: WARNING
    pub warning_days: i64,
    /// At or below: ERROR
    pub error_days: i64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self { warning_days: 30, error_days: 7 }
    }
}

/// Severity for a bundle `days_until_expiry` whole days from expiry with
/// validation `reason`.
///
/// Trust failures and expiry are CRITICAL; a bundle that is not valid yet is
/// an ERROR; otherwise the day count is compared against the thresholds, the
/// same count health records and alert messages report. `None` means healthy.
pub fn severity_for(
    days_until_expiry: i64,
    reason: ValidationReason,
    thresholds: &SeverityThresholds,
) -> Option<AlertSeverity> {
    if reason.is_trust_failure() || reason == ValidationReason::Expired {
        return Some(AlertSeverity::Critical);
    }
    if reason == ValidationReason::NotYetValid {
        return Some(AlertSeverity::Error);
    }
    if days_until_expiry <= 0 {
        Some(AlertSeverity::Critical)
    } else if days_until_expiry <= thresholds.error_days {
        Some(AlertSeverity::Error)
    } else if days_until_expiry <= thresholds.warning_days {
        Some(AlertSeverity::Warning)
    } else {
        None
    }
}

/// Which alert condition a validation outcome belongs to.
pub fn alert_kind_for(reason: ValidationReason) -> AlertKind {
    if reason.is_trust_failure() {
        AlertKind::Validation
    } else {
        AlertKind::Expiry
    }
}

//! Per-service rotation state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::pki::CertificateBundle;

/// Where a bundle sits in its lifetime relative to the warning threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// More than the warning threshold left
    Fresh,
    /// Inside the warning threshold, not yet expired
    Warning,
    /// Past `notAfter`
    Expired,
}

impl LifecycleState {
    pub fn classify(bundle: &CertificateBundle, now: DateTime<Utc>, threshold: Duration) -> Self {
        let remaining = bundle.remaining(now);
        if remaining < Duration::zero() {
            LifecycleState::Expired
        } else if remaining <= threshold {
            LifecycleState::Warning
        } else {
            LifecycleState::Fresh
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationSchedule {
    pub service: String,
    pub warning_threshold_days: i64,
    /// When the current bundle enters the warning window
    pub rotate_at: DateTime<Utc>,
    pub last_rotated_at: Option<DateTime<Utc>>,
    pub next_check_at: DateTime<Utc>,
    /// Operator-requested rotation; the first check at or after this instant rotates
    pub forced_after: Option<DateTime<Utc>>,
}

impl RotationSchedule {
    /// Recompute from the current bundle. Called after every check so the
    /// rotation point always follows the bundle's `notAfter`.
    pub fn for_bundle(
        bundle: &CertificateBundle,
        threshold: Duration,
        now: DateTime<Utc>,
        check_interval: Duration,
    ) -> Self {
        let rotate_at = bundle.not_after() - threshold;
        Self {
            service: bundle.service_name().to_string(),
            warning_threshold_days: threshold.num_days(),
            rotate_at,
            last_rotated_at: None,
            next_check_at: (now + check_interval).min(rotate_at.max(now)),
            forced_after: None,
        }
    }

    pub fn is_forced(&self, now: DateTime<Utc>) -> bool {
        self.forced_after.is_some_and(|at| now >= at)
    }
}

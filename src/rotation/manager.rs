//! # Rotation Manager
//!
//! Decides when a service's bundle must be replaced and performs the
//! replacement: issue, persist, validate, publish.
//!
//! At most one issuance per service is in flight. Callers for the same
//! service queue on a per-service lock and re-read the store once they hold
//! it, so a caller that arrives during a rotation gets the freshly rotated
//! bundle instead of triggering a second issuance.
//!
//! A failed issuance never removes the existing bundle. The caller gets the
//! old bundle back with `rotated == false` and an alert is raised.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

use super::schedule::{LifecycleState, RotationSchedule};
use crate::cert_span;
use crate::config::{AppConfig, ServiceSpec};
use crate::errors::{MeshCertError, Result};
use crate::monitoring::{AlertKind, AlertManager, AlertSeverity};
use crate::observability::MetricsRecorder;
use crate::pki::{
    BundleSummary, CertificateAuthority, CertificateBundle, CertificateValidator, ServiceType,
    ValidationReason,
};
use crate::publish::ClusterPublisher;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::scheduler::spawn_periodic;
use crate::storage::CertificateStore;
use crate::utils::validate_service_name;

/// Why a rotation happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationReason {
    /// No bundle existed yet
    Missing,
    /// Inside the warning threshold
    WarningThreshold,
    Expired,
    /// Chain, extension or identity no longer verifies
    Untrusted,
    /// Operator-requested
    Scheduled,
    /// Explicit issuance (`generate`)
    Requested,
}

#[derive(Debug, Clone)]
pub struct RotationOutcome {
    pub rotated: bool,
    pub bundle: Arc<CertificateBundle>,
    pub state_before: Option<LifecycleState>,
    pub reason: Option<RotationReason>,
    pub previous_serial: Option<u128>,
    /// Publish failure, if the new bundle could not be propagated
    pub publish_error: Option<String>,
    /// Issuance failure that left the previous bundle in place
    pub issuance_error: Option<String>,
}

impl RotationOutcome {
    pub fn report(&self) -> RotationReport {
        RotationReport {
            service: self.bundle.service_name().to_string(),
            rotated: self.rotated,
            state_before: self.state_before,
            reason: self.reason,
            previous_serial: self.previous_serial.map(|s| s.to_string()),
            bundle: self.bundle.summary(),
            publish_error: self.publish_error.clone(),
            issuance_error: self.issuance_error.clone(),
        }
    }
}

/// Serializable, key-free view of an outcome.
#[derive(Debug, Clone, Serialize)]
pub struct RotationReport {
    pub service: String,
    pub rotated: bool,
    pub state_before: Option<LifecycleState>,
    pub reason: Option<RotationReason>,
    pub previous_serial: Option<String>,
    pub bundle: BundleSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuance_error: Option<String>,
}

/// Result of a sweep over every known service.
#[derive(Debug, Default)]
pub struct SweepSummary {
    pub outcomes: Vec<RotationOutcome>,
    pub failures: Vec<(String, MeshCertError)>,
}

impl SweepSummary {
    pub fn rotated_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.rotated).count()
    }
}

#[derive(Debug, Clone)]
pub struct RotationOptions {
    pub warning_threshold: Duration,
    pub sweep_interval: std::time::Duration,
    pub retry: RetryConfig,
}

impl RotationOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            warning_threshold: config.rotation.warning_threshold(),
            sweep_interval: config.rotation.sweep_interval(),
            retry: RetryConfig::from(&config.retry),
        }
    }
}

#[derive(Debug)]
pub struct RotationManager {
    ca: Arc<CertificateAuthority>,
    store: Arc<dyn CertificateStore>,
    validator: CertificateValidator,
    alerts: Arc<AlertManager>,
    publisher: Option<ClusterPublisher>,
    options: RotationOptions,
    metrics: MetricsRecorder,
    locks: DashMap<String, Arc<Mutex<()>>>,
    schedules: DashMap<String, RotationSchedule>,
}

enum Decision {
    Keep,
    Rotate(RotationReason),
}

impl RotationManager {
    pub fn new(
        ca: Arc<CertificateAuthority>,
        store: Arc<dyn CertificateStore>,
        alerts: Arc<AlertManager>,
        publisher: Option<ClusterPublisher>,
        options: RotationOptions,
        metrics: MetricsRecorder,
    ) -> Self {
        let validator = CertificateValidator::new(ca.clock());
        Self {
            ca,
            store,
            validator,
            alerts,
            publisher,
            options,
            metrics,
            locks: DashMap::new(),
            schedules: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CertificateStore> {
        &self.store
    }

    pub fn ca(&self) -> &Arc<CertificateAuthority> {
        &self.ca
    }

    pub fn publisher(&self) -> Option<&ClusterPublisher> {
        self.publisher.as_ref()
    }

    /// Current rotation state for `service`, if it has been checked.
    pub fn schedule(&self, service: &str) -> Option<RotationSchedule> {
        self.schedules.get(service).map(|s| s.clone())
    }

    /// Check `service`'s current bundle and rotate it if due.
    ///
    /// Fails with `NotFound` when the service has no bundle.
    pub async fn check_and_rotate(&self, service: &str) -> Result<RotationOutcome> {
        validate_service_name(service)?;
        let span = cert_span!("check_and_rotate", service);
        async {
            let lock = self.lock_for(service);
            let _guard = lock.lock().await;

            let current = self.load_current(service).await?;
            self.rotate_if_due(service, current).await
        }
        .instrument(span)
        .await
    }

    /// Make sure `spec.name` has a usable bundle: issue one if none exists,
    /// otherwise run the normal rotation check.
    pub async fn ensure_bundle(&self, spec: &ServiceSpec) -> Result<RotationOutcome> {
        validate_service_name(&spec.name)?;
        let span = cert_span!("ensure_bundle", spec.name, service_type = %spec.service_type);
        async {
            let lock = self.lock_for(&spec.name);
            let _guard = lock.lock().await;

            match self.store.load(&spec.name).await {
                Ok(current) => self.rotate_if_due(&spec.name, current).await,
                Err(e) if e.is_not_found() => {
                    self.replace(&spec.name, spec.service_type, &spec.sans, None, RotationReason::Missing)
                        .await
                }
                Err(e) => Err(self.storage_failure(&spec.name, e).await),
            }
        }
        .instrument(span)
        .await
    }

    /// Unconditionally issue a new bundle for `service`, superseding any
    /// existing one.
    pub async fn issue(
        &self,
        service: &str,
        service_type: ServiceType,
        additional_sans: &[String],
    ) -> Result<RotationOutcome> {
        validate_service_name(service)
            .map_err(|e| MeshCertError::issuance(service, e.to_string()))?;
        let span = cert_span!("issue", service, service_type = %service_type);
        async {
            let lock = self.lock_for(service);
            let _guard = lock.lock().await;

            let previous = match self.store.load(service).await {
                Ok(bundle) => Some(bundle),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(self.storage_failure(service, e).await),
            };
            let outcome = self
                .replace(service, service_type, additional_sans, previous, RotationReason::Requested)
                .await?;
            // The old bundle is still in service, but the caller asked for a
            // new one and did not get it.
            if let Some(message) = outcome.issuance_error {
                return Err(MeshCertError::issuance(service, message));
            }
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    /// Publish `bundle` as it stands, without rotating. Used when a run must
    /// make sure the cluster holds the current bundle, such as bootstrap
    /// finding a bundle already in place or a previous publish having failed.
    pub async fn publish_current(&self, bundle: &CertificateBundle) -> Option<String> {
        self.publish(bundle.service_name(), bundle).await
    }

    /// Force the first check at or after `at` to rotate `service`.
    pub async fn schedule_rotation(&self, service: &str, at: DateTime<Utc>) -> Result<RotationSchedule> {
        validate_service_name(service)?;
        let current = self.load_current(service).await?;
        let now = self.validator.now();

        let mut schedule = self.schedules.entry(service.to_string()).or_insert_with(|| {
            RotationSchedule::for_bundle(&current, self.options.warning_threshold, now, self.check_interval())
        });
        schedule.forced_after = Some(at);
        schedule.next_check_at = schedule.next_check_at.min(at.max(now));
        info!(service = %service, at = %at, "Scheduled forced rotation");
        Ok(schedule.clone())
    }

    /// Schedule an immediate rotation and run it.
    pub async fn force_rotate(&self, service: &str) -> Result<RotationOutcome> {
        let now = self.validator.now();
        self.schedule_rotation(service, now).await?;
        self.check_and_rotate(service).await
    }

    /// Run `check_and_rotate` for every stored service. Failures are scoped
    /// to their service and collected.
    pub async fn rotate_all(&self) -> Result<SweepSummary> {
        let services = self.store.list_services().await?;
        let mut summary = SweepSummary::default();

        let mut checks = futures::stream::iter(services)
            .map(|service| async move {
                let result = self.check_and_rotate(&service).await;
                (service, result)
            })
            .buffer_unordered(4);

        while let Some((service, result)) = checks.next().await {
            match result {
                Ok(outcome) => summary.outcomes.push(outcome),
                Err(e) => {
                    warn!(service = %service, error = %e, "Rotation check failed");
                    summary.failures.push((service, e));
                }
            }
        }

        info!(
            checked = summary.outcomes.len() + summary.failures.len(),
            rotated = summary.rotated_count(),
            failed = summary.failures.len(),
            "Rotation sweep complete"
        );
        Ok(summary)
    }

    /// Periodic sweep until `shutdown`.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        spawn_periodic("rotation", self.options.sweep_interval, shutdown, move || {
            let manager = Arc::clone(&manager);
            async move {
                let started = Instant::now();
                let result = manager.rotate_all().await;
                manager.metrics.record_cycle("rotation", result.is_ok(), started.elapsed().as_secs_f64());
                if let Err(e) = result {
                    warn!(error = %e, "Rotation sweep failed");
                }
            }
        })
    }

    fn lock_for(&self, service: &str) -> Arc<Mutex<()>> {
        self.locks.entry(service.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    fn check_interval(&self) -> Duration {
        Duration::from_std(self.options.sweep_interval).unwrap_or_else(|_| Duration::hours(1))
    }

    async fn load_current(&self, service: &str) -> Result<Arc<CertificateBundle>> {
        match self.store.load(service).await {
            Ok(bundle) => Ok(bundle),
            Err(e) if e.is_not_found() => Err(e),
            Err(e) => Err(self.storage_failure(service, e).await),
        }
    }

    fn decide(&self, service: &str, bundle: &CertificateBundle) -> Result<(LifecycleState, Decision)> {
        let now = self.validator.now();
        let state = LifecycleState::classify(bundle, now, self.options.warning_threshold);
        let validation = self.validator.validate(bundle, self.ca.public())?;

        let forced = self.schedules.get(service).is_some_and(|s| s.is_forced(now));
        let decision = if validation.reason.is_trust_failure() {
            Decision::Rotate(RotationReason::Untrusted)
        } else if state == LifecycleState::Expired || validation.reason == ValidationReason::Expired {
            Decision::Rotate(RotationReason::Expired)
        } else if state == LifecycleState::Warning {
            Decision::Rotate(RotationReason::WarningThreshold)
        } else if forced {
            Decision::Rotate(RotationReason::Scheduled)
        } else {
            Decision::Keep
        };
        Ok((state, decision))
    }

    /// Caller must hold the service lock.
    async fn rotate_if_due(&self, service: &str, current: Arc<CertificateBundle>) -> Result<RotationOutcome> {
        let (state, decision) = self.decide(service, &current)?;
        match decision {
            Decision::Keep => {
                self.refresh_schedule(&current, None);
                self.metrics.record_rotation("unchanged");
                Ok(RotationOutcome {
                    rotated: false,
                    bundle: current,
                    state_before: Some(state),
                    reason: None,
                    previous_serial: None,
                    publish_error: None,
                    issuance_error: None,
                })
            }
            Decision::Rotate(reason) => {
                info!(
                    service = %service,
                    state = ?state,
                    reason = ?reason,
                    not_after = %current.not_after(),
                    "Rotating certificate"
                );
                let service_type = current.service_type();
                let sans = current.sans().to_vec();
                let mut outcome =
                    self.replace(service, service_type, &sans, Some(current), reason).await?;
                outcome.state_before = Some(state);
                Ok(outcome)
            }
        }
    }

    /// Issue, persist, validate and publish a replacement. Caller must hold
    /// the service lock.
    async fn replace(
        &self,
        service: &str,
        service_type: ServiceType,
        additional_sans: &[String],
        previous: Option<Arc<CertificateBundle>>,
        reason: RotationReason,
    ) -> Result<RotationOutcome> {
        let started = Instant::now();
        let issued = retry_with_backoff(&self.options.retry, "issue_certificate", || {
            let ca = Arc::clone(&self.ca);
            let service = service.to_string();
            let sans = additional_sans.to_vec();
            async move {
                tokio::task::spawn_blocking(move || ca.issue_certificate(&service, service_type, &sans))
                    .await
                    .map_err(|e| MeshCertError::internal(format!("issuance task failed: {}", e)))?
            }
        })
        .await;
        self.metrics.record_issuance(service_type.as_str(), issued.is_ok(), started.elapsed().as_secs_f64());

        let bundle = match issued {
            Ok(bundle) => bundle,
            Err(e) => return self.issuance_failed(service, previous, reason, e).await,
        };

        let write = retry_with_backoff(&self.options.retry, "store_save", || self.store.save(&bundle)).await;
        if let Err(e) = write {
            error!(service = %service, serial = %bundle.serial_number(), error = %e, "Persisting rotated bundle failed");
            self.alerts
                .raise(
                    service,
                    AlertKind::Storage,
                    AlertSeverity::Critical,
                    format!("new bundle could not be persisted after retries: {}", e),
                )
                .await;
            self.metrics.record_rotation("failed");
            return Err(e);
        }
        let bundle = Arc::new(bundle);

        let validation = self.validator.validate(&bundle, self.ca.public())?;
        if !validation.valid {
            error!(service = %service, reason = %validation.reason, "Freshly issued bundle failed validation");
            self.alerts
                .raise(
                    service,
                    AlertKind::Validation,
                    AlertSeverity::Critical,
                    format!("freshly issued certificate failed validation: {}", validation.reason),
                )
                .await;
        } else {
            self.alerts.resolve_condition(service, AlertKind::Rotation);
            self.alerts.resolve_condition(service, AlertKind::Expiry);
            self.alerts.resolve_condition(service, AlertKind::Validation);
            self.alerts.resolve_condition(service, AlertKind::Storage);
        }

        self.refresh_schedule(&bundle, Some(self.validator.now()));
        self.metrics.record_rotation("rotated");

        let publish_error = self.publish(service, &bundle).await;

        info!(
            service = %service,
            serial = %bundle.serial_number(),
            previous_serial = ?previous.as_ref().map(|p| p.serial_number()),
            reason = ?reason,
            "Certificate rotated"
        );
        Ok(RotationOutcome {
            rotated: true,
            previous_serial: previous.map(|p| p.serial_number()),
            bundle,
            state_before: None,
            reason: Some(reason),
            publish_error,
            issuance_error: None,
        })
    }

    async fn issuance_failed(
        &self,
        service: &str,
        previous: Option<Arc<CertificateBundle>>,
        reason: RotationReason,
        error: MeshCertError,
    ) -> Result<RotationOutcome> {
        self.metrics.record_rotation("failed");
        let Some(current) = previous else {
            return Err(error);
        };

        let now = self.validator.now();
        let expired = current.remaining(now) < Duration::zero();
        let severity = if expired { AlertSeverity::Critical } else { AlertSeverity::Error };
        error!(service = %service, error = %error, expired, "Issuance failed; keeping existing bundle");
        self.alerts
            .raise(
                service,
                AlertKind::Rotation,
                severity,
                format!("rotation failed, still serving serial {}: {}", current.serial_number(), error),
            )
            .await;

        Ok(RotationOutcome {
            rotated: false,
            state_before: None,
            reason: Some(reason),
            previous_serial: None,
            bundle: current,
            publish_error: None,
            issuance_error: Some(error.to_string()),
        })
    }

    async fn publish(&self, service: &str, bundle: &CertificateBundle) -> Option<String> {
        let publisher = self.publisher.as_ref()?;
        match publisher.publish(bundle).await {
            Ok(()) => {
                self.alerts.resolve_condition(service, AlertKind::Publish);
                None
            }
            Err(e) => {
                let error = MeshCertError::publish(service, e);
                self.alerts
                    .raise(service, AlertKind::Publish, AlertSeverity::Error, error.to_string())
                    .await;
                Some(error.to_string())
            }
        }
    }

    async fn storage_failure(&self, service: &str, error: MeshCertError) -> MeshCertError {
        self.alerts
            .raise(
                service,
                AlertKind::Storage,
                AlertSeverity::Error,
                format!("current bundle unavailable, manual intervention required: {}", error),
            )
            .await;
        error
    }

    fn refresh_schedule(&self, bundle: &CertificateBundle, rotated_at: Option<DateTime<Utc>>) {
        let now = self.validator.now();
        let mut next =
            RotationSchedule::for_bundle(bundle, self.options.warning_threshold, now, self.check_interval());
        if let Some(previous) = self.schedules.get(bundle.service_name()) {
            next.last_rotated_at = previous.last_rotated_at;
            // A forced rotation is consumed by the rotation it caused.
            if rotated_at.is_none() {
                next.forced_after = previous.forced_after;
            }
        }
        if rotated_at.is_some() {
            next.last_rotated_at = rotated_at;
        }
        self.schedules.insert(bundle.service_name().to_string(), next);
    }
}

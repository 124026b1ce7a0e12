//! Command handlers.
//!
//! Each handler builds what it needs from the [`CommandContext`] and returns
//! a [`CommandReport`]; printing and exit codes are left to the caller.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::exit;
use super::output::truncate;
use super::Commands;
use crate::backup::{self, BackupKey};
use crate::config::AppConfig;
use crate::errors::MeshCertError;
use crate::observability::MetricsRecorder;
use crate::pki::{ca::CA_KEY_FILE, Clock, KeyGenerator, RootOrigin, RsaKeyGenerator, ServiceType, SystemClock};
use crate::rotation::{RotationOutcome, RotationReport, SweepSummary};
use crate::startup::Components;
use crate::storage::{CertificateStore, FileCertificateStore};

/// What a command hands back: a summary line, a serializable body and the
/// process exit code.
#[derive(Debug, Clone)]
pub struct CommandReport {
    pub summary: String,
    pub body: serde_json::Value,
    pub exit_code: u8,
}

impl CommandReport {
    fn new<T: Serialize>(summary: String, data: &T, exit_code: u8) -> anyhow::Result<Self> {
        let body = serde_json::to_value(data).context("Failed to encode command report")?;
        Ok(Self { summary, body, exit_code })
    }
}

/// Configuration plus the injectable pieces tests replace.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub config: AppConfig,
    pub metrics: MetricsRecorder,
    key_generator: Arc<dyn KeyGenerator>,
    clock: Arc<dyn Clock>,
    backup_key: Option<BackupKey>,
}

impl CommandContext {
    pub fn new(config: AppConfig, metrics: MetricsRecorder) -> Self {
        Self {
            config,
            metrics,
            key_generator: Arc::new(RsaKeyGenerator),
            clock: Arc::new(SystemClock),
            backup_key: None,
        }
    }

    pub fn with_key_generator(mut self, key_generator: Arc<dyn KeyGenerator>) -> Self {
        self.key_generator = key_generator;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use `key` instead of reading `MESHCERT_BACKUP_KEY`.
    pub fn with_backup_key(mut self, key: BackupKey) -> Self {
        self.backup_key = Some(key);
        self
    }

    fn store(&self) -> anyhow::Result<Arc<dyn CertificateStore>> {
        Ok(Arc::new(FileCertificateStore::new(&self.config.storage)?))
    }

    async fn components(&self) -> anyhow::Result<Components> {
        let components = Components::build_with(
            self.config.clone(),
            self.metrics.clone(),
            self.store()?,
            self.key_generator.clone(),
            self.clock.clone(),
        )
        .await?;
        Ok(components)
    }

    fn backup_key(&self) -> anyhow::Result<BackupKey> {
        match &self.backup_key {
            Some(key) => Ok(key.clone()),
            None => Ok(BackupKey::from_env()?),
        }
    }
}

pub async fn execute(context: &CommandContext, command: Commands) -> anyhow::Result<CommandReport> {
    match command {
        Commands::Bootstrap => bootstrap(context).await,
        Commands::Generate { service, service_type, sans } => {
            generate(context, &service, service_type, &sans).await
        }
        Commands::Rotate { service, all, force } => rotate(context, service.as_deref(), all, force).await,
        Commands::Health => health(context).await,
        Commands::Monitor { duration, rotate } => monitor(context, duration, rotate).await,
        Commands::Backup { output } => backup(context, &output).await,
        Commands::Restore { input, force } => restore(context, &input, force).await,
    }
}

#[derive(Debug, Serialize)]
struct RootReport {
    fingerprint: String,
    origin: RootOrigin,
    not_after: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct FailureReport {
    service: String,
    category: String,
    error: String,
}

impl FailureReport {
    fn new(service: &str, error: &MeshCertError) -> Self {
        Self { service: service.to_string(), category: error.category().to_string(), error: error.to_string() }
    }
}

#[derive(Debug, Serialize)]
struct BatchReport {
    root: RootReport,
    checked: usize,
    rotated: usize,
    services: Vec<RotationReport>,
    failures: Vec<FailureReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    strict_mtls_applied: Option<bool>,
}

fn root_report(components: &Components) -> RootReport {
    let public = components.ca.public();
    RootReport {
        fingerprint: public.fingerprint().to_string(),
        origin: components.ca.origin(),
        not_after: public.not_after(),
    }
}

/// Exit code for a batch: the first hard failure wins, then kept-old-bundle
/// issuance failures, then publish failures.
fn batch_exit_code(outcomes: &[RotationOutcome], failures: &[(String, MeshCertError)]) -> u8 {
    if let Some((_, error)) = failures.first() {
        return exit::code_for_category(error.category());
    }
    if outcomes.iter().any(|o| o.issuance_error.is_some()) {
        return exit::ISSUANCE;
    }
    if outcomes.iter().any(|o| o.publish_error.is_some()) {
        return exit::PUBLISH;
    }
    exit::SUCCESS
}

fn batch_report(
    components: &Components,
    summary: SweepSummary,
    strict_mtls_applied: Option<bool>,
) -> (BatchReport, u8) {
    let mut code = batch_exit_code(&summary.outcomes, &summary.failures);
    if code == exit::SUCCESS && strict_mtls_applied == Some(false) {
        code = exit::PUBLISH;
    }
    let report = BatchReport {
        root: root_report(components),
        checked: summary.outcomes.len() + summary.failures.len(),
        rotated: summary.rotated_count(),
        services: summary.outcomes.iter().map(RotationOutcome::report).collect(),
        failures: summary.failures.iter().map(|(s, e)| FailureReport::new(s, e)).collect(),
        strict_mtls_applied,
    };
    (report, code)
}

async fn bootstrap(context: &CommandContext) -> anyhow::Result<CommandReport> {
    let components = context.components().await?;
    let mut summary = SweepSummary::default();

    for spec in context.config.services.iter() {
        match components.rotation.ensure_bundle(spec).await {
            Ok(mut outcome) => {
                // A rotation already published; a kept bundle may never have been.
                if !outcome.rotated {
                    outcome.publish_error = components.rotation.publish_current(&outcome.bundle).await;
                }
                summary.outcomes.push(outcome);
            }
            Err(e) => {
                warn!(service = %spec.name, error = %e, "Bootstrap failed for service");
                summary.failures.push((spec.name.clone(), e));
            }
        }
    }

    let strict_mtls_applied = match components.rotation.publisher() {
        Some(publisher) if context.config.publish.enforce_strict_mtls => {
            Some(publisher.enforce_strict_mtls().await.is_ok())
        }
        _ => None,
    };

    let (report, code) = batch_report(&components, summary, strict_mtls_applied);
    let line = format!(
        "Bootstrapped {} services ({} issued, {} failed); root {} ({:?})",
        report.checked,
        report.rotated,
        report.failures.len(),
        truncate(&report.root.fingerprint, 23),
        report.root.origin,
    );
    CommandReport::new(line, &report, code)
}

async fn generate(
    context: &CommandContext,
    service: &str,
    service_type: ServiceType,
    sans: &[String],
) -> anyhow::Result<CommandReport> {
    let components = context.components().await?;
    let outcome = components.rotation.issue(service, service_type, sans).await?;
    let report = outcome.report();

    let code = if outcome.publish_error.is_some() { exit::PUBLISH } else { exit::SUCCESS };
    let line = format!(
        "Issued certificate for {}: serial {}, expires {}",
        service,
        report.bundle.serial,
        report.bundle.not_after.format("%Y-%m-%d %H:%M:%SZ")
    );
    CommandReport::new(line, &report, code)
}

async fn rotate(
    context: &CommandContext,
    service: Option<&str>,
    all: bool,
    force: bool,
) -> anyhow::Result<CommandReport> {
    let components = context.components().await?;
    let rotation = &components.rotation;

    let summary = match (service, all) {
        (Some(service), _) => {
            let mut summary = SweepSummary::default();
            let result =
                if force { rotation.force_rotate(service).await } else { rotation.check_and_rotate(service).await };
            match result {
                Ok(outcome) => summary.outcomes.push(outcome),
                Err(e) => summary.failures.push((service.to_string(), e)),
            }
            summary
        }
        (None, true) if force => {
            let mut summary = SweepSummary::default();
            for service in components.store.list_services().await? {
                match rotation.force_rotate(&service).await {
                    Ok(outcome) => summary.outcomes.push(outcome),
                    Err(e) => summary.failures.push((service, e)),
                }
            }
            summary
        }
        (None, true) => rotation.rotate_all().await?,
        (None, false) => {
            return Err(MeshCertError::validation("rotate needs --service NAME or --all").into());
        }
    };

    let (report, code) = batch_report(&components, summary, None);
    let line = format!(
        "Checked {} services: {} rotated, {} failed",
        report.checked,
        report.rotated,
        report.failures.len()
    );
    CommandReport::new(line, &report, code)
}

fn health_exit_code(critical: usize) -> u8 {
    if critical > 0 {
        exit::CRITICAL_HEALTH
    } else {
        exit::SUCCESS
    }
}

async fn health(context: &CommandContext) -> anyhow::Result<CommandReport> {
    let components = context.components().await?;
    let dashboard = &components.dashboard;

    let report = dashboard.run_health_check().await?;
    if let Err(e) = dashboard.collect_metrics().await {
        warn!(error = %e, "Metrics cycle failed during health check");
    }
    let snapshot = dashboard.snapshot();

    let critical = snapshot.critical_alerts();
    let line = format!(
        "{}/{} services healthy, {} active alerts ({} critical)",
        report.healthy_count(),
        report.records.len() + report.failures.len(),
        snapshot.alerts.len(),
        critical
    );
    CommandReport::new(line, &snapshot, health_exit_code(critical))
}

async fn monitor(context: &CommandContext, minutes: u64, rotate: bool) -> anyhow::Result<CommandReport> {
    let components = context.components().await?;
    let shutdown = CancellationToken::new();

    let handles = if rotate {
        components.start_background(shutdown.clone())
    } else {
        components.dashboard.start(shutdown.clone())
    };
    info!(minutes, rotate, "Monitoring started");

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(minutes * 60)) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted, stopping monitoring"),
    }
    shutdown.cancel();
    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            warn!(error = %e, "Background task ended abnormally");
        }
    }

    // A zero-length run may stop before the first cycle completes.
    if components.dashboard.snapshot().health.is_none() {
        components.dashboard.run_health_check().await?;
        components.dashboard.collect_metrics().await?;
    }

    let snapshot = components.dashboard.snapshot();
    let line = format!(
        "Monitored for {} minutes: {} metrics cycles retained, {} active alerts ({} critical){}",
        minutes,
        snapshot.history_points,
        snapshot.alerts.len(),
        snapshot.critical_alerts(),
        if snapshot.stale { ", snapshot stale" } else { "" }
    );
    CommandReport::new(line, &snapshot, exit::SUCCESS)
}

async fn backup(context: &CommandContext, output: &Path) -> anyhow::Result<CommandReport> {
    let key = context.backup_key()?;
    let key_path = context.config.ca.dir.join(CA_KEY_FILE);
    if !key_path.exists() {
        return Err(MeshCertError::backup(format!(
            "No root material at {}; nothing to back up",
            context.config.ca.dir.display()
        ))
        .into());
    }

    let components = context.components().await?;
    let manifest =
        backup::create_backup(&components.ca, components.store.as_ref(), &key, output).await?;

    let line = format!("Backed up {} services to {}", manifest.services.len(), manifest.path.display());
    let code = if manifest.skipped.is_empty() { exit::SUCCESS } else { exit::STORE };
    CommandReport::new(line, &manifest, code)
}

async fn restore(context: &CommandContext, input: &Path, force: bool) -> anyhow::Result<CommandReport> {
    let key = context.backup_key()?;
    let store = context.store()?;
    let report = backup::restore_backup(input, &key, &context.config.ca.dir, store.as_ref(), force).await?;

    // Load the restored root to prove it is usable.
    let components = context.components().await?;
    if components.ca.public().fingerprint() != report.ca_fingerprint {
        return Err(MeshCertError::backup("Restored root does not match the backup").into());
    }

    let line = format!(
        "Restored root {} and {} services",
        truncate(&report.ca_fingerprint, 23),
        report.services.len()
    );
    CommandReport::new(line, &report, exit::SUCCESS)
}

//! Startup wiring for the certificate lifecycle components.
//!
//! Builds the component graph from configuration in dependency order:
//! CA, store, alerting, publisher, rotation, monitoring. Nothing is started;
//! background cycles are launched by [`Components::start_background`].

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AppConfig;
use crate::errors::{MeshCertError, Result};
use crate::monitoring::{AlertManager, AlertSeverity, DashboardOptions, LoggingAlertHandler, MonitoringDashboard};
use crate::observability::MetricsRecorder;
use crate::pki::{
    CaOptions, CertificateAuthority, CertificateValidator, Clock, KeyGenerator, RsaKeyGenerator,
    SystemClock,
};
use crate::publish::ClusterPublisher;
use crate::rotation::{RotationManager, RotationOptions};
use crate::storage::{CertificateStore, FileCertificateStore};

#[derive(Debug, Clone)]
pub struct Components {
    pub config: AppConfig,
    pub ca: Arc<CertificateAuthority>,
    pub store: Arc<dyn CertificateStore>,
    pub alerts: Arc<AlertManager>,
    pub rotation: Arc<RotationManager>,
    pub dashboard: Arc<MonitoringDashboard>,
    pub metrics: MetricsRecorder,
}

impl Components {
    /// Production wiring: OS entropy, wall clock, file-backed store.
    pub async fn build(config: AppConfig, metrics: MetricsRecorder) -> Result<Self> {
        let store = Arc::new(FileCertificateStore::new(&config.storage)?);
        Self::build_with(config, metrics, store, Arc::new(RsaKeyGenerator), Arc::new(SystemClock)).await
    }

    pub async fn build_with(
        config: AppConfig,
        metrics: MetricsRecorder,
        store: Arc<dyn CertificateStore>,
        key_generator: Arc<dyn KeyGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let options = CaOptions::from_config(&config);
        let ca_clock = clock.clone();
        // Root key generation can take seconds.
        let ca = tokio::task::spawn_blocking(move || {
            CertificateAuthority::initialize(options, key_generator, ca_clock)
        })
        .await
        .map_err(|e| MeshCertError::internal(format!("CA initialisation task failed: {}", e)))??;
        let ca = Arc::new(ca);

        let alerts = Arc::new(
            AlertManager::new(clock.clone(), metrics.clone())
                .with_handler(AlertSeverity::Warning, Arc::new(LoggingAlertHandler)),
        );

        let publisher = ClusterPublisher::from_config(&config, metrics.clone())?;

        let rotation = Arc::new(RotationManager::new(
            ca.clone(),
            store.clone(),
            alerts.clone(),
            publisher,
            RotationOptions::from_config(&config),
            metrics.clone(),
        ));

        let dashboard = Arc::new(MonitoringDashboard::new(
            store.clone(),
            CertificateValidator::new(clock),
            ca.public().clone(),
            alerts.clone(),
            DashboardOptions::from_config(&config),
            metrics.clone(),
        ));

        info!(
            ca_fingerprint = %ca.public().fingerprint(),
            ca_origin = ?ca.origin(),
            storage_root = %config.storage.root_dir.display(),
            publishing = rotation.publisher().is_some(),
            "Certificate lifecycle components ready"
        );

        Ok(Self { config, ca, store, alerts, rotation, dashboard, metrics })
    }

    /// Start the rotation sweep and both monitoring cycles.
    pub fn start_background(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = self.dashboard.start(shutdown.clone());
        handles.push(self.rotation.start(shutdown));
        handles
    }
}

//! # Cluster Publishing
//!
//! Turns bundles into provider-agnostic secret records and hands them to an
//! injected [`SecretSink`]; namespace-wide strict mTLS goes through a
//! [`PolicySink`]. Nothing here knows about a particular orchestrator's
//! resource format.
//!
//! Publishing never rolls back local issuance. Every call is bounded by the
//! configured timeout so a hung sink cannot stall rotation or monitoring.

pub mod file;
pub mod http;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use tracing::{info, instrument, warn};
use zeroize::Zeroizing;

use crate::config::{AppConfig, SinkKind};
use crate::errors::{MeshCertError, PublishError, Result};
use crate::observability::MetricsRecorder;
use crate::pki::CertificateBundle;

pub use file::DirectorySecretSink;
pub use http::{HttpPolicySink, HttpSecretSink};

pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_KEY_KEY: &str = "tls.key";
pub const CA_CERT_KEY: &str = "ca.crt";

/// Secret name for a service's bundle.
pub fn secret_name(service: &str) -> String {
    format!("{}-mtls-certs", service)
}

/// One service's bundle in sink-neutral form.
#[derive(Clone)]
pub struct SecretRecord {
    pub name: String,
    pub namespace: String,
    pub tls_crt: String,
    pub tls_key: Zeroizing<String>,
    pub ca_crt: String,
}

impl SecretRecord {
    pub fn from_bundle(bundle: &CertificateBundle, namespace: &str) -> Self {
        Self {
            name: secret_name(bundle.service_name()),
            namespace: namespace.to_string(),
            tls_crt: bundle.cert_pem().to_string(),
            tls_key: Zeroizing::new(bundle.key_pem().to_string()),
            ca_crt: bundle.ca_pem().to_string(),
        }
    }

    /// Wire form: PEM values base64-encoded under their conventional keys.
    pub fn payload(&self) -> SecretPayload {
        let mut data = BTreeMap::new();
        data.insert(TLS_CERT_KEY.to_string(), STANDARD.encode(&self.tls_crt));
        data.insert(TLS_KEY_KEY.to_string(), STANDARD.encode(self.tls_key.as_bytes()));
        data.insert(CA_CERT_KEY.to_string(), STANDARD.encode(&self.ca_crt));
        SecretPayload { name: self.name.clone(), namespace: self.namespace.clone(), data }
    }
}

impl fmt::Debug for SecretRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretRecord")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("tls_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Serialize)]
pub struct SecretPayload {
    pub name: String,
    pub namespace: String,
    pub data: BTreeMap<String, String>,
}

impl Drop for SecretPayload {
    fn drop(&mut self) {
        if let Some(key) = self.data.get_mut(TLS_KEY_KEY) {
            zeroize::Zeroize::zeroize(key);
        }
    }
}

#[async_trait]
pub trait SecretSink: Send + Sync + fmt::Debug {
    /// Create or replace the secret.
    async fn put(&self, record: &SecretRecord) -> std::result::Result<(), PublishError>;
}

#[async_trait]
pub trait PolicySink: Send + Sync + fmt::Debug {
    /// Require mutual TLS for every workload in `namespace`.
    async fn apply_strict_mtls(&self, namespace: &str) -> std::result::Result<(), PublishError>;
}

/// Policy sink for deployments without a mesh control plane to talk to.
#[derive(Debug, Default)]
pub struct NoopPolicySink;

#[async_trait]
impl PolicySink for NoopPolicySink {
    async fn apply_strict_mtls(&self, namespace: &str) -> std::result::Result<(), PublishError> {
        info!(namespace = %namespace, "No policy sink configured; strict mTLS not applied");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ClusterPublisher {
    secrets: Arc<dyn SecretSink>,
    policy: Arc<dyn PolicySink>,
    namespace: String,
    timeout: Duration,
    metrics: MetricsRecorder,
}

impl ClusterPublisher {
    pub fn new(
        secrets: Arc<dyn SecretSink>,
        policy: Arc<dyn PolicySink>,
        namespace: impl Into<String>,
        timeout: Duration,
        metrics: MetricsRecorder,
    ) -> Self {
        Self { secrets, policy, namespace: namespace.into(), timeout, metrics }
    }

    /// Build the publisher the configuration asks for; `None` when publishing
    /// is disabled.
    pub fn from_config(config: &AppConfig, metrics: MetricsRecorder) -> Result<Option<Self>> {
        let publish = &config.publish;
        if !publish.enabled {
            return Ok(None);
        }

        let (secrets, policy): (Arc<dyn SecretSink>, Arc<dyn PolicySink>) = match publish.sink {
            SinkKind::None => return Ok(None),
            SinkKind::Directory => {
                let dir = publish.directory.clone().ok_or_else(|| {
                    MeshCertError::config("publish.directory is required for the directory sink")
                })?;
                (Arc::new(DirectorySecretSink::new(dir)), Arc::new(NoopPolicySink))
            }
            SinkKind::Http => {
                let endpoint = publish.endpoint.clone().ok_or_else(|| {
                    MeshCertError::config("publish.endpoint is required for the http sink")
                })?;
                let client = http::build_client(publish.timeout())?;
                (
                    Arc::new(HttpSecretSink::new(client.clone(), &endpoint)),
                    Arc::new(HttpPolicySink::new(client, &endpoint)),
                )
            }
        };

        Ok(Some(Self::new(
            secrets,
            policy,
            config.issuance.namespace.clone(),
            publish.timeout(),
            metrics,
        )))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Publish one bundle as a secret.
    #[instrument(skip(self, bundle), fields(service = %bundle.service_name(), namespace = %self.namespace))]
    pub async fn publish(&self, bundle: &CertificateBundle) -> std::result::Result<(), PublishError> {
        let record = SecretRecord::from_bundle(bundle, &self.namespace);
        let result = self.bounded(self.secrets.put(&record)).await;
        self.metrics.record_publish("secret", result.is_ok());

        match &result {
            Ok(()) => info!(secret = %record.name, "Published certificate secret"),
            Err(e) => warn!(secret = %record.name, error = %e, "Publishing certificate secret failed"),
        }
        result
    }

    /// Apply the strict mTLS policy for the configured namespace.
    pub async fn enforce_strict_mtls(&self) -> std::result::Result<(), PublishError> {
        let result = self.bounded(self.policy.apply_strict_mtls(&self.namespace)).await;
        self.metrics.record_publish("policy", result.is_ok());
        if let Err(e) = &result {
            warn!(namespace = %self.namespace, error = %e, "Applying strict mTLS policy failed");
        }
        result
    }

    async fn bounded<F>(&self, operation: F) -> std::result::Result<(), PublishError>
    where
        F: std::future::Future<Output = std::result::Result<(), PublishError>>,
    {
        match tokio::time::timeout(self.timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::timeout(self.timeout.as_secs().max(1))),
        }
    }
}

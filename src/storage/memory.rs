//! In-memory certificate store for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::CertificateStore;
use crate::errors::{MeshCertError, Result};
use crate::pki::CertificateBundle;
use crate::utils::validate_service_name;

#[derive(Debug, Default)]
struct ServiceHistory {
    current: u128,
    bundles: BTreeMap<u128, Arc<CertificateBundle>>,
}

/// Keeps every saved bundle per service; nothing touches disk.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCertificateStore {
    services: Arc<DashMap<String, ServiceHistory>>,
}

impl InMemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bundles held for `service`, superseded ones included.
    pub fn history_len(&self, service: &str) -> usize {
        self.services.get(service).map(|h| h.bundles.len()).unwrap_or(0)
    }
}

#[async_trait]
impl CertificateStore for InMemoryCertificateStore {
    async fn save(&self, bundle: &CertificateBundle) -> Result<()> {
        validate_service_name(bundle.service_name())?;
        let mut history = self.services.entry(bundle.service_name().to_string()).or_default();
        history.current = bundle.serial_number();
        history.bundles.insert(bundle.serial_number(), Arc::new(bundle.clone()));
        Ok(())
    }

    async fn load(&self, service: &str) -> Result<Arc<CertificateBundle>> {
        self.services
            .get(service)
            .and_then(|h| h.bundles.get(&h.current).cloned())
            .ok_or_else(|| MeshCertError::not_found("bundle", service))
    }

    async fn load_serial(&self, service: &str, serial: u128) -> Result<Arc<CertificateBundle>> {
        self.services
            .get(service)
            .and_then(|h| h.bundles.get(&serial).cloned())
            .ok_or_else(|| MeshCertError::not_found("bundle", format!("{}#{}", service, serial)))
    }

    async fn list_services(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn remove(&self, service: &str) -> Result<()> {
        self.services
            .remove(service)
            .map(|_| ())
            .ok_or_else(|| MeshCertError::not_found("bundle", service))
    }
}

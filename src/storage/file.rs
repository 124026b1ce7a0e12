//! Filesystem-backed certificate store.
//!
//! Layout under the storage root, per service:
//!
//! ```text
//! {service}/cert.pem                 leaf certificate (0644)
//! {service}/key.pem                  leaf private key (0600)
//! {service}/ca.pem                   CA certificate (0644)
//! {service}/current                  serial of the current bundle
//! {service}/history/{serial}/...     every bundle ever saved
//! ```
//!
//! A save writes the history copy first, then swaps the `current` pointer
//! with an atomic rename, then refreshes the top-level files consumers read.
//! Loads follow the pointer, so a crash part-way through a save leaves the
//! previous bundle current rather than a mismatched cert and key.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

use super::cache::BundleCache;
use super::CertificateStore;
use crate::config::StorageConfig;
use crate::errors::{MeshCertError, Result};
use crate::pki::CertificateBundle;
use crate::utils::fs::{write_atomic, FileMode};
use crate::utils::validate_service_name;

pub const CERT_FILE: &str = "cert.pem";
pub const KEY_FILE: &str = "key.pem";
pub const CA_FILE: &str = "ca.pem";
const CURRENT_FILE: &str = "current";
const HISTORY_DIR: &str = "history";

#[derive(Debug, Clone)]
pub struct FileCertificateStore {
    root: PathBuf,
    cache: BundleCache,
}

impl FileCertificateStore {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.root_dir)
            .map_err(|e| MeshCertError::storage_io(&config.root_dir, "create storage root", e))?;
        Ok(Self {
            root: config.root_dir.clone(),
            cache: BundleCache::new(config.cache_ttl(), config.cache_max_entries),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding `service`'s current files.
    pub fn service_dir(&self, service: &str) -> PathBuf {
        self.root.join(service)
    }

    /// Drop the cached entry so the next load reads disk.
    pub async fn evict_cached(&self, service: &str) {
        self.cache.invalidate(service).await;
    }

    fn history_dir(&self, service: &str, serial: u128) -> PathBuf {
        self.service_dir(service).join(HISTORY_DIR).join(serial.to_string())
    }

    async fn read_current_pointer(&self, service: &str) -> Result<Option<u128>> {
        let path = self.service_dir(service).join(CURRENT_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents.trim().parse::<u128>().map(Some).map_err(|e| {
                MeshCertError::serialization_with_source(
                    format!("current pointer for '{}' is corrupt", service),
                    e,
                )
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MeshCertError::storage_io(&path, "read current pointer", e)),
        }
    }

    async fn read_bundle_dir(&self, service: &str, dir: &Path) -> Result<CertificateBundle> {
        let cert_pem = read_file(service, &dir.join(CERT_FILE)).await?;
        let key_pem = Zeroizing::new(read_file(service, &dir.join(KEY_FILE)).await?);
        let ca_pem = read_file(service, &dir.join(CA_FILE)).await?;

        CertificateBundle::from_pem(service, cert_pem, key_pem, ca_pem).map_err(|e| {
            warn!(service = %service, dir = %dir.display(), error = %e, "Stored bundle is malformed");
            MeshCertError::serialization(format!("bundle for '{}' in {}: {}", service, dir.display(), e))
        })
    }
}

async fn read_file(service: &str, path: &Path) -> Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(MeshCertError::not_found("bundle", service))
        }
        Err(e) => Err(MeshCertError::storage_io(path, "read bundle file", e)),
    }
}

fn write_bundle_files(dir: &Path, bundle: &CertificateBundle) -> Result<()> {
    for (name, contents, mode) in [
        (KEY_FILE, bundle.key_pem(), FileMode::Private),
        (CA_FILE, bundle.ca_pem(), FileMode::Public),
        (CERT_FILE, bundle.cert_pem(), FileMode::Public),
    ] {
        let path = dir.join(name);
        write_atomic(&path, contents.as_bytes(), mode)
            .map_err(|e| MeshCertError::storage_io(&path, "write bundle file", e))?;
    }
    Ok(())
}

#[async_trait]
impl CertificateStore for FileCertificateStore {
    #[instrument(skip(self, bundle), fields(service = %bundle.service_name(), serial = %bundle.serial_number()))]
    async fn save(&self, bundle: &CertificateBundle) -> Result<()> {
        validate_service_name(bundle.service_name())?;

        let service_dir = self.service_dir(bundle.service_name());
        let history_dir = self.history_dir(bundle.service_name(), bundle.serial_number());
        let owned = bundle.clone();

        // Loads follow the pointer, so it is written last.
        let written = tokio::task::spawn_blocking(move || -> Result<()> {
            write_bundle_files(&history_dir, &owned)?;
            write_bundle_files(&service_dir, &owned)?;

            let pointer = service_dir.join(CURRENT_FILE);
            write_atomic(&pointer, format!("{}\n", owned.serial_number()).as_bytes(), FileMode::Public)
                .map_err(|e| MeshCertError::storage_io(&pointer, "swap current pointer", e))
        })
        .await
        .map_err(|e| MeshCertError::internal(format!("store write task failed: {}", e)))
        .and_then(|result| result);

        if let Err(e) = written {
            self.cache.invalidate(bundle.service_name()).await;
            return Err(e);
        }
        self.cache.insert(Arc::new(bundle.clone())).await;

        info!(fingerprint = %bundle.fingerprint(), "Saved certificate bundle");
        Ok(())
    }

    async fn load(&self, service: &str) -> Result<Arc<CertificateBundle>> {
        validate_service_name(service)?;
        if let Some(bundle) = self.cache.get(service).await {
            return Ok(bundle);
        }

        let dir = match self.read_current_pointer(service).await? {
            Some(serial) => self.history_dir(service, serial),
            None => self.service_dir(service),
        };
        let bundle = Arc::new(self.read_bundle_dir(service, &dir).await?);
        debug!(service = %service, serial = %bundle.serial_number(), "Loaded bundle from disk");

        self.cache.insert(bundle.clone()).await;
        Ok(bundle)
    }

    async fn load_serial(&self, service: &str, serial: u128) -> Result<Arc<CertificateBundle>> {
        validate_service_name(service)?;
        let dir = self.history_dir(service, serial);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(MeshCertError::not_found("bundle", format!("{}#{}", service, serial)));
        }
        Ok(Arc::new(self.read_bundle_dir(service, &dir).await?))
    }

    async fn list_services(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| MeshCertError::storage_io(&self.root, "list storage root", e))?;

        let mut services = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MeshCertError::storage_io(&self.root, "list storage root", e))?
        {
            let Ok(name) = entry.file_name().into_string() else { continue };
            if validate_service_name(&name).is_err() {
                continue;
            }
            let dir = entry.path();
            let has_bundle = tokio::fs::try_exists(dir.join(CURRENT_FILE)).await.unwrap_or(false)
                || tokio::fs::try_exists(dir.join(CERT_FILE)).await.unwrap_or(false);
            if has_bundle {
                services.push(name);
            }
        }

        services.sort();
        Ok(services)
    }

    async fn remove(&self, service: &str) -> Result<()> {
        validate_service_name(service)?;
        let dir = self.service_dir(service);
        self.cache.invalidate(service).await;

        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(service = %service, "Removed all bundles for service");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(MeshCertError::not_found("bundle", service))
            }
            Err(e) => Err(MeshCertError::storage_io(&dir, "remove service bundles", e)),
        }
    }
}

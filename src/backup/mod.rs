//! # Backup and Restore
//!
//! Encrypted export of the root material and every current bundle into a
//! single `.mcb` file, and the reverse.
//!
//! Restore writes the root into the CA directory before the CA is
//! initialised, then saves each bundle through the store as a new current
//! bundle. Existing root material is only replaced when forced.

pub mod crypto;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::errors::{MeshCertError, Result};
use crate::pki::{CaPublic, CertificateAuthority, CertificateBundle, RootExport};
use crate::storage::CertificateStore;
use crate::utils::fs::{create_private_dir, write_atomic, FileMode};

pub use crypto::{BackupKey, BACKUP_KEY_ENV};

pub const PAYLOAD_VERSION: u32 = 1;
pub const BACKUP_EXTENSION: &str = "mcb";

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct BackupPayload {
    #[zeroize(skip)]
    pub version: u32,
    #[zeroize(skip)]
    pub created_at: DateTime<Utc>,
    pub ca_cert: String,
    pub ca_key: String,
    /// Last allocated serial, as a decimal string
    pub serial: String,
    pub bundles: Vec<BundleRecord>,
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct BundleRecord {
    pub service: String,
    pub cert_pem: String,
    pub key_pem: String,
    pub ca_pem: String,
}

impl std::fmt::Debug for BackupPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupPayload")
            .field("version", &self.version)
            .field("created_at", &self.created_at)
            .field("serial", &self.serial)
            .field("bundles", &self.bundles.len())
            .field("ca_key", &"[REDACTED]")
            .finish()
    }
}

/// What `create_backup` wrote.
#[derive(Debug, Clone, Serialize)]
pub struct BackupManifest {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub ca_fingerprint: String,
    pub serial: String,
    pub services: Vec<String>,
    /// Services whose current bundle could not be read and was left out
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
}

/// What `restore_backup` put back.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub created_at: DateTime<Utc>,
    pub ca_dir: PathBuf,
    pub ca_fingerprint: String,
    pub serial: String,
    pub services: Vec<String>,
}

pub fn backup_file_name(at: DateTime<Utc>) -> String {
    format!("meshcert-backup-{}.{}", at.format("%Y%m%dT%H%M%SZ"), BACKUP_EXTENSION)
}

/// Export the root and every readable current bundle into `output_dir`.
#[instrument(skip_all, fields(output_dir = %output_dir.display()))]
pub async fn create_backup(
    ca: &CertificateAuthority,
    store: &dyn CertificateStore,
    key: &BackupKey,
    output_dir: &Path,
) -> Result<BackupManifest> {
    let root = ca.export_root()?;
    let created_at = ca.clock().now();

    let mut bundles = Vec::new();
    let mut services = Vec::new();
    let mut skipped = Vec::new();
    for service in store.list_services().await? {
        match store.load(&service).await {
            Ok(bundle) => {
                bundles.push(BundleRecord {
                    service: service.clone(),
                    cert_pem: bundle.cert_pem().to_string(),
                    key_pem: bundle.key_pem().to_string(),
                    ca_pem: bundle.ca_pem().to_string(),
                });
                services.push(service);
            }
            Err(e) => {
                warn!(service = %service, error = %e, "Leaving unreadable bundle out of backup");
                skipped.push(service);
            }
        }
    }

    let payload = BackupPayload {
        version: PAYLOAD_VERSION,
        created_at,
        ca_cert: root.cert_pem.clone(),
        ca_key: root.key_pem.to_string(),
        serial: root.last_serial.to_string(),
        bundles,
    };
    let plaintext = Zeroizing::new(
        serde_json::to_vec(&payload)
            .map_err(|e| MeshCertError::serialization_with_source("encode backup payload", e))?,
    );
    let envelope = key.seal(&plaintext)?;

    let path = output_dir.join(backup_file_name(created_at));
    let write_path = path.clone();
    let dir = output_dir.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        create_private_dir(&dir).map_err(|e| MeshCertError::storage_io(&dir, "create backup directory", e))?;
        write_atomic(&write_path, &envelope, FileMode::Private)
            .map_err(|e| MeshCertError::storage_io(&write_path, "write backup", e))
    })
    .await
    .map_err(|e| MeshCertError::internal(format!("backup write task failed: {}", e)))??;

    info!(
        path = %path.display(),
        services = services.len(),
        skipped = skipped.len(),
        serial = %payload.serial,
        "Backup written"
    );
    Ok(BackupManifest {
        path,
        created_at,
        ca_fingerprint: ca.public().fingerprint().to_string(),
        serial: payload.serial.clone(),
        services,
        skipped,
    })
}

/// Decrypt and parse a backup file without applying it.
pub async fn read_backup(path: &Path, key: &BackupKey) -> Result<BackupPayload> {
    let envelope = tokio::fs::read(path)
        .await
        .map_err(|e| MeshCertError::storage_io(path, "read backup", e))?;
    let plaintext = key.open(&envelope)?;
    let payload: BackupPayload = serde_json::from_slice(&plaintext)
        .map_err(|e| MeshCertError::backup(format!("Backup payload is not valid: {}", e)))?;

    if payload.version != PAYLOAD_VERSION {
        return Err(MeshCertError::backup(format!(
            "Unsupported backup payload version {}",
            payload.version
        )));
    }
    Ok(payload)
}

/// Restore root material into `ca_dir` and every bundle into `store`.
///
/// All bundles are parsed and checked against the backed-up root before
/// anything is written.
#[instrument(skip_all, fields(input = %path.display(), ca_dir = %ca_dir.display(), force = force))]
pub async fn restore_backup(
    path: &Path,
    key: &BackupKey,
    ca_dir: &Path,
    store: &dyn CertificateStore,
    force: bool,
) -> Result<RestoreReport> {
    let payload = read_backup(path, key).await?;
    let last_serial: u128 = payload
        .serial
        .parse()
        .map_err(|_| MeshCertError::backup(format!("Invalid serial '{}' in backup", payload.serial)))?;
    let ca_public = CaPublic::from_pem(&payload.ca_cert)?;

    let mut bundles = Vec::with_capacity(payload.bundles.len());
    for record in &payload.bundles {
        let bundle = CertificateBundle::from_pem(
            &record.service,
            record.cert_pem.clone(),
            Zeroizing::new(record.key_pem.clone()),
            record.ca_pem.clone(),
        )?;
        if bundle.ca_pem().trim() != ca_public.cert_pem().trim() {
            return Err(MeshCertError::backup(format!(
                "Bundle for '{}' was issued by a different root",
                record.service
            )));
        }
        bundles.push(bundle);
    }

    let export = RootExport {
        cert_pem: payload.ca_cert.clone(),
        key_pem: Zeroizing::new(payload.ca_key.clone()),
        last_serial,
    };
    let dir = ca_dir.to_path_buf();
    tokio::task::spawn_blocking(move || CertificateAuthority::restore_root(&dir, &export, force))
        .await
        .map_err(|e| MeshCertError::internal(format!("restore task failed: {}", e)))??;

    let mut services = Vec::with_capacity(bundles.len());
    for bundle in &bundles {
        store.save(bundle).await?;
        services.push(bundle.service_name().to_string());
    }

    info!(services = services.len(), serial = %last_serial, "Backup restored");
    Ok(RestoreReport {
        created_at: payload.created_at,
        ca_dir: ca_dir.to_path_buf(),
        ca_fingerprint: ca_public.fingerprint().to_string(),
        serial: payload.serial.clone(),
        services,
    })
}

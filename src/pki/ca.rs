//! # Certificate Authority
//!
//! Sole holder of the root signing key. Creates the root on first start,
//! reloads it on every later start, and signs leaf certificates bound to a
//! service identity.
//!
//! Root material lives in its own directory:
//!
//! - `ca-key.pem`: root private key, PKCS#8, owner-only
//! - `ca.pem`: self-signed root certificate, world-readable
//! - `serial`: last allocated serial number
//!
//! A root is never regenerated over existing material. If the key is present
//! but unreadable, initialisation fails instead, since a new root would
//! orphan every leaf already issued.
//!
//! New root material is staged under `.pending/` and moved into place key
//! first, certificate last. `initialize` finishes an interrupted move and
//! discards an incomplete stage, so a crash never leaves one file without
//! the other.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, SerialNumber,
};
use serde::Serialize;
use tracing::{info, instrument, warn};
use zeroize::Zeroizing;

use super::bundle::{CertificateBundle, SanPolicy, ServiceType};
use super::clock::Clock;
use super::keys::KeyGenerator;
use super::serial::{SerialAllocator, SERIAL_FILE};
use crate::config::AppConfig;
use crate::errors::{MeshCertError, Result};
use crate::utils::certificates::{
    decode_pem, parse_der, serial_to_bytes, sha256_fingerprint, CERTIFICATE_LABEL,
};
use crate::utils::fs::{create_private_dir, write_atomic, FileMode};
use crate::utils::validate_service_name;

pub const CA_KEY_FILE: &str = "ca-key.pem";
pub const CA_CERT_FILE: &str = "ca.pem";
const PENDING_DIR: &str = ".pending";
const CA_ORGANIZATIONAL_UNIT: &str = "Certificate Authority";

/// Everything the CA needs to know to create, load and issue.
#[derive(Debug, Clone)]
pub struct CaOptions {
    pub dir: PathBuf,
    pub common_name: String,
    pub organization: String,
    pub validity_days: u32,
    pub key_bits: usize,
    pub leaf_key_bits: usize,
    pub leaf_validity_days: u32,
    pub san_policy: SanPolicy,
}

impl CaOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            dir: config.ca.dir.clone(),
            common_name: config.ca.common_name.clone(),
            organization: config.ca.organization.clone(),
            validity_days: config.ca.validity_days,
            key_bits: config.ca.key_bits,
            leaf_key_bits: config.ca.leaf_key_bits,
            leaf_validity_days: config.issuance.leaf_validity_days,
            san_policy: SanPolicy {
                namespace: config.issuance.namespace.clone(),
                cluster_domain: config.issuance.cluster_domain.clone(),
                extra_domain: config.issuance.extra_domain.clone(),
            },
        }
    }
}

/// Whether `initialize` created the root or found it on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RootOrigin {
    Created,
    Loaded,
}

/// Public half of the root: safe to hand to validators and publishers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaPublic {
    cert_pem: String,
    cert_der: Vec<u8>,
    fingerprint: String,
    not_after: DateTime<Utc>,
}

impl CaPublic {
    /// Parse a root certificate PEM.
    pub fn from_pem(cert_pem: &str) -> Result<Self> {
        let cert_der = decode_pem(cert_pem, CERTIFICATE_LABEL)?;
        let not_after = {
            let cert = parse_der(&cert_der)?;
            DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
                .ok_or_else(|| MeshCertError::serialization("CA notAfter out of range"))?
        };
        Ok(Self {
            fingerprint: sha256_fingerprint(&cert_der),
            cert_pem: cert_pem.to_string(),
            cert_der,
            not_after,
        })
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn cert_der(&self) -> &[u8] {
        &self.cert_der
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }
}

/// Root material as exported for backup.
pub struct RootExport {
    pub cert_pem: String,
    pub key_pem: Zeroizing<String>,
    pub last_serial: u128,
}

pub struct CertificateAuthority {
    options: CaOptions,
    issuer: rcgen::Certificate,
    signing_key: KeyPair,
    public: CaPublic,
    serials: SerialAllocator,
    key_generator: Arc<dyn KeyGenerator>,
    clock: Arc<dyn Clock>,
    origin: RootOrigin,
    issued: AtomicU64,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("dir", &self.options.dir)
            .field("fingerprint", &self.public.fingerprint)
            .field("origin", &self.origin)
            .field("signing_key", &"[REDACTED]")
            .finish()
    }
}

impl CertificateAuthority {
    /// Create the root if none exists, otherwise load it. Idempotent.
    #[instrument(skip_all, fields(dir = %options.dir.display()))]
    pub fn initialize(
        options: CaOptions,
        key_generator: Arc<dyn KeyGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let key_path = options.dir.join(CA_KEY_FILE);
        let cert_path = options.dir.join(CA_CERT_FILE);
        recover_pending(&options.dir)?;

        match (key_path.exists(), cert_path.exists()) {
            (true, true) => Self::load(options, key_generator, clock),
            (false, false) => Self::create(options, key_generator, clock),
            (true, false) => Err(MeshCertError::ca_init(format!(
                "CA key exists at {} but {} is missing; refusing to regenerate the root",
                key_path.display(),
                cert_path.display()
            ))),
            (false, true) => Err(MeshCertError::ca_init(format!(
                "CA certificate exists at {} but its private key {} is missing",
                cert_path.display(),
                key_path.display()
            ))),
        }
    }

    fn create(
        options: CaOptions,
        key_generator: Arc<dyn KeyGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        create_private_dir(&options.dir).map_err(|e| {
            MeshCertError::ca_init_with_source(
                format!("cannot create CA directory {}", options.dir.display()),
                e,
            )
        })?;
        let serials = SerialAllocator::open(&options.dir.join(SERIAL_FILE))?;

        let key_pem = key_generator
            .generate_rsa(options.key_bits)
            .map_err(|e| MeshCertError::ca_init_with_source("root key generation failed", e))?;
        let signing_key = KeyPair::from_pem(&key_pem)
            .map_err(|e| MeshCertError::ca_init_with_source("generated root key is unusable", e))?;

        let serial = serials.next()?;
        let params = build_ca_params(&options, serial, clock.now())?;
        let issuer = params
            .self_signed(&signing_key)
            .map_err(|e| MeshCertError::ca_init_with_source("self-signing the root failed", e))?;
        let cert_pem = issuer.pem();

        install_root(&options.dir, &cert_pem, &key_pem)
            .map_err(|e| MeshCertError::ca_init_with_source("cannot write root material", e))?;

        let public = CaPublic::from_pem(&cert_pem)?;
        info!(
            fingerprint = %public.fingerprint,
            serial = %serial,
            key_bits = options.key_bits,
            not_after = %public.not_after,
            "Created root certificate authority"
        );

        Ok(Self {
            options,
            issuer,
            signing_key,
            public,
            serials,
            key_generator,
            clock,
            origin: RootOrigin::Created,
            issued: AtomicU64::new(0),
        })
    }

    fn load(
        options: CaOptions,
        key_generator: Arc<dyn KeyGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let key_path = options.dir.join(CA_KEY_FILE);
        let cert_path = options.dir.join(CA_CERT_FILE);

        let key_pem = Zeroizing::new(std::fs::read_to_string(&key_path).map_err(|e| {
            MeshCertError::ca_init_with_source(
                format!("CA private key {} is unreadable", key_path.display()),
                e,
            )
        })?);
        let signing_key = KeyPair::from_pem(&key_pem).map_err(|e| {
            MeshCertError::ca_init_with_source(
                format!("CA private key {} is corrupted", key_path.display()),
                e,
            )
        })?;

        let cert_pem = std::fs::read_to_string(&cert_path).map_err(|e| {
            MeshCertError::ca_init_with_source(
                format!("CA certificate {} is unreadable", cert_path.display()),
                e,
            )
        })?;
        let public = CaPublic::from_pem(&cert_pem)
            .map_err(|e| MeshCertError::ca_init(format!("CA certificate is corrupted: {}", e)))?;
        ensure_key_matches(&signing_key, &public)?;

        // Rebuild the issuer from the stored certificate so leaf issuer names
        // and key identifiers match the root on disk.
        let params = CertificateParams::from_ca_cert_pem(&cert_pem).map_err(|e| {
            MeshCertError::ca_init_with_source("CA certificate cannot be used as issuer", e)
        })?;
        let issuer = params
            .self_signed(&signing_key)
            .map_err(|e| MeshCertError::ca_init_with_source("rebuilding issuer failed", e))?;

        let serials = SerialAllocator::open(&options.dir.join(SERIAL_FILE))
            .map_err(|e| MeshCertError::ca_init(format!("serial counter unusable: {}", e)))?;

        if public.not_after <= clock.now() {
            warn!(not_after = %public.not_after, "Root certificate has expired");
        }
        info!(fingerprint = %public.fingerprint, "Loaded existing root certificate authority");

        Ok(Self {
            options,
            issuer,
            signing_key,
            public,
            serials,
            key_generator,
            clock,
            origin: RootOrigin::Loaded,
            issued: AtomicU64::new(0),
        })
    }

    /// Issue a leaf bundle for `service`.
    ///
    /// SANs are the type defaults (service name first) followed by
    /// `additional_sans`, without duplicates.
    #[instrument(skip(self, additional_sans), fields(service = %service, service_type = %service_type))]
    pub fn issue_certificate(
        &self,
        service: &str,
        service_type: ServiceType,
        additional_sans: &[String],
    ) -> Result<CertificateBundle> {
        validate_service_name(service)
            .map_err(|e| MeshCertError::issuance(service, e.to_string()))?;

        let started = std::time::Instant::now();
        let key_pem = self
            .key_generator
            .generate_rsa(self.options.leaf_key_bits)
            .map_err(|e| MeshCertError::issuance_with_source(service, "key generation failed", e))?;
        let leaf_key = KeyPair::from_pem(&key_pem)
            .map_err(|e| MeshCertError::issuance_with_source(service, "generated key unusable", e))?;

        let mut sans = service_type.default_sans(service, &self.options.san_policy);
        for san in additional_sans {
            if !sans.contains(san) {
                sans.push(san.clone());
            }
        }

        let mut params = CertificateParams::new(sans)
            .map_err(|e| MeshCertError::issuance_with_source(service, "invalid SAN", e))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, service);
        dn.push(DnType::OrganizationName, self.options.organization.as_str());
        dn.push(DnType::OrganizationalUnitName, service_type.as_str());
        params.distinguished_name = dn;
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
        params.extended_key_usages =
            vec![ExtendedKeyUsagePurpose::ServerAuth, ExtendedKeyUsagePurpose::ClientAuth];
        params.use_authority_key_identifier_extension = true;

        let now = self.clock.now();
        let not_after = now + chrono::Duration::days(i64::from(self.options.leaf_validity_days));
        params.not_before = to_offset(now)?;
        params.not_after = to_offset(not_after)?;

        let serial = self.serials.next()?;
        params.serial_number = Some(SerialNumber::from_slice(&serial_to_bytes(serial)));

        let cert = params
            .signed_by(&leaf_key, &self.issuer, &self.signing_key)
            .map_err(|e| MeshCertError::issuance_with_source(service, "signing failed", e))?;

        let bundle =
            CertificateBundle::from_pem(service, cert.pem(), key_pem, self.public.cert_pem.clone())?;
        self.issued.fetch_add(1, Ordering::Relaxed);

        info!(
            serial = %serial,
            fingerprint = %bundle.fingerprint(),
            not_after = %bundle.not_after(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Issued leaf certificate"
        );
        Ok(bundle)
    }

    pub fn public(&self) -> &CaPublic {
        &self.public
    }

    pub fn origin(&self) -> RootOrigin {
        self.origin
    }

    pub fn dir(&self) -> &Path {
        &self.options.dir
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Number of leaves signed by this instance.
    pub fn issued_count(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }

    pub fn last_serial(&self) -> Result<u128> {
        self.serials.current()
    }

    /// Read the root material back from disk for an encrypted backup.
    pub fn export_root(&self) -> Result<RootExport> {
        let key_path = self.options.dir.join(CA_KEY_FILE);
        let key_pem = Zeroizing::new(
            std::fs::read_to_string(&key_path)
                .map_err(|e| MeshCertError::storage_io(&key_path, "read CA key for export", e))?,
        );
        Ok(RootExport {
            cert_pem: self.public.cert_pem.clone(),
            key_pem,
            last_serial: self.serials.current()?,
        })
    }

    /// Write root material into `dir` ahead of `initialize`.
    ///
    /// Existing material is only replaced when `force` is set.
    pub fn restore_root(dir: &Path, export: &RootExport, force: bool) -> Result<()> {
        let key_path = dir.join(CA_KEY_FILE);
        let cert_path = dir.join(CA_CERT_FILE);
        if !force && (key_path.exists() || cert_path.exists()) {
            return Err(MeshCertError::backup(format!(
                "CA material already exists in {}; pass --force to replace it",
                dir.display()
            )));
        }

        let cert = CaPublic::from_pem(&export.cert_pem)?;
        let key = KeyPair::from_pem(&export.key_pem)
            .map_err(|e| MeshCertError::backup(format!("backup CA key is unusable: {}", e)))?;
        ensure_key_matches(&key, &cert)?;

        create_private_dir(dir).map_err(|e| MeshCertError::storage_io(dir, "create CA dir", e))?;
        install_root(dir, &export.cert_pem, &export.key_pem)
            .map_err(|e| MeshCertError::storage_io(dir, "restore root material", e))?;

        let serials = SerialAllocator::open(&dir.join(SERIAL_FILE))?;
        serials.advance_to(export.last_serial)?;

        info!(dir = %dir.display(), fingerprint = %cert.fingerprint, "Restored root material");
        Ok(())
    }
}

/// Stage both root files, then move the key and finally the certificate
/// into `dir`.
fn install_root(dir: &Path, cert_pem: &str, key_pem: &str) -> std::io::Result<()> {
    let pending = dir.join(PENDING_DIR);
    if pending.exists() {
        std::fs::remove_dir_all(&pending)?;
    }
    create_private_dir(&pending)?;
    write_atomic(&pending.join(CA_KEY_FILE), key_pem.as_bytes(), FileMode::Private)?;
    write_atomic(&pending.join(CA_CERT_FILE), cert_pem.as_bytes(), FileMode::Public)?;

    std::fs::rename(pending.join(CA_KEY_FILE), dir.join(CA_KEY_FILE))?;
    std::fs::rename(pending.join(CA_CERT_FILE), dir.join(CA_CERT_FILE))?;
    std::fs::remove_dir_all(&pending)
}

/// Complete or discard a stage left behind by an interrupted `install_root`.
///
/// The certificate is staged last, so a stage holding it is complete and its
/// remaining files are moved into place. Anything else never reached `dir`.
fn recover_pending(dir: &Path) -> Result<()> {
    let pending = dir.join(PENDING_DIR);
    if !pending.is_dir() {
        return Ok(());
    }
    let io_err = |e: std::io::Error| MeshCertError::ca_init_with_source(format!("cannot recover {}", pending.display()), e);

    if pending.join(CA_CERT_FILE).exists() {
        for file in [CA_KEY_FILE, CA_CERT_FILE] {
            let staged = pending.join(file);
            if staged.exists() && !dir.join(file).exists() {
                std::fs::rename(&staged, dir.join(file)).map_err(io_err)?;
            }
        }
        warn!(dir = %dir.display(), "Completed interrupted root installation");
    } else {
        warn!(dir = %dir.display(), "Discarding incomplete root installation");
    }
    std::fs::remove_dir_all(&pending).map_err(io_err)
}

fn build_ca_params(options: &CaOptions, serial: u128, now: DateTime<Utc>) -> Result<CertificateParams> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, options.common_name.as_str());
    dn.push(DnType::OrganizationName, options.organization.as_str());
    dn.push(DnType::OrganizationalUnitName, CA_ORGANIZATIONAL_UNIT);
    params.distinguished_name = dn;

    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.serial_number = Some(SerialNumber::from_slice(&serial_to_bytes(serial)));
    params.not_before = to_offset(now)?;
    params.not_after = to_offset(now + chrono::Duration::days(i64::from(options.validity_days)))?;

    Ok(params)
}

fn ensure_key_matches(key: &KeyPair, public: &CaPublic) -> Result<()> {
    let cert = parse_der(public.cert_der())?;
    if cert.public_key().subject_public_key.data.as_ref() != key.public_key_raw() {
        return Err(MeshCertError::ca_init(
            "CA private key does not belong to the CA certificate",
        ));
    }
    Ok(())
}

fn to_offset(moment: DateTime<Utc>) -> Result<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(moment.timestamp())
        .map_err(|e| MeshCertError::internal(format!("timestamp out of range: {}", e)))
}

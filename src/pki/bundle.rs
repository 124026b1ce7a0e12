//! Certificate bundles and service identity types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::errors::{MeshCertError, Result};
use crate::utils::certificates::{decode_pem, inspect_der, sha256_fingerprint, CERTIFICATE_LABEL};

pub const PRIVATE_KEY_LABEL: &str = "PRIVATE KEY";

/// Kind of workload a certificate identifies. Stored as the subject OU so it
/// survives a reload from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceType {
    #[default]
    InternalService,
    ApiGateway,
    Device,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::InternalService => "internal-service",
            ServiceType::ApiGateway => "api-gateway",
            ServiceType::Device => "device",
        }
    }

    /// Default SANs for `service` of this type, service name first.
    pub fn default_sans(&self, service: &str, policy: &SanPolicy) -> Vec<String> {
        let mut sans = vec![service.to_string()];
        if let Some(domain) = &policy.extra_domain {
            sans.push(format!("{}.{}", service, domain));
        }
        if *self == ServiceType::Device {
            return sans;
        }

        let ns = &policy.namespace;
        sans.push(format!("{}.{}", service, ns));
        sans.push(format!("{}.{}.svc", service, ns));
        sans.push(format!("{}.{}.svc.{}", service, ns, policy.cluster_domain));
        if *self == ServiceType::ApiGateway {
            sans.push(format!("*.{}.{}.svc.{}", service, ns, policy.cluster_domain));
        }
        sans
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = MeshCertError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "internal-service" | "internal" => Ok(ServiceType::InternalService),
            "api-gateway" | "gateway" => Ok(ServiceType::ApiGateway),
            "device" => Ok(ServiceType::Device),
            other => Err(MeshCertError::validation_field(
                format!(
                    "Unknown service type '{}'. Use 'internal-service', 'api-gateway' or 'device'.",
                    other
                ),
                "type",
            )),
        }
    }
}

/// Cluster naming context used to derive default SANs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanPolicy {
    pub namespace: String,
    pub cluster_domain: String,
    pub extra_domain: Option<String>,
}

impl Default for SanPolicy {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            cluster_domain: "cluster.local".to_string(),
            extra_domain: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum KeyAlgorithm {
    Rsa { bits: usize },
    Other,
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAlgorithm::Rsa { bits } => write!(f, "RSA-{}", bits),
            KeyAlgorithm::Other => f.write_str("unknown"),
        }
    }
}

/// Leaf certificate, its private key and the CA anchor for one service.
///
/// Bundles are immutable: rotation produces a new bundle with a new serial.
/// Identity attributes are read from the certificate itself; `service_name`
/// is the identity the bundle is claimed for, which the validator checks
/// against the certificate's CN and SANs.
#[derive(Clone)]
pub struct CertificateBundle {
    service_name: String,
    service_type: ServiceType,
    serial_number: u128,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    key_algorithm: KeyAlgorithm,
    fingerprint: String,
    sans: Vec<String>,
    cert_pem: String,
    cert_der: Vec<u8>,
    key_pem: Zeroizing<String>,
    ca_pem: String,
}

impl CertificateBundle {
    /// Build a bundle from PEM material claimed for `service_name`.
    ///
    /// Fails with `Serialization` when any of the three PEM blocks is
    /// malformed.
    pub fn from_pem(
        service_name: &str,
        cert_pem: String,
        key_pem: Zeroizing<String>,
        ca_pem: String,
    ) -> Result<Self> {
        let cert_der = decode_pem(&cert_pem, CERTIFICATE_LABEL)?;
        decode_pem(&key_pem, PRIVATE_KEY_LABEL)
            .map_err(|e| MeshCertError::serialization(format!("private key: {}", e)))?;
        decode_pem(&ca_pem, CERTIFICATE_LABEL)
            .map_err(|e| MeshCertError::serialization(format!("CA certificate: {}", e)))?;

        let info = inspect_der(&cert_der)?;
        let service_type = info
            .organizational_unit
            .as_deref()
            .and_then(|ou| ou.parse::<ServiceType>().ok())
            .unwrap_or_default();
        let key_algorithm = match info.rsa_key_bits {
            Some(bits) => KeyAlgorithm::Rsa { bits },
            None => KeyAlgorithm::Other,
        };

        Ok(Self {
            service_name: service_name.to_string(),
            service_type,
            serial_number: info.serial,
            not_before: info.not_before,
            not_after: info.not_after,
            key_algorithm,
            fingerprint: sha256_fingerprint(&cert_der),
            sans: info.sans,
            cert_pem,
            cert_der,
            key_pem,
            ca_pem,
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    pub fn serial_number(&self) -> u128 {
        self.serial_number
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn key_algorithm(&self) -> KeyAlgorithm {
        self.key_algorithm
    }

    /// SHA-256 of the leaf DER, lowercase hex.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn sans(&self) -> &[String] {
        &self.sans
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn cert_der(&self) -> &[u8] {
        &self.cert_der
    }

    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    pub fn ca_pem(&self) -> &str {
        &self.ca_pem
    }

    /// Leaf followed by the CA certificate.
    pub fn fullchain_pem(&self) -> String {
        let mut chain = self.cert_pem.clone();
        if !chain.ends_with('\n') {
            chain.push('\n');
        }
        chain.push_str(&self.ca_pem);
        chain
    }

    /// Remaining validity at `now`; negative once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.not_after - now
    }

    /// Whole days of remaining validity, truncated toward zero.
    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        self.remaining(now).num_days()
    }

    /// Key-free view for reports and logs.
    pub fn summary(&self) -> BundleSummary {
        BundleSummary {
            service: self.service_name.clone(),
            service_type: self.service_type,
            serial: self.serial_number.to_string(),
            not_before: self.not_before,
            not_after: self.not_after,
            fingerprint: self.fingerprint.clone(),
            key_algorithm: self.key_algorithm.to_string(),
            sans: self.sans.clone(),
        }
    }
}

impl fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("service_name", &self.service_name)
            .field("service_type", &self.service_type)
            .field("serial_number", &self.serial_number)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("key_algorithm", &self.key_algorithm)
            .field("fingerprint", &self.fingerprint)
            .field("key_pem", &"[REDACTED]")
            .finish()
    }
}

/// Serializable description of a bundle without key material.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BundleSummary {
    pub service: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub fingerprint: String,
    pub key_algorithm: String,
    pub sans: Vec<String>,
}

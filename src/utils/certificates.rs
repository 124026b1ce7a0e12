//! PEM and X.509 inspection helpers shared by the CA, store and validator.

use std::net::{Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use x509_parser::extensions::GeneralName;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

use crate::errors::{MeshCertError, Result};

pub const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// Metadata extracted from a certificate for logging, storage and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub common_name: Option<String>,
    pub organizational_unit: Option<String>,
    pub issuer: String,
    pub serial: u128,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub sans: Vec<String>,
    pub rsa_key_bits: Option<usize>,
    pub is_ca: bool,
}

/// Decode a single PEM block and check its label.
pub fn decode_pem(pem: &str, expected_label: &str) -> Result<Vec<u8>> {
    let (_, block) = parse_x509_pem(pem.as_bytes())
        .map_err(|e| MeshCertError::serialization(format!("invalid PEM: {}", e)))?;

    if block.label != expected_label {
        return Err(MeshCertError::serialization(format!(
            "expected PEM label '{}', found '{}'",
            expected_label, block.label
        )));
    }

    Ok(block.contents)
}

/// Parse a DER certificate, mapping parser failures to `Serialization`.
pub fn parse_der(der: &[u8]) -> Result<X509Certificate<'_>> {
    let (rest, cert) = X509Certificate::from_der(der)
        .map_err(|e| MeshCertError::serialization(format!("invalid X.509 certificate: {}", e)))?;
    if !rest.is_empty() {
        return Err(MeshCertError::serialization("trailing bytes after certificate DER"));
    }
    Ok(cert)
}

/// SHA-256 over the DER encoding, lowercase hex.
pub fn sha256_fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// Extract the metadata this crate cares about from a DER certificate.
pub fn inspect_der(der: &[u8]) -> Result<CertificateInfo> {
    let cert = parse_der(der)?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_string);
    let organizational_unit = cert
        .subject()
        .iter_organizational_unit()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_string);

    let rsa_key_bits = match cert.public_key().parsed() {
        Ok(PublicKey::RSA(rsa)) => Some(rsa.key_size()),
        _ => None,
    };

    Ok(CertificateInfo {
        common_name,
        organizational_unit,
        issuer: cert.issuer().to_string(),
        serial: serial_from_bytes(cert.tbs_certificate.raw_serial())?,
        not_before: asn1_to_chrono(&cert.validity().not_before)?,
        not_after: asn1_to_chrono(&cert.validity().not_after)?,
        sans: subject_alt_names(&cert)?,
        rsa_key_bits,
        is_ca: cert.is_ca(),
    })
}

/// DNS and IP SAN entries in certificate order.
pub fn subject_alt_names(cert: &X509Certificate<'_>) -> Result<Vec<String>> {
    let extension = cert.subject_alternative_name().map_err(|e| {
        MeshCertError::serialization(format!("malformed subjectAltName extension: {}", e))
    })?;

    let mut names = Vec::new();
    if let Some(extension) = extension {
        for name in &extension.value.general_names {
            match name {
                GeneralName::DNSName(dns) => names.push(dns.to_string()),
                GeneralName::IPAddress(bytes) => {
                    if let Ok(octets) = <[u8; 4]>::try_from(*bytes) {
                        names.push(Ipv4Addr::from(octets).to_string());
                    } else if let Ok(octets) = <[u8; 16]>::try_from(*bytes) {
                        names.push(Ipv6Addr::from(octets).to_string());
                    }
                }
                _ => {}
            }
        }
    }
    Ok(names)
}

/// Big-endian serial bytes to an unsigned integer. DER may carry a leading
/// zero to keep the value positive.
pub fn serial_from_bytes(bytes: &[u8]) -> Result<u128> {
    let trimmed: Vec<u8> = bytes.iter().copied().skip_while(|b| *b == 0).collect();
    if trimmed.len() > 16 {
        return Err(MeshCertError::serialization(format!(
            "serial number is {} bytes, larger than 128 bits",
            trimmed.len()
        )));
    }
    Ok(trimmed.iter().fold(0u128, |acc, b| (acc << 8) | u128::from(*b)))
}

/// Minimal big-endian encoding of a serial; never empty.
pub fn serial_to_bytes(serial: u128) -> Vec<u8> {
    let bytes: Vec<u8> = serial.to_be_bytes().into_iter().skip_while(|b| *b == 0).collect();
    if bytes.is_empty() {
        vec![0]
    } else {
        bytes
    }
}

fn asn1_to_chrono(time: &ASN1Time) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(time.timestamp(), 0).ok_or_else(|| {
        MeshCertError::serialization(format!("certificate time {} is out of range", time))
    })
}

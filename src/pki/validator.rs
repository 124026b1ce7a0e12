//! # Certificate Validation
//!
//! Stateless verification of a bundle against the root's public material.
//! A merely invalid certificate is a normal outcome reported through
//! `ValidationResult`; only unparsable input is an error.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use x509_parser::prelude::*;

use super::bundle::CertificateBundle;
use super::ca::CaPublic;
use super::clock::Clock;
use crate::errors::Result;
use crate::utils::certificates::{parse_der, subject_alt_names};

/// Why a bundle is (in)valid. Checks run in declaration order after `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationReason {
    Ok,
    ChainMismatch,
    NotYetValid,
    Expired,
    ExtensionMismatch,
    IdentityMismatch,
}

impl ValidationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationReason::Ok => "OK",
            ValidationReason::ChainMismatch => "CHAIN_MISMATCH",
            ValidationReason::NotYetValid => "NOT_YET_VALID",
            ValidationReason::Expired => "EXPIRED",
            ValidationReason::ExtensionMismatch => "EXTENSION_MISMATCH",
            ValidationReason::IdentityMismatch => "IDENTITY_MISMATCH",
        }
    }

    /// Chain, extension and identity failures mean the certificate cannot be
    /// trusted at all, regardless of its dates.
    pub fn is_trust_failure(&self) -> bool {
        matches!(
            self,
            ValidationReason::ChainMismatch
                | ValidationReason::ExtensionMismatch
                | ValidationReason::IdentityMismatch
        )
    }
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub reason: ValidationReason,
    pub detail: Option<String>,
}

impl ValidationResult {
    fn ok() -> Self {
        Self { valid: true, reason: ValidationReason::Ok, detail: None }
    }

    fn fail<S: Into<String>>(reason: ValidationReason, detail: S) -> Self {
        Self { valid: false, reason, detail: Some(detail.into()) }
    }
}

/// Checks a bundle against the root and the leaf policy.
///
/// Holds only a clock; every call is independent of every other call.
#[derive(Debug, Clone)]
pub struct CertificateValidator {
    clock: Arc<dyn Clock>,
}

impl CertificateValidator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Validate at the clock's current time.
    pub fn validate(&self, bundle: &CertificateBundle, ca: &CaPublic) -> Result<ValidationResult> {
        validate_at(bundle, ca, self.clock.now())
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// Pure validation at an explicit instant.
pub fn validate_at(
    bundle: &CertificateBundle,
    ca: &CaPublic,
    now: DateTime<Utc>,
) -> Result<ValidationResult> {
    let leaf = parse_der(bundle.cert_der())?;
    let root = parse_der(ca.cert_der())?;

    if leaf.issuer().to_string() != root.subject().to_string() {
        return Ok(ValidationResult::fail(
            ValidationReason::ChainMismatch,
            format!("issuer '{}' is not the CA '{}'", leaf.issuer(), root.subject()),
        ));
    }
    if leaf.verify_signature(Some(root.public_key())).is_err() {
        return Ok(ValidationResult::fail(
            ValidationReason::ChainMismatch,
            "signature does not verify against the CA public key",
        ));
    }

    if now < bundle.not_before() {
        return Ok(ValidationResult::fail(
            ValidationReason::NotYetValid,
            format!("valid from {}", bundle.not_before()),
        ));
    }
    if now > bundle.not_after() {
        return Ok(ValidationResult::fail(
            ValidationReason::Expired,
            format!("expired at {}", bundle.not_after()),
        ));
    }

    if let Some(detail) = extension_problem(&leaf) {
        return Ok(ValidationResult::fail(ValidationReason::ExtensionMismatch, detail));
    }

    let service = bundle.service_name();
    let common_name = leaf
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok());
    if common_name != Some(service) {
        return Ok(ValidationResult::fail(
            ValidationReason::IdentityMismatch,
            format!("CN {:?} does not match service '{}'", common_name, service),
        ));
    }
    if !subject_alt_names(&leaf)?.iter().any(|san| san == service) {
        return Ok(ValidationResult::fail(
            ValidationReason::IdentityMismatch,
            format!("no SAN entry for service '{}'", service),
        ));
    }

    Ok(ValidationResult::ok())
}

/// Every leaf must be a non-CA with digitalSignature + keyEncipherment and
/// both serverAuth and clientAuth.
fn extension_problem(leaf: &X509Certificate<'_>) -> Option<String> {
    if leaf.is_ca() {
        return Some("leaf is marked as a CA".to_string());
    }

    match leaf.key_usage() {
        Ok(Some(ku)) if ku.value.digital_signature() && ku.value.key_encipherment() => {}
        Ok(Some(_)) => return Some("keyUsage lacks digitalSignature or keyEncipherment".into()),
        Ok(None) => return Some("keyUsage extension missing".into()),
        Err(e) => return Some(format!("keyUsage extension malformed: {}", e)),
    }

    match leaf.extended_key_usage() {
        Ok(Some(eku)) if eku.value.server_auth && eku.value.client_auth => None,
        Ok(Some(_)) => Some("extendedKeyUsage lacks serverAuth or clientAuth".into()),
        Ok(None) => Some("extendedKeyUsage extension missing".into()),
        Err(e) => Some(format!("extendedKeyUsage extension malformed: {}", e)),
    }
}

//! Utility functions and helpers

pub mod certificates;
pub mod fs;

use regex::Regex;

use crate::errors::{MeshCertError, Result};

/// Service names become the certificate CN, a DNS SAN and a directory name:
/// lowercase DNS label characters and dots, starting and ending alphanumeric.
pub static VALID_SERVICE_NAME_REGEX: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9.-]{0,251}[a-z0-9])?$").expect("service name regex is valid")
});

/// Reject service names that are empty, not DNS-safe or could escape the
/// storage root.
pub fn validate_service_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MeshCertError::validation_field("Service name cannot be empty", "service"));
    }
    if name.contains("..") || !VALID_SERVICE_NAME_REGEX.is_match(name) {
        return Err(MeshCertError::validation_field(
            format!(
                "Service name '{}' must be lowercase alphanumerics, '-' or '.', \
                 starting and ending with an alphanumeric",
                name
            ),
            "service",
        ));
    }
    Ok(())
}

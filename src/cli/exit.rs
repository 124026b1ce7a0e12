//! Process exit codes, one per failure category.

use crate::errors::{ErrorCategory, MeshCertError};

pub const SUCCESS: u8 = 0;
pub const OTHER: u8 = 1;
pub const CONFIG: u8 = 2;
pub const CA: u8 = 3;
pub const STORE: u8 = 4;
pub const PUBLISH: u8 = 5;
pub const ISSUANCE: u8 = 6;
/// `health` found at least one CRITICAL alert
pub const CRITICAL_HEALTH: u8 = 7;
pub const BACKUP: u8 = 8;

pub fn code_for_category(category: ErrorCategory) -> u8 {
    match category {
        ErrorCategory::Config => CONFIG,
        ErrorCategory::Ca => CA,
        ErrorCategory::Store => STORE,
        ErrorCategory::Publish => PUBLISH,
        ErrorCategory::Issuance => ISSUANCE,
        ErrorCategory::Backup => BACKUP,
        ErrorCategory::Other => OTHER,
    }
}

/// Exit code for an error that reached the top of a command. Errors that
/// did not originate in the lifecycle core map to `OTHER`.
pub fn code_for_error(error: &anyhow::Error) -> u8 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<MeshCertError>())
        .map(|e| code_for_category(e.category()))
        .unwrap_or(OTHER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PublishError;
    use anyhow::Context;

    #[test]
    fn test_categories_are_distinct() {
        let cases = [
            (MeshCertError::config("bad"), CONFIG),
            (MeshCertError::ca_init("no root"), CA),
            (MeshCertError::not_found("bundle", "redis"), STORE),
            (MeshCertError::publish("redis", PublishError::timeout(10)), PUBLISH),
            (MeshCertError::issuance("redis", "keygen"), ISSUANCE),
            (MeshCertError::backup("bad key"), BACKUP),
            (MeshCertError::internal("boom"), OTHER),
        ];
        for (error, expected) in cases {
            assert_eq!(code_for_error(&anyhow::Error::new(error)), expected);
        }
    }

    #[test]
    fn test_context_preserves_category() {
        let result: anyhow::Result<()> =
            Err(MeshCertError::ca_init("no root")).context("while bootstrapping");
        assert_eq!(code_for_error(&result.unwrap_err()), CA);
        assert_eq!(code_for_error(&anyhow::anyhow!("plain failure")), OTHER);
    }
}

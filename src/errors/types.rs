//! # Error Types
//!
//! Error taxonomy for the certificate lifecycle subsystem using `thiserror`.
//!
//! Expected certificate conditions (expiry, chain or identity mismatch) are not
//! errors; they are reported through `ValidationResult`. The variants here cover
//! infrastructure failures and malformed input only.

use std::fmt;
use std::path::{Path, PathBuf};

use super::publish::PublishError;

/// Custom result type for certificate lifecycle operations
pub type Result<T> = std::result::Result<T, MeshCertError>;

/// Main error type for the certificate lifecycle subsystem
#[derive(thiserror::Error, Debug)]
pub enum MeshCertError {
    /// Root material could not be created or loaded. Fatal at startup.
    #[error("CA initialization failed: {message}")]
    CaInitialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Leaf issuance failed (key generation, signing, bad identity)
    #[error("Certificate issuance failed for '{service}': {message}")]
    Issuance {
        service: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Disk or permission failure
    #[error("Storage I/O error at {}: {context}", path.display())]
    StorageIo {
        path: PathBuf,
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed PEM, DER or persisted JSON
    #[error("Serialization error: {context}")]
    Serialization {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// No bundle (or archived bundle) exists for the requested identity
    #[error("Resource not found: {resource_type} '{id}'")]
    NotFound { resource_type: String, id: String },

    /// Publishing to the cluster failed
    #[error("Publish failed for '{service}': {source}")]
    Publish {
        service: String,
        #[source]
        source: PublishError,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Rejected caller input
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// Backup export or restore failed
    #[error("Backup error: {message}")]
    Backup { message: String },

    /// Timeout errors
    #[error("Operation timed out: {operation} after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Coarse failure category, used to pick a process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Config,
    Ca,
    Store,
    Publish,
    Issuance,
    Backup,
    Other,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Config => "config",
            ErrorCategory::Ca => "ca",
            ErrorCategory::Store => "store",
            ErrorCategory::Publish => "publish",
            ErrorCategory::Issuance => "issuance",
            ErrorCategory::Backup => "backup",
            ErrorCategory::Other => "other",
        };
        f.write_str(name)
    }
}

impl MeshCertError {
    /// Create a CA initialization error
    pub fn ca_init<S: Into<String>>(message: S) -> Self {
        Self::CaInitialization { message: message.into(), source: None }
    }

    /// Create a CA initialization error with source
    pub fn ca_init_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::CaInitialization { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Create an issuance error
    pub fn issuance<N: Into<String>, S: Into<String>>(service: N, message: S) -> Self {
        Self::Issuance { service: service.into(), message: message.into(), source: None }
    }

    /// Create an issuance error with source
    pub fn issuance_with_source<N, S, E>(service: N, message: S, source: E) -> Self
    where
        N: Into<String>,
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Issuance {
            service: service.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a storage error for the given path
    pub fn storage_io<S: Into<String>>(path: &Path, context: S, source: std::io::Error) -> Self {
        Self::StorageIo { path: path.to_path_buf(), context: context.into(), source }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(context: S) -> Self {
        Self::Serialization { context: context.into(), source: None }
    }

    /// Create a serialization error with source
    pub fn serialization_with_source<S, E>(context: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Serialization { context: context.into(), source: Some(Box::new(source)) }
    }

    /// Create a not found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.into() }
    }

    /// Create a publish error
    pub fn publish<N: Into<String>>(service: N, source: PublishError) -> Self {
        Self::Publish { service: service.into(), source }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create a backup error
    pub fn backup<S: Into<String>>(message: S) -> Self {
        Self::Backup { message: message.into() }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, duration_ms: u64) -> Self {
        Self::Timeout { operation: operation.into(), duration_ms }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Failure category used for exit codes and alert kinds
    pub fn category(&self) -> ErrorCategory {
        match self {
            MeshCertError::CaInitialization { .. } => ErrorCategory::Ca,
            MeshCertError::Issuance { .. } => ErrorCategory::Issuance,
            MeshCertError::StorageIo { .. }
            | MeshCertError::Serialization { .. }
            | MeshCertError::NotFound { .. } => ErrorCategory::Store,
            MeshCertError::Publish { .. } => ErrorCategory::Publish,
            MeshCertError::Config { .. } | MeshCertError::Validation { .. } => {
                ErrorCategory::Config
            }
            MeshCertError::Backup { .. } => ErrorCategory::Backup,
            MeshCertError::Timeout { .. } | MeshCertError::Internal { .. } => ErrorCategory::Other,
        }
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MeshCertError::Issuance { .. }
                | MeshCertError::StorageIo { .. }
                | MeshCertError::Timeout { .. }
        )
    }

    /// True when the error means the requested bundle does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, MeshCertError::NotFound { .. })
    }
}

impl From<config::ConfigError> for MeshCertError {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<validator::ValidationErrors> for MeshCertError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::validation(format!("Validation failed: {}", message))
    }
}

impl From<serde_json::Error> for MeshCertError {
    fn from(error: serde_json::Error) -> Self {
        Self::serialization_with_source("JSON serialization failed", error)
    }
}

//! # Error Handling
//!
//! Error types for certificate issuance, storage, rotation and publishing.

pub mod publish;
pub mod types;

pub use publish::PublishError;
pub use types::{ErrorCategory, MeshCertError, Result};

//! # PKI Core
//!
//! Root CA, leaf issuance, certificate bundles and validation.

pub mod bundle;
pub mod ca;
pub mod clock;
pub mod keys;
pub mod serial;
pub mod validator;

pub use bundle::{BundleSummary, CertificateBundle, KeyAlgorithm, SanPolicy, ServiceType};
pub use ca::{CaOptions, CaPublic, CertificateAuthority, RootExport, RootOrigin};
pub use clock::{Clock, ManualClock, SystemClock};
pub use keys::{KeyGenerationError, KeyGenerator, RsaKeyGenerator};
pub use serial::SerialAllocator;
pub use validator::{validate_at, CertificateValidator, ValidationReason, ValidationResult};

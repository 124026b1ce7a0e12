//! RSA key generation.
//!
//! ring signs with RSA keys but cannot generate them, so generation goes
//! through the pure-Rust `rsa` crate and the result is handed to rcgen as
//! PKCS#8 PEM.

use std::fmt::Debug;

use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

/// ring refuses to sign with anything smaller.
pub const MIN_RSA_BITS: usize = 2048;

#[derive(Debug, Error)]
#[error("RSA key generation failed: {message}")]
pub struct KeyGenerationError {
    pub message: String,
}

impl KeyGenerationError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self { message: message.into() }
    }
}

/// Source of fresh private keys for the CA and for leaves.
pub trait KeyGenerator: Send + Sync + Debug {
    /// Generate an RSA key of `bits` and return it as PKCS#8 PEM.
    fn generate_rsa(&self, bits: usize) -> Result<Zeroizing<String>, KeyGenerationError>;
}

/// Generates keys from the operating system RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RsaKeyGenerator;

impl KeyGenerator for RsaKeyGenerator {
    fn generate_rsa(&self, bits: usize) -> Result<Zeroizing<String>, KeyGenerationError> {
        if bits < MIN_RSA_BITS {
            return Err(KeyGenerationError::new(format!(
                "{} bits requested, minimum is {}",
                bits, MIN_RSA_BITS
            )));
        }

        let started = std::time::Instant::now();
        let mut rng = rand::rngs::OsRng;
        let key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| KeyGenerationError::new(e.to_string()))?;
        let pem = key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyGenerationError::new(format!("PKCS#8 encoding failed: {}", e)))?;

        debug!(bits, elapsed_ms = started.elapsed().as_millis() as u64, "Generated RSA key");
        Ok(pem)
    }
}

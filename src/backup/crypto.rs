//! Backup envelope encryption using AES-256-GCM.
//!
//! Envelope layout:
//!
//! ```text
//! +------+---------+-------------+------------------------+
//! | MCBK | version | nonce (12B) | ciphertext + tag (16B) |
//! +------+---------+-------------+------------------------+
//! ```
//!
//! Magic and version are bound into the tag as associated data, so a
//! tampered header fails authentication like a tampered body does.
//!
//! The key is read from `MESHCERT_BACKUP_KEY`: a base64-encoded 32-byte key,
//! e.g. generated with `openssl rand -base64 32`.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use tracing::{debug, error};
use zeroize::Zeroizing;

use crate::errors::{MeshCertError, Result};

pub const BACKUP_KEY_ENV: &str = "MESHCERT_BACKUP_KEY";
pub const ENVELOPE_MAGIC: &[u8; 4] = b"MCBK";
pub const ENVELOPE_VERSION: u8 = 1;

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const HEADER_SIZE: usize = ENVELOPE_MAGIC.len() + 1;

struct SingleNonce {
    nonce: Option<[u8; NONCE_SIZE]>,
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.nonce.take().map(Nonce::assume_unique_for_key).ok_or(ring::error::Unspecified)
    }
}

#[derive(Clone)]
pub struct BackupKey {
    key_bytes: Arc<Zeroizing<[u8; 32]>>,
    rng: Arc<SystemRandom>,
}

impl BackupKey {
    /// Load the key from `MESHCERT_BACKUP_KEY`.
    pub fn from_env() -> Result<Self> {
        let encoded = Zeroizing::new(std::env::var(BACKUP_KEY_ENV).map_err(|_| {
            MeshCertError::config(format!(
                "{} is not set. Generate a key with: openssl rand -base64 32",
                BACKUP_KEY_ENV
            ))
        })?);
        Self::from_base64(&encoded)
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = Zeroizing::new(STANDARD.decode(encoded.trim()).map_err(|e| {
            MeshCertError::config(format!("Invalid base64 in {}: {}", BACKUP_KEY_ENV, e))
        })?);

        if decoded.len() != 32 {
            return Err(MeshCertError::config(format!(
                "{} must be 32 bytes (256 bits), got {} bytes",
                BACKUP_KEY_ENV,
                decoded.len()
            )));
        }

        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&decoded);
        Ok(Self::from_bytes(key))
    }

    pub fn from_bytes(key: Zeroizing<[u8; 32]>) -> Self {
        Self { key_bytes: Arc::new(key), rng: Arc::new(SystemRandom::new()) }
    }

    fn unbound_key(&self) -> Result<UnboundKey> {
        UnboundKey::new(&AES_256_GCM, &self.key_bytes[..])
            .map_err(|_| MeshCertError::internal("Failed to create backup encryption key"))
    }

    /// Encrypt `plaintext` into a complete envelope.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_SIZE];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| MeshCertError::internal("Failed to generate random nonce for backup"))?;

        let header = header();
        let mut sealing_key = aead::SealingKey::new(self.unbound_key()?, SingleNonce { nonce: Some(nonce) });

        let mut body = plaintext.to_vec();
        body.reserve(TAG_SIZE);
        sealing_key.seal_in_place_append_tag(Aad::from(header), &mut body).map_err(|_| {
            error!("Backup encryption failed");
            MeshCertError::backup("Failed to encrypt backup payload")
        })?;

        let mut envelope = Vec::with_capacity(HEADER_SIZE + NONCE_SIZE + body.len());
        envelope.extend_from_slice(&header);
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&body);
        debug!(envelope_len = envelope.len(), "Sealed backup envelope");
        Ok(envelope)
    }

    /// Authenticate and decrypt an envelope produced by [`BackupKey::seal`].
    pub fn open(&self, envelope: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if envelope.len() < HEADER_SIZE + NONCE_SIZE + TAG_SIZE {
            return Err(MeshCertError::backup("Backup file is truncated"));
        }
        let (head, rest) = envelope.split_at(HEADER_SIZE);
        if &head[..ENVELOPE_MAGIC.len()] != ENVELOPE_MAGIC {
            return Err(MeshCertError::backup("Not a meshcert backup file"));
        }
        let version = head[ENVELOPE_MAGIC.len()];
        if version != ENVELOPE_VERSION {
            return Err(MeshCertError::backup(format!(
                "Unsupported backup format version {} (expected {})",
                version, ENVELOPE_VERSION
            )));
        }

        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_SIZE);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);

        let mut opening_key = aead::OpeningKey::new(self.unbound_key()?, SingleNonce { nonce: Some(nonce) });
        let mut buffer = Zeroizing::new(ciphertext.to_vec());
        let plaintext_len = opening_key
            .open_in_place(Aad::from(header()), &mut buffer)
            .map_err(|_| {
                error!("Backup decryption failed - wrong key or tampered file");
                MeshCertError::backup("Failed to decrypt backup: wrong key or corrupted file")
            })?
            .len();
        buffer.truncate(plaintext_len);
        Ok(buffer)
    }
}

fn header() -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[..ENVELOPE_MAGIC.len()].copy_from_slice(ENVELOPE_MAGIC);
    header[ENVELOPE_MAGIC.len()] = ENVELOPE_VERSION;
    header
}

impl std::fmt::Debug for BackupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupKey").field("key_bytes", &"[REDACTED]").finish()
    }
}

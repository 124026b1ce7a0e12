//! Shared fixtures for unit tests.
//!
//! RSA generation dominates test time, so keys are generated once per size
//! and reused. A single root is shared by every test that just needs "some
//! valid bundle".

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use zeroize::Zeroizing;

use crate::config::AppConfig;
use crate::pki::{
    CaOptions, CertificateAuthority, CertificateBundle, Clock, KeyGenerationError, KeyGenerator,
    RsaKeyGenerator, ServiceType, SystemClock,
};

/// Root keys use this size in tests so they never coincide with leaf keys.
pub const TEST_CA_BITS: usize = 3072;

#[derive(Debug, Default)]
pub struct CachedKeyGenerator;

impl KeyGenerator for CachedKeyGenerator {
    fn generate_rsa(&self, bits: usize) -> Result<Zeroizing<String>, KeyGenerationError> {
        static KEYS: OnceLock<Mutex<HashMap<usize, Zeroizing<String>>>> = OnceLock::new();
        let keys = KEYS.get_or_init(Default::default);

        if let Some(key) = keys.lock().unwrap().get(&bits) {
            return Ok(key.clone());
        }
        let key = RsaKeyGenerator.generate_rsa(bits)?;
        Ok(keys.lock().unwrap().entry(bits).or_insert(key).clone())
    }
}

pub fn test_config(root: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.ca.dir = root.join("ca");
    config.ca.key_bits = TEST_CA_BITS;
    config.storage.root_dir = root.join("certs");
    config
}

pub fn test_ca(root: &Path, clock: Arc<dyn Clock>) -> CertificateAuthority {
    CertificateAuthority::initialize(
        CaOptions::from_config(&test_config(root)),
        Arc::new(CachedKeyGenerator),
        clock,
    )
    .unwrap()
}

/// Process-wide CA living in a leaked temp dir.
pub fn shared_ca() -> &'static CertificateAuthority {
    static CA: OnceLock<CertificateAuthority> = OnceLock::new();
    CA.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap().into_path();
        test_ca(&dir, Arc::new(SystemClock))
    })
}

pub fn issue_test_bundle(service: &str) -> CertificateBundle {
    shared_ca().issue_certificate(service, ServiceType::InternalService, &[]).unwrap()
}

//! Shared fixtures: cached RSA keys, a manual clock and a fully wired set of
//! components over temporary directories.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use meshcert::config::AppConfig;
use meshcert::observability::MetricsRecorder;
use meshcert::pki::{
    CaOptions, CertificateAuthority, Clock, KeyGenerationError, KeyGenerator, ManualClock,
    RsaKeyGenerator,
};
use meshcert::startup::Components;
use meshcert::storage::FileCertificateStore;
use tempfile::TempDir;
use zeroize::Zeroizing;

/// Root key size in tests; differs from the leaf size so a leaf key never
/// doubles as a root key.
pub const CA_BITS: usize = 3072;

/// Generates one key per size and hands out copies.
#[derive(Debug, Default)]
pub struct CachedKeys;

impl KeyGenerator for CachedKeys {
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

pub fn config_for(root: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.ca.dir = root.join("ca");
    config.ca.key_bits = CA_BITS;
    config.storage.root_dir = root.join("certs");
    config
}

pub fn ca_for(config: &AppConfig, clock: Arc<dyn Clock>) -> CertificateAuthority {
    CertificateAuthority::initialize(CaOptions::from_config(config), Arc::new(CachedKeys), clock).unwrap()
}

/// Components over a temp dir, driven by a manual clock.
pub struct Harness {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub config: AppConfig,
    pub components: Components,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_for(dir.path());
        adjust(&mut config);
        let clock = Arc::new(ManualClock::starting_now());
        let components = Self::build(&config, clock.clone()).await;
        Self { dir, clock, config, components }
    }

    /// A second set of components over the same directories, as a process
    /// restart would see them.
    pub async fn restart(&self) -> Components {
        Self::build(&self.config, self.clock.clone()).await
    }

    async fn build(config: &AppConfig, clock: Arc<ManualClock>) -> Components {
        let store = Arc::new(FileCertificateStore::new(&config.storage).unwrap());
        Components::build_with(config.clone(), MetricsRecorder::new(), store, Arc::new(CachedKeys), clock)
            .await
            .unwrap()
    }
}

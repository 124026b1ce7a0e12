//! In-memory TTL cache of current bundles, keyed by service name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;

use crate::pki::CertificateBundle;

#[derive(Debug, Clone)]
struct CacheEntry {
    bundle: Arc<CertificateBundle>,
    inserted_at: Instant,
}

/// Bounded TTL cache for loaded bundles.
///
/// When full, the oldest entry is dropped to make room.
#[derive(Debug, Clone)]
pub struct BundleCache {
    inner: Arc<RwLock<HashMap<String, CacheEntry>>>,
    ttl: Duration,
    max_entries: usize,
}

impl BundleCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self { inner: Arc::new(RwLock::new(HashMap::new())), ttl, max_entries: max_entries.max(1) }
    }

    /// Get a cached bundle if present and not expired
    pub async fn get(&self, service: &str) -> Option<Arc<CertificateBundle>> {
        let cache = self.inner.read().await;
        match cache.get(service) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                debug!(service = %service, "Bundle cache hit");
                Some(entry.bundle.clone())
            }
            Some(_) => {
                debug!(service = %service, "Bundle cache entry expired");
                None
            }
            None => None,
        }
    }

    /// Insert or replace the entry for the bundle's service
    pub async fn insert(&self, bundle: Arc<CertificateBundle>) {
        let mut cache = self.inner.write().await;
        let service = bundle.service_name().to_string();

        if !cache.contains_key(&service) && cache.len() >= self.max_entries {
            if let Some(oldest) =
                cache.iter().min_by_key(|(_, entry)| entry.inserted_at).map(|(k, _)| k.clone())
            {
                debug!(service = %oldest, "Evicting oldest bundle to make room");
                cache.remove(&oldest);
            }
        }

        cache.insert(service, CacheEntry { bundle, inserted_at: Instant::now() });
    }

    /// Drop the entry for `service`
    pub async fn invalidate(&self, service: &str) {
        let mut cache = self.inner.write().await;
        if cache.remove(service).is_some() {
            debug!(service = %service, "Invalidated cached bundle");
        }
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

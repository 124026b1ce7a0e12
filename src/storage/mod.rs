//! # Certificate Storage
//!
//! Durable, cache-backed persistence of certificate bundles keyed by
//! `(service, serial)` with a current-bundle pointer per service.
//!
//! `save` is the only mutation path. Saving a bundle for a service that
//! already has one is a rotation: the previous bundle stays in history and the
//! pointer moves. Nothing is deleted except through `remove`.

pub mod cache;
pub mod file;
pub mod memory;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::errors::Result;
use crate::pki::CertificateBundle;

pub use cache::BundleCache;
pub use file::FileCertificateStore;
pub use memory::InMemoryCertificateStore;

#[async_trait]
pub trait CertificateStore: Send + Sync + Debug {
    /// Persist `bundle` and make it the current bundle for its service.
    /// A subsequent `load` in the same process observes it.
    async fn save(&self, bundle: &CertificateBundle) -> Result<()>;

    /// Current bundle for `service`, or `NotFound`.
    async fn load(&self, service: &str) -> Result<Arc<CertificateBundle>>;

    /// A specific (possibly superseded) bundle.
    async fn load_serial(&self, service: &str, serial: u128) -> Result<Arc<CertificateBundle>>;

    /// Names of every service with a current bundle, sorted.
    async fn list_services(&self) -> Result<Vec<String>>;

    /// Explicit cleanup of every bundle held for `service`.
    async fn remove(&self, service: &str) -> Result<()>;

    /// Lazily enumerate current bundles, one service at a time.
    ///
    /// Each bundle is loaded on demand; a failure for one service is yielded
    /// as an `Err` item and enumeration continues with the next service.
    /// The stream is finite and can be restarted by calling this again.
    fn list_all(&self) -> BoxStream<'_, Result<Arc<CertificateBundle>>> {
        Box::pin(async_stream::stream! {
            match self.list_services().await {
                Ok(services) => {
                    for service in services {
                        yield self.load(&service).await;
                    }
                }
                Err(e) => yield Err(e),
            }
        })
    }
}

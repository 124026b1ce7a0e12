//! Secret sink that writes one JSON document per secret into a directory,
//! for GitOps pipelines or an external agent to pick up.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::{SecretRecord, SecretSink};
use crate::errors::PublishError;
use crate::utils::fs::{create_private_dir, write_atomic, FileMode};

#[derive(Debug, Clone)]
pub struct DirectorySecretSink {
    dir: PathBuf,
}

impl DirectorySecretSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `{dir}/{namespace}/{name}.json`
    pub fn path_for(&self, record: &SecretRecord) -> PathBuf {
        self.dir.join(&record.namespace).join(format!("{}.json", record.name))
    }
}

#[async_trait]
impl SecretSink for DirectorySecretSink {
    async fn put(&self, record: &SecretRecord) -> Result<(), PublishError> {
        let body = zeroize::Zeroizing::new(
            serde_json::to_vec_pretty(&record.payload())
                .map_err(|e| PublishError::encoding(e.to_string()))?,
        );
        let path = self.path_for(record);

        tokio::task::spawn_blocking(move || -> Result<(), PublishError> {
            if let Some(parent) = path.parent() {
                create_private_dir(parent)?;
            }
            write_atomic(&path, &body, FileMode::Private)?;
            debug!(path = %path.display(), "Wrote secret record");
            Ok(())
        })
        .await
        .map_err(|e| PublishError::transport(format!("secret write task failed: {}", e)))?
    }
}

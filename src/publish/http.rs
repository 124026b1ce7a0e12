//! HTTP sinks for a cluster-side agent.
//!
//! - `PUT  {endpoint}/namespaces/{ns}/secrets/{name}` with the secret payload
//! - `POST {endpoint}/namespaces/{ns}/policies/strict-mtls`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::json;
use tracing::debug;

use super::{PolicySink, SecretRecord, SecretSink};
use crate::errors::{MeshCertError, PublishError, Result};

/// Shared client with the publish timeout applied at the transport level.
pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("meshcert/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| MeshCertError::config(format!("Failed to build publish HTTP client: {}", e)))
}

fn base_url(endpoint: &str) -> String {
    endpoint.trim_end_matches('/').to_string()
}

async fn check_status(response: Response) -> std::result::Result<(), PublishError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(PublishError::rejected(status.as_u16(), body))
}

#[derive(Debug, Clone)]
pub struct HttpSecretSink {
    client: Client,
    base_url: String,
}

impl HttpSecretSink {
    pub fn new(client: Client, endpoint: &str) -> Self {
        Self { client, base_url: base_url(endpoint) }
    }
}

#[async_trait]
impl SecretSink for HttpSecretSink {
    async fn put(&self, record: &SecretRecord) -> std::result::Result<(), PublishError> {
        let url = format!(
            "{}/namespaces/{}/secrets/{}",
            self.base_url, record.namespace, record.name
        );
        debug!(url = %url, "Publishing secret over HTTP");

        let response = self.client.put(&url).json(&record.payload()).send().await?;
        check_status(response).await
    }
}

#[derive(Debug, Clone)]
pub struct HttpPolicySink {
    client: Client,
    base_url: String,
}

impl HttpPolicySink {
    pub fn new(client: Client, endpoint: &str) -> Self {
        Self { client, base_url: base_url(endpoint) }
    }
}

#[async_trait]
impl PolicySink for HttpPolicySink {
    async fn apply_strict_mtls(&self, namespace: &str) -> std::result::Result<(), PublishError> {
        let url = format!("{}/namespaces/{}/policies/strict-mtls", self.base_url, namespace);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "namespace": namespace, "mode": "STRICT" }))
            .send()
            .await?;
        check_status(response).await
    }
}

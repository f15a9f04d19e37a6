//! Secret retrieval from a Vault KV v2 document.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

use crate::config::VaultConfig;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault token not configured")]
    MissingToken,

    #[error("vault request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("vault returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Clone)]
pub struct VaultClient {
    client: Client,
    config: VaultConfig,
}

impl VaultClient {
    pub fn new(config: VaultConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_sec))
            .build()?;
        Ok(Self { client, config })
    }

    /// Look up `key` in the secret document. Any failure yields `None`.
    pub async fn get_secret(&self, key: &str) -> Option<String> {
        match self.fetch(key).await {
            Ok(Some(secret)) => Some(secret),
            Ok(None) => {
                warn!(%key, "secret not present in vault document");
                None
            }
            Err(e) => {
                error!(%key, error = %e, "vault lookup failed");
                None
            }
        }
    }

    async fn fetch(&self, key: &str) -> Result<Option<String>, VaultError> {
        let token = self.config.token.as_deref().ok_or(VaultError::MissingToken)?;

        let resp = self
            .client
            .get(&self.config.url)
            .header("Accept", "application/json")
            .header("X-Vault-Token", token)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(VaultError::Status { status, body });
        }

        let doc: Value = resp.json().await?;
        Ok(extract_secret(&doc, key))
    }
}

/// KV v2 documents nest the payload under `data.data`.
fn extract_secret(doc: &Value, key: &str) -> Option<String> {
    doc.get("data")?
        .get("data")?
        .get(key)?
        .as_str()
        .map(str::to_string)
}

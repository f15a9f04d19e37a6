use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{ContainerRuntime, ContainerSummary, CreateRequest, RuntimeError};
use crate::config::RuntimeConfig;
use crate::hosts::Host;

/// HTTP client for the libpod REST API exposed by each container host.
///
/// Ambient proxy settings are ignored: hosts live on the internal network.
#[derive(Clone)]
pub struct PodmanClient {
    client: Client,
    config: RuntimeConfig,
}

#[derive(Deserialize)]
struct CreateResponse {
    #[serde(rename = "Id", default)]
    id: String,
}

impl PodmanClient {
    pub fn new(config: RuntimeConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .no_proxy()
            .user_agent(concat!("podrunner/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    fn containers_url(&self, host: &Host) -> String {
        format!("{}/{}/libpod/containers", host.base_url(), self.config.api_version)
    }
}

fn transport(host: &Host, source: reqwest::Error) -> RuntimeError {
    RuntimeError::Transport {
        host: host.to_string(),
        source,
    }
}

async fn unexpected(host: &Host, operation: &'static str, resp: Response) -> RuntimeError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    RuntimeError::UnexpectedStatus {
        host: host.to_string(),
        operation,
        status,
        body,
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for PodmanClient {
    async fn ping(&self, host: &Host) -> Result<(), RuntimeError> {
        let resp = self
            .client
            .get(format!("{}/_ping", host.base_url()))
            .timeout(Duration::from_secs(self.config.ping_timeout_sec))
            .send()
            .await
            .map_err(|e| transport(host, e))?;

        if !resp.status().is_success() {
            return Err(unexpected(host, "ping", resp).await);
        }
        Ok(())
    }

    async fn list_containers(&self, host: &Host) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let resp = self
            .client
            .get(format!("{}/json", self.containers_url(host)))
            .timeout(Duration::from_secs(self.config.list_timeout_sec))
            .send()
            .await
            .map_err(|e| transport(host, e))?;

        if !resp.status().is_success() {
            return Err(unexpected(host, "list containers", resp).await);
        }

        resp.json::<Vec<ContainerSummary>>()
            .await
            .map_err(|e| RuntimeError::Decode {
                host: host.to_string(),
                operation: "list containers",
                reason: e.to_string(),
            })
    }

    async fn create_container(&self, host: &Host, request: &CreateRequest) -> Result<String, RuntimeError> {
        debug!(%host, name = %request.name, image = %request.image, "creating container");
        let resp = self
            .client
            .post(format!("{}/create", self.containers_url(host)))
            .json(request)
            .timeout(Duration::from_secs(self.config.create_timeout_sec))
            .send()
            .await
            .map_err(|e| transport(host, e))?;

        if resp.status() != StatusCode::CREATED {
            return Err(unexpected(host, "create container", resp).await);
        }

        let created: CreateResponse = resp.json().await.map_err(|e| RuntimeError::Decode {
            host: host.to_string(),
            operation: "create container",
            reason: e.to_string(),
        })?;

        if created.id.is_empty() {
            return Err(RuntimeError::Decode {
                host: host.to_string(),
                operation: "create container",
                reason: "response carried no container id".to_string(),
            });
        }
        Ok(created.id)
    }

    async fn start_container(&self, host: &Host, container_id: &str) -> Result<(), RuntimeError> {
        let resp = self
            .client
            .post(format!("{}/{}/start", self.containers_url(host), container_id))
            .timeout(Duration::from_secs(self.config.start_timeout_sec))
            .send()
            .await
            .map_err(|e| transport(host, e))?;

        if resp.status() != StatusCode::NO_CONTENT {
            return Err(unexpected(host, "start container", resp).await);
        }
        Ok(())
    }

    async fn stop_container(&self, host: &Host, container_id: &str) -> Result<(), RuntimeError> {
        let resp = self
            .client
            .post(format!("{}/{}/stop", self.containers_url(host), container_id))
            .timeout(Duration::from_secs(self.config.stop_timeout_sec))
            .send()
            .await
            .map_err(|e| transport(host, e))?;

        // 304: already stopped.
        if !(resp.status().is_success() || resp.status() == StatusCode::NOT_MODIFIED) {
            return Err(unexpected(host, "stop container", resp).await);
        }
        Ok(())
    }

    async fn remove_container(&self, host: &Host, container_id: &str) -> Result<(), RuntimeError> {
        let resp = self
            .client
            .delete(format!("{}/{}", self.containers_url(host), container_id))
            .query(&[("force", "true")])
            .timeout(Duration::from_secs(self.config.stop_timeout_sec))
            .send()
            .await
            .map_err(|e| transport(host, e))?;

        if !resp.status().is_success() {
            return Err(unexpected(host, "remove container", resp).await);
        }
        Ok(())
    }
}

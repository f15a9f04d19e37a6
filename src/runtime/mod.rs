//! Container-runtime REST control API.
//!
//! [`ContainerRuntime`] is the seam between orchestration logic and the
//! per-host libpod endpoints. [`podman::PodmanClient`] speaks HTTP;
//! [`mock::MockRuntime`] is an in-memory double for tests.

pub mod mock;
pub mod podman;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hosts::Host;

pub use self::podman::PodmanClient;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("request to {host} failed: {source}")]
    Transport {
        host: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} on {host} returned HTTP {status}: {body}")]
    UnexpectedStatus {
        host: String,
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("invalid {operation} response from {host}: {reason}")]
    Decode {
        host: String,
        operation: &'static str,
        reason: String,
    },
}

/// One entry of the list-containers response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Names", default)]
    pub names: Vec<String>,
}

impl ContainerSummary {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            names: vec![name.into()],
        }
    }

    /// First name with any leading `/` removed.
    pub fn primary_name(&self) -> Option<&str> {
        self.names.first().map(|n| n.trim_start_matches('/'))
    }
}

/// Body of a create-container call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    #[serde(rename = "Image")]
    pub image: String,
    /// Argument vector executed directly, never through a shell.
    #[serde(rename = "Cmd")]
    pub command: Vec<String>,
    #[serde(rename = "HostConfig")]
    pub host_config: HostConfig,
    #[serde(rename = "Env", default)]
    pub env: Vec<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(rename = "Binds", default)]
    pub binds: Vec<String>,
    #[serde(rename = "NetworkMode")]
    pub network_mode: String,
}

/// REST operations the dispatcher and teardown sweep need from a host.
#[async_trait::async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Liveness ping.
    async fn ping(&self, host: &Host) -> Result<(), RuntimeError>;

    /// Currently listed containers on `host`.
    async fn list_containers(&self, host: &Host) -> Result<Vec<ContainerSummary>, RuntimeError>;

    /// Create a container and return its id. Succeeds only on HTTP 201.
    async fn create_container(&self, host: &Host, request: &CreateRequest) -> Result<String, RuntimeError>;

    /// Start a created container. Succeeds only on HTTP 204.
    async fn start_container(&self, host: &Host, container_id: &str) -> Result<(), RuntimeError>;

    async fn stop_container(&self, host: &Host, container_id: &str) -> Result<(), RuntimeError>;

    /// Force-remove a container.
    async fn remove_container(&self, host: &Host, container_id: &str) -> Result<(), RuntimeError>;
}

//! Container hosts -- configuration, health probing, and least-loaded selection.

pub mod balancer;
pub mod health;

use serde::{Deserialize, Serialize};

pub use self::balancer::{HostStatus, LoadBalancer};
pub use self::health::HealthProber;

/// A remote machine exposing a container-runtime REST control API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Base URL, e.g. `http://10.10.130.57:61191`.
    pub url: String,
    /// Environment names this host serves during dispatch.
    #[serde(default)]
    pub environments: Vec<String>,
}

impl Host {
    pub fn new(url: impl Into<String>, environments: &[&str]) -> Self {
        Self {
            url: url.into(),
            environments: environments.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    pub fn serves(&self, environment: &str) -> bool {
        self.environments.iter().any(|e| e == environment)
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.base_url())
    }
}

/// The fixed, ordered set of hosts loaded at startup.
#[derive(Debug, Clone, Default)]
pub struct HostSet {
    hosts: Vec<Host>,
}

impl HostSet {
    pub fn new(hosts: Vec<Host>) -> Self {
        Self { hosts }
    }

    /// Every configured host, in configuration order.
    pub fn all(&self) -> &[Host] {
        &self.hosts
    }

    /// Hosts eligible for `environment`, in configuration order.
    ///
    /// An environment no host claims falls back to the full list.
    pub fn for_environment(&self, environment: &str) -> Vec<&Host> {
        let scoped: Vec<&Host> = self.hosts.iter().filter(|h| h.serves(environment)).collect();
        if scoped.is_empty() {
            self.hosts.iter().collect()
        } else {
            scoped
        }
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

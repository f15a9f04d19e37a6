//! Least-loaded host selection.
//!
//! For a given environment, probes every eligible host, counts its
//! containers, and returns the healthy host with the fewest. Nothing is
//! cached: each call reflects the hosts' state at that moment.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::{HealthProber, Host, HostSet};
use crate::runtime::ContainerRuntime;

/// Health and load of a single host, as reported to operators.
#[derive(Debug, Clone, Serialize)]
pub struct HostStatus {
    pub url: String,
    pub environments: Vec<String>,
    pub healthy: bool,
    /// `None` when the host is unhealthy or the count query failed.
    pub containers: Option<usize>,
}

#[derive(Clone)]
pub struct LoadBalancer {
    hosts: HostSet,
    runtime: Arc<dyn ContainerRuntime>,
    prober: HealthProber,
}

impl LoadBalancer {
    pub fn new(hosts: HostSet, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let prober = HealthProber::new(runtime.clone());
        Self { hosts, runtime, prober }
    }

    pub fn hosts(&self) -> &HostSet {
        &self.hosts
    }

    /// Current container count, or `None` if the host is unhealthy or the
    /// list call failed. `None` is never selectable.
    async fn load_of(&self, host: &Host) -> Option<usize> {
        if !self.prober.probe(host).await {
            warn!(%host, "skipping unhealthy host");
            return None;
        }
        match self.runtime.list_containers(host).await {
            Ok(containers) => {
                debug!(%host, containers = containers.len(), "host load");
                Some(containers.len())
            }
            Err(e) => {
                error!(%host, error = %e, "failed to fetch container count");
                None
            }
        }
    }

    /// Pick the least-loaded healthy host serving `environment`.
    ///
    /// Ties go to the host listed first in configuration.
    pub async fn select_host(&self, environment: &str) -> Option<Host> {
        let candidates = self.hosts.for_environment(environment);
        let loads = join_all(candidates.iter().map(|h| self.load_of(h))).await;

        let mut best: Option<(&Host, usize)> = None;
        for (host, load) in candidates.iter().zip(loads) {
            let Some(count) = load else { continue };
            if best.map_or(true, |(_, min)| count < min) {
                best = Some((*host, count));
            }
        }

        match best {
            Some((host, count)) => {
                info!(%environment, %host, containers = count, "selected least loaded host");
                Some(host.clone())
            }
            None => {
                error!(%environment, "no healthy container hosts found");
                None
            }
        }
    }

    /// Health and load of every configured host, in configuration order.
    pub async fn host_report(&self) -> Vec<HostStatus> {
        let hosts = self.hosts.all();
        let reports = join_all(hosts.iter().map(|host| async move {
            let healthy = self.prober.probe(host).await;
            let containers = if healthy {
                self.runtime.list_containers(host).await.ok().map(|c| c.len())
            } else {
                None
            };
            HostStatus {
                url: host.to_string(),
                environments: host.environments.clone(),
                healthy,
                containers,
            }
        }));
        reports.await
    }
}

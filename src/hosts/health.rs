use std::sync::Arc;

use tracing::debug;

use super::Host;
use crate::runtime::ContainerRuntime;

/// Liveness check for a container host.
///
/// A failed probe is information, not a fault: every error collapses to `false`.
#[derive(Clone)]
pub struct HealthProber {
    runtime: Arc<dyn ContainerRuntime>,
}

impl HealthProber {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    pub async fn probe(&self, host: &Host) -> bool {
        match self.runtime.ping(host).await {
            Ok(()) => true,
            Err(e) => {
                debug!(%host, error = %e, "host health probe failed");
                false
            }
        }
    }
}

//! Execution teardown.
//!
//! Stopping an execution sweeps every configured host for containers whose
//! name begins with the execution id, stops each one, and then records the
//! execution as `Stopped`. Per-host and per-container failures are logged
//! and skipped; the sweep itself never fails.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::activity::{actions, ActivityLog};
use crate::execution::ExecutionStatus;
use crate::hosts::{Host, HostSet};
use crate::runtime::ContainerRuntime;
use crate::storage::{ExecutionStore, StoreError, StoreResult};

/// Result of a user stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    /// The execution had already completed; nothing was touched.
    AlreadyCompleted,
}

/// Container names carry the execution id as a prefix, possibly followed by
/// a per-worker suffix.
pub fn matches_execution(container_name: &str, execution_id: &str) -> bool {
    !execution_id.is_empty() && container_name.trim_start_matches('/').starts_with(execution_id)
}

#[derive(Clone)]
pub struct TeardownCoordinator {
    hosts: HostSet,
    runtime: Arc<dyn ContainerRuntime>,
    store: ExecutionStore,
    activity: Arc<dyn ActivityLog>,
}

impl TeardownCoordinator {
    pub fn new(
        hosts: HostSet,
        runtime: Arc<dyn ContainerRuntime>,
        store: ExecutionStore,
        activity: Arc<dyn ActivityLog>,
    ) -> Self {
        Self {
            hosts,
            runtime,
            store,
            activity,
        }
    }

    /// Stop an execution on behalf of `user`, unless it already completed.
    ///
    /// Fails only when the execution does not exist or cannot be read.
    pub async fn request_stop(&self, execution_id: &str, user: &str) -> StoreResult<StopOutcome> {
        let record = self
            .store
            .get(execution_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(execution_id.to_string()))?;

        if record.status == ExecutionStatus::Completed {
            info!(%execution_id, "execution already completed, nothing to stop");
            return Ok(StopOutcome::AlreadyCompleted);
        }

        self.stop(execution_id, user).await;
        self.activity
            .record(user, actions::EXECUTION_STOPPED, &format!("Execution: {execution_id}"))
            .await;
        Ok(StopOutcome::Stopped)
    }

    /// Stop every container of the execution on every host, then mark it
    /// `Stopped`. The status is written even when no container was found or
    /// some hosts could not be reached.
    pub async fn stop(&self, execution_id: &str, user: &str) {
        if execution_id.trim().is_empty() {
            warn!("refusing to tear down an empty execution id");
            return;
        }

        let stopped: usize = join_all(self.hosts.all().iter().map(|h| self.sweep_host(h, execution_id)))
            .await
            .into_iter()
            .sum();

        match self.store.mark_stopped(execution_id, user).await {
            Ok(0) => warn!(%execution_id, "execution row not found while recording stop"),
            Ok(_) => {}
            Err(e) => error!(%execution_id, error = %e, "failed to record execution stop"),
        }

        info!(%execution_id, %user, containers = stopped, "execution stopped");
    }

    /// Stop matching containers on one host; returns how many were stopped.
    async fn sweep_host(&self, host: &Host, execution_id: &str) -> usize {
        let containers = match self.runtime.list_containers(host).await {
            Ok(containers) => containers,
            Err(e) => {
                error!(%host, %execution_id, error = %e, "failed to list containers for teardown");
                return 0;
            }
        };

        let mut stopped = 0;
        for container in containers {
            let Some(name) = container.primary_name() else { continue };
            if !matches_execution(name, execution_id) {
                continue;
            }
            match self.runtime.stop_container(host, &container.id).await {
                Ok(()) => {
                    info!(%host, container = %name, container_id = %container.id, "container stopped");
                    stopped += 1;
                }
                Err(e) => error!(%host, container = %name, error = %e, "failed to stop container"),
            }
        }
        stopped
    }
}

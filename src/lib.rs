//! podrunner -- test-execution dispatch for container hosts.
//!
//! This crate polls a store of submitted test executions, places each one on
//! the least-loaded healthy container host serving its environment, starts a
//! runner container there, and tears executions down on request.

pub mod activity;
pub mod api;
pub mod config;
pub mod dispatch;
pub mod execution;
pub mod hosts;
pub mod runtime;
pub mod storage;
pub mod teardown;
pub mod vault;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::activity::SqliteActivityLog;
use crate::api::state::AppState;
use crate::config::PodrunnerConfig;
use crate::dispatch::{ContainerDispatcher, Orchestrator};
use crate::hosts::{HostSet, LoadBalancer};
use crate::runtime::{ContainerRuntime, PodmanClient};
use crate::storage::{ExecutionStore, Pool};
use crate::teardown::TeardownCoordinator;

/// Wire the dispatch pipeline together over an open pool and a runtime.
pub fn build_state(config: &PodrunnerConfig, pool: Pool, runtime: Arc<dyn ContainerRuntime>) -> AppState {
    let hosts = HostSet::new(config.hosts.clone());
    let store = ExecutionStore::new(pool.clone());
    let activity = Arc::new(SqliteActivityLog::new(pool));

    let balancer = LoadBalancer::new(hosts.clone(), runtime.clone());
    let dispatcher = ContainerDispatcher::new(runtime.clone(), config.runner.clone())
        .with_cleanup_on_start_failure(config.dispatch.cleanup_on_start_failure);
    let orchestrator = Orchestrator::new(
        store.clone(),
        balancer.clone(),
        dispatcher,
        config.dispatch.workers,
    );
    let teardown = TeardownCoordinator::new(hosts, runtime, store.clone(), activity.clone());

    AppState {
        store,
        orchestrator,
        teardown,
        balancer,
        activity,
    }
}

/// Open storage and build the pipeline against the configured Podman hosts.
pub fn open(config: &PodrunnerConfig) -> Result<AppState> {
    let db_path = config.database.path.to_string_lossy();
    tracing::info!(%db_path, "Initializing database");
    let pool = storage::open_pool(&db_path)?;

    let runtime = Arc::new(PodmanClient::new(config.runtime.clone())?);
    Ok(build_state(config, pool, runtime))
}

/// Start the podrunner daemon: API server and background dispatch loop.
pub async fn serve(config: PodrunnerConfig) -> Result<()> {
    config.validate()?;
    let state = open(&config)?;

    let interval = Duration::from_secs(config.dispatch.poll_interval_sec.max(1));
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        dispatch::run_dispatch_loop(orchestrator, interval).await;
    });

    let addr: std::net::SocketAddr = config.api.bind.parse()?;
    let app = api::router(state);

    tracing::info!(%addr, hosts = config.hosts.len(), "podrunner listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

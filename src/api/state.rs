use std::sync::Arc;

use crate::activity::ActivityLog;
use crate::dispatch::Orchestrator;
use crate::hosts::LoadBalancer;
use crate::storage::ExecutionStore;
use crate::teardown::TeardownCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub store: ExecutionStore,
    pub orchestrator: Orchestrator,
    pub teardown: TeardownCoordinator,
    pub balancer: LoadBalancer,
    pub activity: Arc<dyn ActivityLog>,
}

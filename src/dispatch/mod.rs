//! Execution dispatch: poll for submitted executions, place each on the
//! least-loaded host, start its container, and record the outcome.

pub mod container;
pub mod engine;
pub mod orchestrator;

use thiserror::Error;

use crate::runtime::RuntimeError;

pub use self::container::{ContainerDispatcher, DispatchRequest};
pub use self::engine::run_dispatch_loop;
pub use self::orchestrator::{Orchestrator, RunSummary};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no healthy host available for environment '{0}'")]
    NoHostFound(String),

    #[error("execution has no runnable tests")]
    EmptyTestList,

    #[error("failed to create container: {0}")]
    Create(#[source] RuntimeError),

    #[error("container {container_id} created but failed to start: {source}")]
    Start {
        container_id: String,
        #[source]
        source: RuntimeError,
    },
}

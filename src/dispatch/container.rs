//! Create-and-start of one execution container on a chosen host.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::DispatchError;
use crate::config::RunnerConfig;
use crate::execution::{join_test_list, ExecutionRecord};
use crate::hosts::Host;
use crate::runtime::{ContainerRuntime, CreateRequest, HostConfig};

/// Parameters of one dispatch, borrowed from the execution being launched.
#[derive(Debug, Clone, Copy)]
pub struct DispatchRequest<'a> {
    pub execution_id: &'a str,
    pub environment: &'a str,
    /// Already-normalized test names.
    pub tests: &'a [String],
    pub user: &'a str,
    pub browser: &'a str,
    pub screen_capture: &'a str,
    pub frequency: &'a str,
}

impl<'a> DispatchRequest<'a> {
    pub fn new(record: &'a ExecutionRecord, tests: &'a [String]) -> Self {
        Self {
            execution_id: &record.id,
            environment: &record.environment,
            tests,
            user: &record.requested_by,
            browser: &record.browser,
            screen_capture: &record.screen_capture,
            frequency: &record.frequency,
        }
    }
}

#[derive(Clone)]
pub struct ContainerDispatcher {
    runtime: Arc<dyn ContainerRuntime>,
    runner: RunnerConfig,
    cleanup_on_start_failure: bool,
}

impl ContainerDispatcher {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, runner: RunnerConfig) -> Self {
        Self {
            runtime,
            runner,
            cleanup_on_start_failure: false,
        }
    }

    /// Force-remove containers that were created but never started.
    pub fn with_cleanup_on_start_failure(mut self, enabled: bool) -> Self {
        self.cleanup_on_start_failure = enabled;
        self
    }

    /// Chrome runs on the Chrome image; every other browser on the default one.
    pub fn select_image(&self, browser: &str) -> &str {
        if browser.eq_ignore_ascii_case("chrome") {
            &self.runner.chrome_image
        } else {
            &self.runner.default_image
        }
    }

    /// Runner argument vector. Passed to the container as-is, no shell.
    pub fn command(&self, req: &DispatchRequest<'_>) -> Vec<String> {
        vec![
            self.runner.interpreter.clone(),
            self.runner.resolved_entrypoint(),
            req.environment.to_string(),
            join_test_list(req.tests),
            req.user.to_string(),
            req.execution_id.to_string(),
            req.browser.to_string(),
            req.screen_capture.to_string(),
            req.frequency.to_string(),
        ]
    }

    pub fn build_request(&self, req: &DispatchRequest<'_>) -> CreateRequest {
        CreateRequest {
            image: self.select_image(req.browser).to_string(),
            command: self.command(req),
            host_config: HostConfig {
                binds: self.runner.bind_mounts.clone(),
                network_mode: self.runner.network_mode.clone(),
            },
            env: self.runner.container_env(),
            name: req.execution_id.to_string(),
        }
    }

    /// Create and start the container; returns its id.
    ///
    /// Both calls must succeed. A container that was created but failed to
    /// start is left in place unless cleanup is enabled.
    pub async fn start(&self, host: &Host, req: &DispatchRequest<'_>) -> Result<String, DispatchError> {
        let request = self.build_request(req);

        let container_id = self
            .runtime
            .create_container(host, &request)
            .await
            .map_err(DispatchError::Create)?;

        if let Err(source) = self.runtime.start_container(host, &container_id).await {
            error!(
                execution_id = %req.execution_id,
                %host,
                %container_id,
                error = %source,
                "container created but failed to start"
            );
            if self.cleanup_on_start_failure {
                match self.runtime.remove_container(host, &container_id).await {
                    Ok(()) => info!(%host, %container_id, "removed unstarted container"),
                    Err(e) => warn!(%host, %container_id, error = %e, "failed to remove unstarted container"),
                }
            }
            return Err(DispatchError::Start { container_id, source });
        }

        info!(execution_id = %req.execution_id, %host, %container_id, image = %request.image, "container started");
        Ok(container_id)
    }
}

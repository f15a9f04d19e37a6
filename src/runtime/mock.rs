//! In-memory container runtime for testing.
//!
//! Tracks per-host health and container lists, records every call, and can be
//! scripted to fail (or panic) on specific operations, making it easy to write
//! deterministic tests for the balancer, dispatcher, and teardown sweep.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use super::{ContainerRuntime, ContainerSummary, CreateRequest, RuntimeError};
use crate::hosts::Host;

/// A call observed by the mock, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Ping { host: String },
    List { host: String },
    Create { host: String, request: CreateRequest },
    Start { host: String, container_id: String },
    Stop { host: String, container_id: String },
    Remove { host: String, container_id: String },
}

#[derive(Debug, Default)]
struct MockHost {
    unhealthy: bool,
    list_fails: bool,
    create_fails: bool,
    start_fails: bool,
    stop_fails: bool,
    start_delay: Option<Duration>,
    containers: Vec<ContainerSummary>,
}

#[derive(Debug, Default)]
struct MockState {
    hosts: HashMap<String, MockHost>,
    calls: Vec<MockCall>,
    fail_create_names: HashSet<String>,
    panic_create_names: HashSet<String>,
    next_id: u64,
}

/// Test double implementing [`ContainerRuntime`].
///
/// Hosts that were never configured behave as healthy and empty.
#[derive(Debug, Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_host<R>(&self, url: &str, f: impl FnOnce(&mut MockHost) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let host = state.hosts.entry(url.trim_end_matches('/').to_string()).or_default();
        f(host)
    }

    pub fn set_unhealthy(&self, url: &str) {
        self.with_host(url, |h| h.unhealthy = true);
    }

    pub fn set_list_fails(&self, url: &str) {
        self.with_host(url, |h| h.list_fails = true);
    }

    pub fn set_create_fails(&self, url: &str) {
        self.with_host(url, |h| h.create_fails = true);
    }

    pub fn set_start_fails(&self, url: &str) {
        self.with_host(url, |h| h.start_fails = true);
    }

    /// Make every start call on a host take `delay` before answering.
    pub fn set_start_delay(&self, url: &str, delay: Duration) {
        self.with_host(url, |h| h.start_delay = Some(delay));
    }

    pub fn set_stop_fails(&self, url: &str) {
        self.with_host(url, |h| h.stop_fails = true);
    }

    /// Pre-populate `count` anonymous containers on a host.
    pub fn set_load(&self, url: &str, count: usize) {
        self.with_host(url, |h| {
            h.containers = (0..count)
                .map(|i| ContainerSummary::new(format!("load-{i}"), format!("/load-{i}")))
                .collect();
        });
    }

    pub fn add_container(&self, url: &str, id: &str, name: &str) {
        self.with_host(url, |h| h.containers.push(ContainerSummary::new(id, name)));
    }

    /// Fail every create call for a container with this name.
    pub fn fail_create_for(&self, name: &str) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.fail_create_names.insert(name.to_string());
    }

    /// Panic inside every create call for a container with this name.
    pub fn panic_create_for(&self, name: &str) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.panic_create_names.insert(name.to_string());
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).calls.clone()
    }

    pub fn containers(&self, url: &str) -> Vec<ContainerSummary> {
        self.with_host(url, |h| h.containers.clone())
    }

    /// Container ids stopped on `url`.
    pub fn stopped(&self, url: &str) -> Vec<String> {
        let url = url.trim_end_matches('/');
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::Stop { host, container_id } if host == url => Some(container_id),
                _ => None,
            })
            .collect()
    }

    /// Create requests observed, with the host each was sent to.
    pub fn created(&self) -> Vec<(String, CreateRequest)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::Create { host, request } => Some((host, request)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: MockCall) {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).calls.push(call);
    }
}

fn failure(host: &Host, operation: &'static str) -> RuntimeError {
    RuntimeError::UnexpectedStatus {
        host: host.to_string(),
        operation,
        status: 500,
        body: "scripted failure".to_string(),
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for MockRuntime {
    async fn ping(&self, host: &Host) -> Result<(), RuntimeError> {
        self.record(MockCall::Ping { host: host.to_string() });
        if self.with_host(&host.url, |h| h.unhealthy) {
            return Err(failure(host, "ping"));
        }
        Ok(())
    }

    async fn list_containers(&self, host: &Host) -> Result<Vec<ContainerSummary>, RuntimeError> {
        self.record(MockCall::List { host: host.to_string() });
        self.with_host(&host.url, |h| {
            if h.list_fails || h.unhealthy {
                Err(failure(host, "list containers"))
            } else {
                Ok(h.containers.clone())
            }
        })
    }

    async fn create_container(&self, host: &Host, request: &CreateRequest) -> Result<String, RuntimeError> {
        self.record(MockCall::Create {
            host: host.to_string(),
            request: request.clone(),
        });

        let (should_panic, should_fail, id) = {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            state.next_id += 1;
            (
                state.panic_create_names.contains(&request.name),
                state.fail_create_names.contains(&request.name),
                format!("ctr-{}", state.next_id),
            )
        };
        // Lock is released before panicking so the mutex is not poisoned.
        if should_panic {
            panic!("scripted panic creating {}", request.name);
        }
        if should_fail {
            return Err(failure(host, "create container"));
        }

        self.with_host(&host.url, |h| {
            if h.create_fails || h.unhealthy {
                return Err(failure(host, "create container"));
            }
            h.containers.push(ContainerSummary::new(id.clone(), format!("/{}", request.name)));
            Ok(id)
        })
    }

    async fn start_container(&self, host: &Host, container_id: &str) -> Result<(), RuntimeError> {
        self.record(MockCall::Start {
            host: host.to_string(),
            container_id: container_id.to_string(),
        });
        if let Some(delay) = self.with_host(&host.url, |h| h.start_delay) {
            tokio::time::sleep(delay).await;
        }
        if self.with_host(&host.url, |h| h.start_fails || h.unhealthy) {
            return Err(failure(host, "start container"));
        }
        Ok(())
    }

    async fn stop_container(&self, host: &Host, container_id: &str) -> Result<(), RuntimeError> {
        self.record(MockCall::Stop {
            host: host.to_string(),
            container_id: container_id.to_string(),
        });
        self.with_host(&host.url, |h| {
            if h.stop_fails || h.unhealthy {
                return Err(failure(host, "stop container"));
            }
            h.containers.retain(|c| c.id != container_id);
            Ok(())
        })
    }

    async fn remove_container(&self, host: &Host, container_id: &str) -> Result<(), RuntimeError> {
        self.record(MockCall::Remove {
            host: host.to_string(),
            container_id: container_id.to_string(),
        });
        self.with_host(&host.url, |h| h.containers.retain(|c| c.id != container_id));
        Ok(())
    }
}

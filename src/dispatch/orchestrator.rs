//! One dispatch run: fetch eligible executions and process them on a
//! bounded worker pool.
//!
//! Each row is handled in isolation. A row whose dispatch errors or panics
//! is marked `Failed`; it never aborts the run or affects other rows.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::{ContainerDispatcher, DispatchError, DispatchRequest};
use crate::execution::{join_test_list, normalize_test_list, ExecutionRecord, ExecutionStatus};
use crate::hosts::LoadBalancer;
use crate::storage::ExecutionStore;

/// What a dispatch run picked up.
///
/// Per-row outcomes are persisted in the status column and logged; they are
/// not reported here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Eligible rows fetched and handed to workers.
    pub fetched: usize,
    /// The run was skipped because another run was still in progress.
    pub skipped: bool,
}

struct Worker {
    store: ExecutionStore,
    balancer: LoadBalancer,
    dispatcher: ContainerDispatcher,
}

#[derive(Clone)]
pub struct Orchestrator {
    worker: Arc<Worker>,
    workers: usize,
    run_lock: Arc<Mutex<()>>,
}

impl Orchestrator {
    pub fn new(
        store: ExecutionStore,
        balancer: LoadBalancer,
        dispatcher: ContainerDispatcher,
        workers: usize,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                store,
                balancer,
                dispatcher,
            }),
            workers: workers.max(1),
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn run_once(&self) -> RunSummary {
        self.run_at(Utc::now()).await
    }

    /// Dispatch every execution eligible at `now`.
    ///
    /// Returns once every fetched row has been processed. Runs are
    /// single-flight within a process: if one is already in progress this
    /// call returns immediately with `skipped` set.
    ///
    /// The run itself executes on a detached task. Dropping the returned
    /// future stops waiting for it but does not cancel in-flight workers, so
    /// every fetched row still reaches a final status.
    pub async fn run_at(&self, now: DateTime<Utc>) -> RunSummary {
        let Ok(running) = self.run_lock.clone().try_lock_owned() else {
            info!("dispatch run already in progress, skipping");
            return RunSummary {
                fetched: 0,
                skipped: true,
            };
        };

        let worker = self.worker.clone();
        let workers = self.workers;
        let run = tokio::spawn(async move {
            let summary = run_detached(worker, workers, now).await;
            drop(running);
            summary
        });

        match run.await {
            Ok(summary) => summary,
            Err(e) => {
                error!(error = %e, "dispatch run task failed");
                RunSummary::default()
            }
        }
    }
}

async fn run_detached(worker: Arc<Worker>, workers: usize, now: DateTime<Utc>) -> RunSummary {
    let rows = match worker.store.fetch_eligible(now).await {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, "failed to fetch submitted executions");
            return RunSummary::default();
        }
    };
    if rows.is_empty() {
        debug!("no submitted executions");
        return RunSummary::default();
    }

    let fetched = rows.len();
    info!(executions = fetched, workers, "dispatch run started");

    let permits = Arc::new(Semaphore::new(workers));
    let mut tasks = JoinSet::new();
    for record in rows {
        let permits = permits.clone();
        let worker = worker.clone();
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            worker.process(record).await;
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "dispatch worker task aborted");
        }
    }

    info!(executions = fetched, "dispatch run finished");
    RunSummary {
        fetched,
        skipped: false,
    }
}

impl Worker {
    /// Dispatch one row and persist its outcome. Never fails.
    async fn process(&self, record: ExecutionRecord) {
        let outcome = AssertUnwindSafe(self.dispatch(&record)).catch_unwind().await;

        let (status, host) = match outcome {
            Ok(Ok(host)) => (ExecutionStatus::Started, Some(host)),
            Ok(Err(e)) => {
                error!(execution_id = %record.id, environment = %record.environment, error = %e, "dispatch failed");
                (ExecutionStatus::Failed, None)
            }
            Err(payload) => {
                error!(
                    execution_id = %record.id,
                    panic = %panic_message(payload.as_ref()),
                    "dispatch worker panicked"
                );
                (ExecutionStatus::Failed, None)
            }
        };

        match self.store.update_status(&record.id, status).await {
            Ok(0) => warn!(execution_id = %record.id, %status, "execution row no longer exists, status not recorded"),
            Ok(_) => {}
            Err(e) => error!(execution_id = %record.id, %status, error = %e, "failed to record execution status"),
        }

        info!(
            execution_id = %record.id,
            environment = %record.environment,
            host = host.as_deref().unwrap_or("-"),
            %status,
            "execution processed"
        );
    }

    /// Returns the URL of the host the container was started on.
    async fn dispatch(&self, record: &ExecutionRecord) -> Result<String, DispatchError> {
        let tests = normalize_test_list(&join_test_list(&record.test_list));
        if tests.is_empty() {
            return Err(DispatchError::EmptyTestList);
        }

        let host = self
            .balancer
            .select_host(&record.environment)
            .await
            .ok_or_else(|| DispatchError::NoHostFound(record.environment.clone()))?;

        self.dispatcher
            .start(&host, &DispatchRequest::new(record, &tests))
            .await?;
        Ok(host.to_string())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunnerConfig;
    use crate::execution::NewExecution;
    use crate::hosts::{Host, HostSet};
    use crate::runtime::mock::MockRuntime;
    use crate::storage::open_memory_pool;
    use chrono::{Duration, TimeZone};

    const H1: &str = "http://h1:61191";
    const H2: &str = "http://h2:61191";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn setup(runtime: Arc<MockRuntime>, workers: usize) -> (Orchestrator, ExecutionStore) {
        let store = ExecutionStore::new(open_memory_pool().unwrap());
        let hosts = HostSet::new(vec![Host::new(H1, &["Mars"]), Host::new(H2, &["Venus"])]);
        let balancer = LoadBalancer::new(hosts, runtime.clone());
        let dispatcher = ContainerDispatcher::new(runtime, RunnerConfig::default());
        let orch = Orchestrator::new(store.clone(), balancer, dispatcher, workers);
        (orch, store)
    }

    async fn submit(store: &ExecutionStore, name: &str, env: &str, offset_secs: i64) -> String {
        let new = NewExecution {
            execution_name: name.to_string(),
            requested_by: "alice".to_string(),
            environment: env.to_string(),
            browser: "Chrome".to_string(),
            screen_capture: "N".to_string(),
            scheduled_at: Some(t0()),
            frequency: "Once".to_string(),
            test_list: vec!["Login.tc".to_string(), "Regression.tp".to_string()],
        };
        store
            .submit_at(new, t0() + Duration::seconds(offset_secs))
            .await
            .unwrap()
            .id
    }

    async fn status_of(store: &ExecutionStore, id: &str) -> ExecutionStatus {
        store.get(id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_empty_run_is_noop() {
        let runtime = Arc::new(MockRuntime::new());
        let (orch, _store) = setup(runtime.clone(), 5);

        let summary = orch.run_at(t0()).await;
        assert_eq!(summary, RunSummary::default());
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_every_row_leaves_submitted() {
        let runtime = Arc::new(MockRuntime::new());
        let (orch, store) = setup(runtime.clone(), 2);

        let mut ids = Vec::new();
        for i in 0..6 {
            let env = if i % 2 == 0 { "Mars" } else { "Venus" };
            ids.push(submit(&store, &format!("run-{i}"), env, i).await);
        }

        let summary = orch.run_at(t0() + Duration::minutes(1)).await;
        assert_eq!(summary.fetched, 6);

        for id in &ids {
            assert_eq!(status_of(&store, id).await, ExecutionStatus::Started, "{id}");
        }
        assert_eq!(runtime.created().len(), 6);
        // Mars goes to h1 only, Venus to h2 only.
        for (host, request) in runtime.created() {
            let id = &request.name;
            let idx = ids.iter().position(|x| x == id).unwrap();
            let expected = if idx % 2 == 0 { H1 } else { H2 };
            assert_eq!(host, expected);
        }
    }

    #[tokio::test]
    async fn test_normalized_tests_reach_container() {
        let runtime = Arc::new(MockRuntime::new());
        let (orch, store) = setup(runtime.clone(), 1);
        submit(&store, "nightly", "Mars", 0).await;

        orch.run_at(t0()).await;

        let created = runtime.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].1.command[3], "Login,Regression.testpack");
    }

    #[tokio::test]
    async fn test_future_rows_are_not_dispatched() {
        let runtime = Arc::new(MockRuntime::new());
        let (orch, store) = setup(runtime.clone(), 5);
        let id = submit(&store, "nightly", "Mars", 0).await;

        let summary = orch.run_at(t0() - Duration::seconds(1)).await;
        assert_eq!(summary.fetched, 0);
        assert_eq!(status_of(&store, &id).await, ExecutionStatus::Submitted);
    }

    #[tokio::test]
    async fn test_no_host_marks_failed() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.set_unhealthy(H1);
        let (orch, store) = setup(runtime.clone(), 5);
        let id = submit(&store, "nightly", "Mars", 0).await;

        orch.run_at(t0()).await;

        assert_eq!(status_of(&store, &id).await, ExecutionStatus::Failed);
        assert!(runtime.created().is_empty());
    }

    #[tokio::test]
    async fn test_failed_row_does_not_affect_others() {
        let runtime = Arc::new(MockRuntime::new());
        let (orch, store) = setup(runtime.clone(), 5);

        let ids = [
            submit(&store, "a", "Mars", 0).await,
            submit(&store, "b", "Mars", 1).await,
            submit(&store, "c", "Mars", 2).await,
        ];
        runtime.fail_create_for(&ids[1]);

        orch.run_at(t0() + Duration::minutes(1)).await;

        assert_eq!(status_of(&store, &ids[0]).await, ExecutionStatus::Started);
        assert_eq!(status_of(&store, &ids[1]).await, ExecutionStatus::Failed);
        assert_eq!(status_of(&store, &ids[2]).await, ExecutionStatus::Started);
    }

    #[tokio::test]
    async fn test_panicking_row_is_isolated() {
        let runtime = Arc::new(MockRuntime::new());
        let (orch, store) = setup(runtime.clone(), 2);

        let ids = [
            submit(&store, "a", "Mars", 0).await,
            submit(&store, "b", "Mars", 1).await,
            submit(&store, "c", "Mars", 2).await,
        ];
        runtime.panic_create_for(&ids[0]);

        let summary = orch.run_at(t0() + Duration::minutes(1)).await;
        assert_eq!(summary.fetched, 3);

        assert_eq!(status_of(&store, &ids[0]).await, ExecutionStatus::Failed);
        assert_eq!(status_of(&store, &ids[1]).await, ExecutionStatus::Started);
        assert_eq!(status_of(&store, &ids[2]).await, ExecutionStatus::Started);
    }

    #[tokio::test]
    async fn test_start_failure_marks_failed() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.set_start_fails(H1);
        let (orch, store) = setup(runtime.clone(), 5);
        let id = submit(&store, "nightly", "Mars", 0).await;

        orch.run_at(t0()).await;
        assert_eq!(status_of(&store, &id).await, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn test_processed_rows_are_not_refetched() {
        let runtime = Arc::new(MockRuntime::new());
        let (orch, store) = setup(runtime.clone(), 5);
        submit(&store, "nightly", "Mars", 0).await;

        assert_eq!(orch.run_at(t0()).await.fetched, 1);
        assert_eq!(orch.run_at(t0()).await.fetched, 0);
        assert_eq!(runtime.created().len(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_run_is_skipped() {
        let runtime = Arc::new(MockRuntime::new());
        let (orch, _store) = setup(runtime, 5);

        let _held = orch.run_lock.clone().try_lock_owned().unwrap();
        let summary = orch.run_at(t0()).await;
        assert!(summary.skipped);
    }

    #[tokio::test]
    async fn test_dropped_run_still_finishes_rows() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.set_start_delay(H1, std::time::Duration::from_millis(200));
        let (orch, store) = setup(runtime.clone(), 5);
        let id = submit(&store, "nightly", "Mars", 0).await;

        // Caller gives up while the container is still starting.
        let waited = tokio::time::timeout(std::time::Duration::from_millis(50), orch.run_at(t0())).await;
        assert!(waited.is_err());

        let mut status = status_of(&store, &id).await;
        for _ in 0..100 {
            if status != ExecutionStatus::Submitted {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            status = status_of(&store, &id).await;
        }
        assert_eq!(status, ExecutionStatus::Started);

        // Nothing left to pick up, and nothing created twice.
        assert_eq!(orch.run_at(t0()).await.fetched, 0);
        assert_eq!(runtime.created().len(), 1);
    }

    #[test]
    fn test_panic_message() {
        let s: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(s.as_ref()), "boom");
        let s: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(s.as_ref()), "bang");
        let s: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(s.as_ref()), "unknown panic");
    }
}

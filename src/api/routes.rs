//! API route definitions.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use super::state::AppState;
use super::ApiError;
use crate::activity::actions;
use crate::execution::NewExecution;
use crate::teardown::StopOutcome;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/executions", get(list_executions).post(submit_execution))
        .route("/executions/{id}", get(get_execution))
        .route("/executions/{id}/retrigger", post(retrigger_execution))
        .route("/executions/{id}/stop", put(stop_execution))
        .route("/dispatch/run", post(run_dispatch))
        .route("/hosts", get(list_hosts))
}

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": meta()
    }))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

async fn list_executions(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let records = state.store.list_recent(limit).await?;
    Ok(Json(json!({
        "data": records,
        "meta": { "total": records.len(), "limit": limit }
    })))
}

async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("execution not found: {id}")))?;
    Ok(Json(json!({ "data": record })))
}

async fn submit_execution(
    State(state): State<AppState>,
    Json(new): Json<NewExecution>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let record = state.store.submit(new).await?;
    state
        .activity
        .record(
            &record.requested_by,
            actions::EXECUTION_SUBMITTED,
            &format!("Execution: {}", record.execution_name),
        )
        .await;
    Ok((StatusCode::CREATED, Json(json!({ "data": record }))))
}

#[derive(Debug, Deserialize)]
struct RetriggerBody {
    execution_name: String,
    user: String,
}

async fn retrigger_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RetriggerBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let record = state.store.retrigger(&id, &body.execution_name, &body.user).await?;
    state
        .activity
        .record(
            &record.requested_by,
            actions::EXECUTION_RETRIGGERED,
            &format!("Execution: {} (from {id})", record.execution_name),
        )
        .await;
    Ok((StatusCode::CREATED, Json(json!({ "data": record }))))
}

#[derive(Debug, Deserialize)]
struct StopBody {
    user: String,
}

async fn stop_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<StopBody>,
) -> Result<Json<Value>, ApiError> {
    let user = body.user.trim();
    if user.is_empty() {
        return Err(ApiError::bad_request("user is required"));
    }

    let outcome = state.teardown.request_stop(&id, user).await?;
    let message = match outcome {
        StopOutcome::Stopped => format!("Execution {id} stopped"),
        StopOutcome::AlreadyCompleted => format!("Execution {id} already completed"),
    };
    Ok(Json(json!({
        "data": { "execution_id": id, "outcome": outcome, "message": message }
    })))
}

async fn run_dispatch(State(state): State<AppState>) -> Json<Value> {
    let summary = state.orchestrator.run_once().await;
    Json(json!({ "data": summary, "meta": meta() }))
}

async fn list_hosts(State(state): State<AppState>) -> Json<Value> {
    let report = state.balancer.host_report().await;
    Json(json!({ "data": report, "meta": { "total": report.len() } }))
}

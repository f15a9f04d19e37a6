//! In-process libpod REST emulator for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use podrunner::hosts::Host;

#[derive(Debug, Clone)]
pub struct EmulatedContainer {
    pub id: String,
    pub name: String,
    pub running: bool,
}

#[derive(Debug)]
struct EmulatorState {
    healthy: bool,
    fail_create: bool,
    fail_start: bool,
    containers: Vec<EmulatedContainer>,
    create_bodies: Vec<Value>,
    next_id: u64,
}

type Shared = Arc<Mutex<EmulatorState>>;

/// A libpod-compatible host listening on an ephemeral local port.
pub struct LibpodEmulator {
    pub url: String,
    state: Shared,
    handle: JoinHandle<()>,
}

impl LibpodEmulator {
    pub async fn spawn() -> Self {
        let state: Shared = Arc::new(Mutex::new(EmulatorState {
            healthy: true,
            fail_create: false,
            fail_start: false,
            containers: Vec::new(),
            create_bodies: Vec::new(),
            next_id: 0,
        }));

        let app = Router::new()
            .route("/_ping", get(ping))
            .route("/v4.8.0/libpod/containers/json", get(list))
            .route("/v4.8.0/libpod/containers/create", post(create))
            .route("/v4.8.0/libpod/containers/{id}/start", post(start))
            .route("/v4.8.0/libpod/containers/{id}/stop", post(stop))
            .route("/v4.8.0/libpod/containers/{id}", delete(remove))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}"),
            state,
            handle,
        }
    }

    pub fn host(&self, environments: &[&str]) -> Host {
        Host::new(self.url.clone(), environments)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.lock().unwrap().healthy = healthy;
    }

    pub fn fail_create(&self) {
        self.state.lock().unwrap().fail_create = true;
    }

    pub fn fail_start(&self) {
        self.state.lock().unwrap().fail_start = true;
    }

    /// Add a running container.
    pub fn add_container(&self, id: &str, name: &str) {
        self.state.lock().unwrap().containers.push(EmulatedContainer {
            id: id.to_string(),
            name: name.to_string(),
            running: true,
        });
    }

    pub fn containers(&self) -> Vec<EmulatedContainer> {
        self.state.lock().unwrap().containers.clone()
    }

    pub fn running(&self) -> Vec<EmulatedContainer> {
        self.containers().into_iter().filter(|c| c.running).collect()
    }

    pub fn create_bodies(&self) -> Vec<Value> {
        self.state.lock().unwrap().create_bodies.clone()
    }
}

impl Drop for LibpodEmulator {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn unhealthy() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "unavailable").into_response()
}

async fn ping(State(state): State<Shared>) -> Response {
    if !state.lock().unwrap().healthy {
        return unhealthy();
    }
    (StatusCode::OK, "OK").into_response()
}

async fn list(State(state): State<Shared>) -> Response {
    let state = state.lock().unwrap();
    if !state.healthy {
        return unhealthy();
    }
    let body: Vec<Value> = state
        .containers
        .iter()
        .filter(|c| c.running)
        .map(|c| json!({ "Id": c.id, "Names": [c.name], "State": "running" }))
        .collect();
    Json(body).into_response()
}

async fn create(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut state = state.lock().unwrap();
    state.create_bodies.push(body.clone());
    if state.fail_create {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "cause": "image not known" }))).into_response();
    }

    state.next_id += 1;
    let id = format!("{:012x}", state.next_id);
    let name = body["name"].as_str().unwrap_or_default().to_string();
    state.containers.push(EmulatedContainer {
        id: id.clone(),
        name,
        running: false,
    });
    (StatusCode::CREATED, Json(json!({ "Id": id, "Warnings": [] }))).into_response()
}

async fn start(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut state = state.lock().unwrap();
    if state.fail_start {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "cause": "oci runtime error" }))).into_response();
    }
    match state.containers.iter_mut().find(|c| c.id == id) {
        Some(c) if c.running => StatusCode::NOT_MODIFIED.into_response(),
        Some(c) => {
            c.running = true;
            StatusCode::NO_CONTENT.into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn stop(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut state = state.lock().unwrap();
    match state.containers.iter_mut().find(|c| c.id == id) {
        Some(c) if !c.running => StatusCode::NOT_MODIFIED.into_response(),
        Some(c) => {
            c.running = false;
            StatusCode::NO_CONTENT.into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn remove(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut state = state.lock().unwrap();
    let before = state.containers.len();
    state.containers.retain(|c| c.id != id);
    if state.containers.len() == before {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(json!([{ "Id": id }])).into_response()
}

//! Thin administrative HTTP surface: read-only fleet inspection plus
//! drain/activate, layered over the worker protocol's WebSocket endpoint.
//!
//! Every handler here is thin, delegating straight to the
//! [`ServiceFacade`].

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;

use crate::error::CoordinatorError;
use crate::registry::DaemonRecord;
use crate::rpc::{ws_handler, RpcServerState};
use crate::service_facade::ServiceFacade;

/// Serializable view of a [`DaemonRecord`]; `last_heartbeat` is a monotonic
/// `Instant` with no meaningful wire representation, so it's surfaced as an
/// age in seconds instead.
#[derive(Serialize)]
struct DaemonView {
    id: String,
    name: String,
    version: String,
    capabilities: crate::capability::Capability,
    state: crate::registry::DaemonState,
    heartbeat_age_secs: f64,
    active_jobs: usize,
}

impl From<DaemonRecord> for DaemonView {
    fn from(record: DaemonRecord) -> Self {
        let heartbeat_age_secs = record.heartbeat_age().as_secs_f64();
        Self {
            id: record.id,
            name: record.name,
            version: record.version,
            capabilities: record.capabilities,
            state: record.state,
            heartbeat_age_secs,
            active_jobs: record.active_jobs,
        }
    }
}

#[derive(Clone)]
pub struct AdminState {
    pub facade: Arc<ServiceFacade>,
    pub rpc: RpcServerState,
}

pub fn router(state: AdminState) -> Router {
    let worker_protocol = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state.rpc.clone());

    let admin = Router::new()
        .route("/", get(|| async { "coordinatord" }))
        .route("/daemons", get(list_daemons))
        .route("/daemons/{id}", get(get_daemon))
        .route("/daemons/{id}/drain", post(drain_daemon))
        .route("/daemons/{id}/activate", post(activate_daemon))
        .route("/stats", get(cluster_stats))
        .with_state(state);

    admin.merge(worker_protocol)
}

async fn list_daemons(State(state): State<AdminState>) -> impl IntoResponse {
    let views: Vec<DaemonView> = state.facade.list_daemons().into_iter().map(DaemonView::from).collect();
    Json(views)
}

async fn get_daemon(State(state): State<AdminState>, Path(id): Path<String>) -> Response {
    match state.facade.get_daemon(&id) {
        Some(record) => Json(DaemonView::from(record)).into_response(),
        None => CoordinatorError::NotFound(id).into_response(),
    }
}

async fn drain_daemon(State(state): State<AdminState>, Path(id): Path<String>) -> Response {
    match state.facade.drain_daemon(&id) {
        Ok(()) => Json(json!({ "draining": id })).into_response(),
        Err(err) => CoordinatorError::from(err).into_response(),
    }
}

async fn activate_daemon(State(state): State<AdminState>, Path(id): Path<String>) -> Response {
    match state.facade.activate_daemon(&id) {
        Ok(()) => Json(json!({ "activated": id })).into_response(),
        Err(err) => CoordinatorError::from(err).into_response(),
    }
}

async fn cluster_stats(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.facade.cluster_stats())
}

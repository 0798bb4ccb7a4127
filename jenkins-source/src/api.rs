//! Status HTTP API.
//!
//! Exposes two routes:
//! - `GET /health` - liveness and connector name
//! - `GET /api/tasks` - status of every running task

use crate::manager::StatusMap;
use crate::worker::TaskStatus;
use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;
use std::sync::Arc;

/// Shared state for the status API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub connector_name: String,
    pub status_map: StatusMap,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    connector: String,
    tasks: usize,
}

async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    let tasks = state.status_map.lock().await.len();
    Json(HealthResponse {
        status: "ok",
        connector: state.connector_name.clone(),
        tasks,
    })
}

async fn list_tasks(State(state): State<Arc<ApiState>>) -> Json<Vec<TaskStatus>> {
    // Snapshot handles without holding the map lock during status reads
    let handles: Vec<_> = state.status_map.lock().await.values().cloned().collect();

    let mut tasks = Vec::with_capacity(handles.len());
    for handle in handles {
        tasks.push(handle.lock().await.clone());
    }
    Json(tasks)
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/tasks", get(list_tasks))
        .with_state(Arc::new(state))
}

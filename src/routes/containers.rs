use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::QueryRejection},
    routing::{get, post},
};
use serde::Deserialize;

use super::{JsonBody, success};
use crate::AppState;
use crate::docker::{ContainerDetails, ContainerInfo, LogsQuery};
use crate::error::ApiError;

#[derive(Deserialize)]
struct ListQuery {
    all: Option<bool>,
}

#[derive(Deserialize)]
struct RemoveRequest {
    #[serde(default)]
    force: bool,
}

async fn list_containers(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<ContainerInfo>>, ApiError> {
    let Query(query) = query?;
    let containers = state
        .docker
        .list_containers(query.all.unwrap_or(true))
        .await?;
    Ok(Json(containers))
}

async fn inspect_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ContainerDetails>, ApiError> {
    Ok(Json(state.docker.inspect_container(&id).await?))
}

async fn start_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.docker.start_container(&id).await?;
    Ok(success())
}

async fn stop_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.docker.stop_container(&id).await?;
    Ok(success())
}

async fn restart_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.docker.restart_container(&id).await?;
    Ok(success())
}

async fn kill_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.docker.kill_container(&id).await?;
    Ok(success())
}

async fn remove_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<RemoveRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.docker.remove_container(&id, req.force).await?;
    Ok(success())
}

async fn container_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    query: Result<Query<LogsQuery>, QueryRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Query(query) = query?;
    let logs = state.docker.container_logs(&id, &query).await?;
    Ok(Json(serde_json::json!({ "logs": logs })))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/containers", get(list_containers))
        .route("/containers/{id}", get(inspect_container).delete(remove_container))
        .route("/containers/{id}/start", post(start_container))
        .route("/containers/{id}/stop", post(stop_container))
        .route("/containers/{id}/restart", post(restart_container))
        .route("/containers/{id}/kill", post(kill_container))
        .route("/containers/{id}/logs", get(container_logs))
        .with_state(state)
}

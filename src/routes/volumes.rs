use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;

use super::{JsonBody, limited, success};
use crate::AppState;
use crate::docker::{CreateVolumeRequest, PruneReport, VolumeInfo};
use crate::error::ApiError;

#[derive(Deserialize)]
struct RemoveRequest {
    #[serde(default)]
    force: bool,
}

async fn list_volumes(State(state): State<Arc<AppState>>) -> Result<Json<Vec<VolumeInfo>>, ApiError> {
    Ok(Json(state.docker.list_volumes().await?))
}

async fn inspect_volume(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<VolumeInfo>, ApiError> {
    Ok(Json(state.docker.inspect_volume(&name).await?))
}

async fn create_volume(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<CreateVolumeRequest>,
) -> Result<(StatusCode, Json<VolumeInfo>), ApiError> {
    req.validate()?;
    let volume = state.docker.create_volume(&req).await?;
    Ok((StatusCode::CREATED, Json(volume)))
}

async fn remove_volume(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    JsonBody(req): JsonBody<RemoveRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.docker.remove_volume(&name, req.force).await?;
    Ok(success())
}

async fn prune_volumes(State(state): State<Arc<AppState>>) -> Result<Json<PruneReport>, ApiError> {
    Ok(Json(state.docker.prune_volumes().await?))
}

pub fn router(state: Arc<AppState>) -> Router {
    let prune = limited(
        Router::new().route("/volumes/prune", post(prune_volumes)),
        &state.prune_limiter,
    );

    Router::new()
        .route("/volumes", get(list_volumes).post(create_volume))
        .route("/volumes/{name}", get(inspect_volume).delete(remove_volume))
        .merge(prune)
        .with_state(state)
}

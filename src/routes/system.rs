use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};

use crate::AppState;
use crate::docker::{DockerVersion, SystemInfo};
use crate::error::ApiError;

async fn system_info(State(state): State<Arc<AppState>>) -> Result<Json<SystemInfo>, ApiError> {
    Ok(Json(state.docker.system_info().await?))
}

async fn version(State(state): State<Arc<AppState>>) -> Result<Json<DockerVersion>, ApiError> {
    Ok(Json(state.docker.version().await?))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/system/info", get(system_info))
        .route("/system/version", get(version))
        .with_state(state)
}

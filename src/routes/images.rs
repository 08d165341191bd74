use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde::Deserialize;

use super::{JsonBody, limited, success};
use crate::AppState;
use crate::docker::{ImageInfo, PruneReport};
use crate::error::ApiError;
use crate::relay::pull::{PullFrame, relay_pull};

#[derive(Deserialize)]
struct PullRequest {
    image: String,
}

#[derive(Deserialize)]
struct RemoveRequest {
    #[serde(default)]
    force: bool,
}

#[derive(Deserialize)]
struct TagRequest {
    repo: String,
    #[serde(default = "default_tag")]
    tag: String,
}

fn default_tag() -> String {
    "latest".to_string()
}

async fn list_images(State(state): State<Arc<AppState>>) -> Result<Json<Vec<ImageInfo>>, ApiError> {
    Ok(Json(state.docker.list_images().await?))
}

async fn inspect_image(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ImageInfo>, ApiError> {
    Ok(Json(state.docker.inspect_image(&id).await?))
}

fn frame_event(frame: PullFrame) -> Event {
    match Event::default().json_data(&frame) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("Failed to serialize pull frame: {e}");
            Event::default().data(r#"{"error":"unserializable progress event"}"#)
        }
    }
}

/// POST /images/pull
///
/// Streams progress as server-sent events. A failure before the first
/// progress event is a plain error response.
async fn pull_image(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<PullRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let image = req.image.trim();
    if image.is_empty() {
        return Err(ApiError::validation("image must not be empty"));
    }

    let frames = relay_pull(&state.docker, image).await?;

    Ok(Sse::new(frames.map(|frame| Ok(frame_event(frame)))).keep_alive(KeepAlive::default()))
}

async fn remove_image(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<RemoveRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.docker.remove_image(&id, req.force).await?;
    Ok(success())
}

async fn prune_images(State(state): State<Arc<AppState>>) -> Result<Json<PruneReport>, ApiError> {
    Ok(Json(state.docker.prune_images().await?))
}

async fn tag_image(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<TagRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.repo.trim().is_empty() {
        return Err(ApiError::validation("repo must not be empty"));
    }
    state.docker.tag_image(&id, &req.repo, &req.tag).await?;
    Ok(success())
}

pub fn router(state: Arc<AppState>) -> Router {
    let pull = limited(
        Router::new().route("/images/pull", post(pull_image)),
        &state.pull_limiter,
    );
    let prune = limited(
        Router::new().route("/images/prune", post(prune_images)),
        &state.prune_limiter,
    );

    Router::new()
        .route("/images", get(list_images))
        .route("/images/{id}", get(inspect_image).delete(remove_image))
        .route("/images/{id}/tag", post(tag_image))
        .merge(pull)
        .merge(prune)
        .with_state(state)
}

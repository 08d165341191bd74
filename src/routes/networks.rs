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
use crate::docker::{CreateNetworkRequest, NetworkDetails, NetworkPruneReport};
use crate::error::ApiError;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectRequest {
    container_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisconnectRequest {
    container_id: String,
    #[serde(default)]
    force: bool,
}

fn require_container(container_id: &str) -> Result<(), ApiError> {
    if container_id.trim().is_empty() {
        return Err(ApiError::validation("containerId must not be empty"));
    }
    Ok(())
}

async fn list_networks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<NetworkDetails>>, ApiError> {
    Ok(Json(state.docker.list_networks().await?))
}

async fn inspect_network(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<NetworkDetails>, ApiError> {
    Ok(Json(state.docker.inspect_network(&id).await?))
}

async fn create_network(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<CreateNetworkRequest>,
) -> Result<(StatusCode, Json<NetworkDetails>), ApiError> {
    req.validate()?;
    let network = state.docker.create_network(&req).await?;
    Ok((StatusCode::CREATED, Json(network)))
}

async fn remove_network(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.docker.remove_network(&id).await?;
    Ok(success())
}

async fn connect_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<ConnectRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_container(&req.container_id)?;
    state.docker.connect_container(&id, &req.container_id).await?;
    Ok(success())
}

async fn disconnect_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<DisconnectRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_container(&req.container_id)?;
    state
        .docker
        .disconnect_container(&id, &req.container_id, req.force)
        .await?;
    Ok(success())
}

async fn prune_networks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<NetworkPruneReport>, ApiError> {
    Ok(Json(state.docker.prune_networks().await?))
}

pub fn router(state: Arc<AppState>) -> Router {
    let prune = limited(
        Router::new().route("/networks/prune", post(prune_networks)),
        &state.prune_limiter,
    );

    Router::new()
        .route("/networks", get(list_networks).post(create_network))
        .route("/networks/{id}", get(inspect_network).delete(remove_network))
        .route("/networks/{id}/connect", post(connect_container))
        .route("/networks/{id}/disconnect", post(disconnect_container))
        .merge(prune)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{self, StatusCode},
    };
    use tower::ServiceExt;

    use crate::routes::testing::{body_json, test_app};

    async fn post(uri: &str, body: &'static str) -> axum::response::Response {
        test_app()
            .oneshot(http::Request::post(uri).body(Body::from(body)).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn connect_requires_a_container() {
        let response = post("/api/networks/net1/connect", "").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = post("/api/networks/net1/disconnect", r#"{"containerId":" "}"#).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn create_validates_before_the_engine() {
        let response = post("/api/networks", r#"{"name":"","driver":"bridge"}"#).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    docker: &'static str,
    timestamp: String,
}

impl Health {
    fn new(docker_connected: bool) -> Self {
        let (status, docker) = if docker_connected {
            ("healthy", "connected")
        } else {
            ("degraded", "disconnected")
        };
        Self {
            status,
            docker,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Always 200; engine trouble shows up as `degraded`.
async fn health(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(Health::new(state.docker.ping().await))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
}

//! Router fixtures. The engine socket does not exist, so every engine call
//! fails as unreachable; only behavior decided before that point is testable.

use std::sync::Arc;

use axum::{Router, response::Response};

use crate::AppState;
use crate::config::Config;

pub fn test_config() -> Config {
    Config {
        port: 0,
        docker_socket: "/nonexistent/dockyard-test.sock".into(),
        cors_origins: vec!["http://localhost:5173".into()],
        pull_rate_limit: 10,
        prune_rate_limit: 3,
        static_dir: "/nonexistent/dockyard-dist".into(),
        engine_timeout_secs: 1,
    }
}

pub fn test_app() -> Router {
    super::app(Arc::new(AppState::new(test_config())))
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

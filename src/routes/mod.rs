mod containers;
mod health;
mod images;
mod networks;
mod system;
mod volumes;
mod ws;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{FromRequest, Request},
    http::{HeaderValue, Method, header},
    middleware,
};
use serde::de::DeserializeOwned;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    services::{ServeDir, ServeFile},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};

use crate::AppState;
use crate::config::Config;
use crate::error::ApiError;
use crate::rate_limit::{RateLimiter, throttle};

/// JSON request body where an empty body means "all defaults".
///
/// Malformed or mistyped bodies are rejected as validation errors before any
/// engine call is made.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::validation(e.body_text()))?;
        parse_body(&bytes).map(JsonBody)
    }
}

fn parse_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ApiError> {
    let raw: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        bytes
    };
    serde_json::from_slice(raw).map_err(|e| ApiError::validation(format!("Invalid request body: {e}")))
}

/// `{ "success": true }`
fn success() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "success": true }))
}

async fn api_not_found() -> ApiError {
    ApiError::route_not_found()
}

/// Wrap `router` so every route in it draws from `limiter`.
fn limited<S>(router: Router<S>, limiter: &Arc<RateLimiter>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.route_layer(middleware::from_fn_with_state(limiter.clone(), throttle))
}

fn cors(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router(state.clone()))
        .merge(system::router(state.clone()))
        .merge(containers::router(state.clone()))
        .merge(images::router(state.clone()))
        .merge(volumes::router(state.clone()))
        .merge(networks::router(state))
        .fallback(api_not_found)
}

/// The complete application: REST API, relay sockets and the SPA.
pub fn app(state: Arc<AppState>) -> Router {
    let static_dir = &state.config.static_dir;
    let spa = ServeDir::new(static_dir)
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new(format!("{static_dir}/index.html")));

    Router::new()
        .nest("/api", api_router(state.clone()))
        .merge(ws::router(state.clone()))
        .fallback_service(spa)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(CompressionLayer::new())
        .layer(cors(&state.config))
        .layer(TraceLayer::new_for_http())
}

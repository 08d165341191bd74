use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::{RateLimitResult, RateLimiter};
use crate::error::ApiError;

/// Client identity used as the limiter key.
fn client_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Rate-limit middleware. Rejected requests never reach the handler.
pub async fn throttle(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_key(&request);
    let result = limiter.check(&client);

    if !result.allowed {
        tracing::warn!(%client, path = %request.uri().path(), "Rate limit exceeded");
        let mut response = ApiError::RateLimited {
            message: limiter.message().to_string(),
            retry_after: result.reset_secs,
        }
        .into_response();
        inject_rate_limit_headers(response.headers_mut(), &result);
        return response;
    }

    let mut response = next.run(request).await;
    inject_rate_limit_headers(response.headers_mut(), &result);
    response
}

fn inject_rate_limit_headers(headers: &mut HeaderMap, rl: &RateLimitResult) {
    if rl.limit > 0 {
        headers.insert("X-RateLimit-Limit", rl.limit.into());
        headers.insert("X-RateLimit-Remaining", rl.remaining.into());
        headers.insert("X-RateLimit-Reset", rl.reset_secs.into());
    }
}

//! Per-client throttling for expensive engine operations.

mod middleware;

pub use middleware::throttle;

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Sliding-window rate limiter (per client, in-memory).
///
/// Each client may make `limit` requests in any rolling `window`. A limiter
/// can be shared by several routes so they draw from the same allowance.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    message: String,
    hits: DashMap<String, VecDeque<Instant>>,
}

/// Result of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the oldest request in the window expires.
    pub reset_secs: u32,
}

impl RateLimiter {
    /// `limit` = 0 disables the limiter.
    pub fn new(limit: u32, window: Duration, message: impl Into<String>) -> Self {
        Self {
            limit,
            window,
            message: message.into(),
            hits: DashMap::new(),
        }
    }

    pub fn per_minute(limit: u32, message: impl Into<String>) -> Self {
        Self::new(limit, Duration::from_secs(60), message)
    }

    /// Message returned to throttled clients.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Record one request from `client` if it fits in the window.
    pub fn check(&self, client: &str) -> RateLimitResult {
        self.check_at(client, Instant::now())
    }

    pub fn check_at(&self, client: &str, now: Instant) -> RateLimitResult {
        if self.limit == 0 {
            return RateLimitResult {
                allowed: true,
                limit: 0,
                remaining: 0,
                reset_secs: 0,
            };
        }

        let mut entry = self.hits.entry(client.to_string()).or_default();
        let hits = entry.value_mut();

        while hits
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= self.window)
        {
            hits.pop_front();
        }

        let allowed = (hits.len() as u32) < self.limit;
        if allowed {
            hits.push_back(now);
        }

        let reset_secs = hits
            .front()
            .map(|oldest| {
                let expires = self.window.saturating_sub(now.saturating_duration_since(*oldest));
                expires.as_secs_f64().ceil() as u32
            })
            .unwrap_or(0);

        RateLimitResult {
            allowed,
            limit: self.limit,
            remaining: self.limit.saturating_sub(hits.len() as u32),
            reset_secs,
        }
    }

    /// Drop clients with no requests left in the window.
    pub fn sweep(&self, now: Instant) {
        self.hits.retain(|_, hits| {
            hits.back()
                .is_some_and(|t| now.saturating_duration_since(*t) < self.window)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_beyond_the_limit_are_rejected() {
        let limiter = RateLimiter::per_minute(2, "slow down");
        let now = Instant::now();

        let first = limiter.check_at("10.0.0.1", now);
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);

        assert!(limiter.check_at("10.0.0.1", now).allowed);

        let third = limiter.check_at("10.0.0.1", now + Duration::from_secs(15));
        assert!(!third.allowed);
        assert_eq!(third.remaining, 0);
        assert_eq!(third.reset_secs, 45);
    }

    #[test]
    fn window_slides_rather_than_resetting() {
        let limiter = RateLimiter::per_minute(2, "slow down");
        let start = Instant::now();

        assert!(limiter.check_at("c", start).allowed);
        assert!(limiter.check_at("c", start + Duration::from_secs(30)).allowed);
        assert!(!limiter.check_at("c", start + Duration::from_secs(59)).allowed);

        // Only the first request has aged out.
        assert!(limiter.check_at("c", start + Duration::from_secs(60)).allowed);
        assert!(!limiter.check_at("c", start + Duration::from_secs(61)).allowed);
    }

    #[test]
    fn clients_are_counted_separately() {
        let limiter = RateLimiter::per_minute(1, "slow down");
        let now = Instant::now();

        assert!(limiter.check_at("a", now).allowed);
        assert!(!limiter.check_at("a", now).allowed);
        assert!(limiter.check_at("b", now).allowed);
    }

    #[test]
    fn zero_limit_is_unlimited() {
        let limiter = RateLimiter::per_minute(0, "never");
        let now = Instant::now();
        for _ in 0..100 {
            assert!(limiter.check_at("a", now).allowed);
        }
    }

    #[test]
    fn sweep_forgets_idle_clients() {
        let limiter = RateLimiter::per_minute(1, "slow down");
        let now = Instant::now();
        limiter.check_at("a", now);

        limiter.sweep(now + Duration::from_secs(61));
        assert!(limiter.hits.is_empty());
    }
}

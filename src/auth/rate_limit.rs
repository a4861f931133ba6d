//! Sliding-window request rate limiting.
//!
//! In-memory, per-client, DashMap-backed. Suitable for single-instance
//! deployments; a multi-instance fleet would move the window into Redis.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::utils::response::ApiError;
use crate::AppState;

#[derive(Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Clone)]
struct WindowEntry {
    request_count: u32,
    window_start: Instant,
}

pub struct RateLimiter {
    entries: Arc<DashMap<String, WindowEntry>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let entries: Arc<DashMap<String, WindowEntry>> = Arc::new(DashMap::new());

        // Periodically drop clients whose window has lapsed.
        let sweep_entries = entries.clone();
        let window = config.window;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(window * 2);
            loop {
                interval.tick().await;
                let now = Instant::now();
                sweep_entries.retain(|_, entry| now.duration_since(entry.window_start) < window);
            }
        });

        Self { entries, config }
    }

    pub fn check(&self, client_id: &str) -> bool {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(client_id.to_string())
            .or_insert_with(|| WindowEntry {
                request_count: 0,
                window_start: now,
            });

        if now.duration_since(entry.window_start) >= self.config.window {
            entry.request_count = 0;
            entry.window_start = now;
        }

        entry.request_count += 1;
        entry.request_count <= self.config.max_requests
    }
}

pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    // Prefer the proxy-provided client address when present.
    let client_id = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
        .unwrap_or_else(|| addr.ip().to_string());

    if !state.rate_limiter.check(&client_id) {
        metrics::counter!("http_rate_limited_total").increment(1);
        return Err(ApiError::rate_limited());
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn limiter_allows_up_to_max_then_rejects() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 3,
            window: Duration::from_secs(60),
        });

        assert!(limiter.check("client-a"));
        assert!(limiter.check("client-a"));
        assert!(limiter.check("client-a"));
        assert!(!limiter.check("client-a"));
        // Another client has its own window.
        assert!(limiter.check("client-b"));
    }
}

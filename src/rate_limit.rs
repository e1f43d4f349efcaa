use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use moka::future::Cache;
use tracing::warn;

use crate::config::RateLimitConfig;
use crate::error::AppError;

/// Fixed-window request counter per client. The window opens on the
/// client's first request and the counter entry expires with it.
#[derive(Clone)]
pub struct RateLimiter {
    scope: &'static str,
    limit: u64,
    counters: Cache<String, Arc<AtomicU64>>,
}

impl RateLimiter {
    pub fn new(scope: &'static str, cfg: &RateLimitConfig) -> Self {
        Self {
            scope,
            limit: cfg.requests_per_window,
            counters: Cache::builder()
                .time_to_live(Duration::from_secs(cfg.window_secs))
                .max_capacity(100_000)
                .build(),
        }
    }

    /// Counts one request for `client`; `false` once the window is exhausted.
    pub async fn check(&self, client: &str) -> bool {
        let counter = self
            .counters
            .get_with(client.to_string(), async { Arc::new(AtomicU64::new(0)) })
            .await;
        counter.fetch_add(1, Ordering::SeqCst) < self.limit
    }
}

fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| peer.map(|p| p.ip().to_string()))
        .unwrap_or_else(|| "unknown".into())
}

pub async fn enforce(State(limiter): State<RateLimiter>, req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_key(req.headers(), peer);

    if !limiter.check(&client).await {
        warn!(scope = limiter.scope, %client, "rate limit exceeded");
        return AppError::RateLimited.into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u64) -> RateLimiter {
        RateLimiter::new(
            "test",
            &RateLimitConfig {
                requests_per_window: limit,
                window_secs: 60,
            },
        )
    }

    #[tokio::test]
    async fn allows_up_to_the_limit_per_client() {
        let l = limiter(2);
        assert!(l.check("1.1.1.1").await);
        assert!(l.check("1.1.1.1").await);
        assert!(!l.check("1.1.1.1").await);
        assert!(l.check("2.2.2.2").await);
    }

    #[test]
    fn client_key_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        let peer: SocketAddr = "10.0.0.1:5555".parse().unwrap();
        assert_eq!(client_key(&headers, Some(peer)), "10.0.0.1");

        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.2".parse().unwrap());
        assert_eq!(client_key(&headers, Some(peer)), "203.0.113.9");
        assert_eq!(client_key(&HeaderMap::new(), None), "unknown");
    }
}

//! Per-IP rate limiting for expensive routes
//!
//! Each client IP gets a token bucket holding `requests_per_window` tokens
//! that refills evenly over `window`. The export route uses it with the
//! default of one request per 60 seconds.

use crate::config::RateLimitConfig;
use crate::error::ApiError;
use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::debug;

/// Tracked IPs above which idle buckets are pruned
const PRUNE_THRESHOLD: usize = 1024;

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    /// Tokens per second
    rate: f64,
    capacity: f64,
}

impl TokenBucket {
    fn new(rate: f64, capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
            rate,
            capacity,
        }
    }

    /// Take one token, or return the seconds until one is available
    fn try_consume(&mut self, now: Instant) -> Option<u64> {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            let wait_secs = ((1.0 - self.tokens) / self.rate).ceil() as u64;
            Some(wait_secs.max(1))
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.duration_since(self.last_refill)
    }
}

/// Rate limiter with per-IP tracking
pub struct RateLimiter {
    buckets: Mutex<HashMap<IpAddr, TokenBucket>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Create a rate limiter from configuration
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn capacity(&self) -> f64 {
        f64::from(self.config.requests_per_window.max(1))
    }

    fn rate(&self) -> f64 {
        self.capacity() / self.config.window.as_secs_f64().max(0.001)
    }

    /// Check whether a request from `addr` may proceed
    ///
    /// Returns `Some(seconds)` to wait when the client is over its limit.
    pub async fn check(&self, addr: SocketAddr) -> Option<u64> {
        if !self.config.enabled || self.config.exempt_ips.contains(&addr.ip()) {
            return None;
        }

        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;

        if buckets.len() > PRUNE_THRESHOLD {
            let window = self.config.window;
            buckets.retain(|_, bucket| bucket.idle_for(now) < window);
        }

        let (rate, capacity) = (self.rate(), self.capacity());
        buckets
            .entry(addr.ip())
            .or_insert_with(|| TokenBucket::new(rate, capacity))
            .try_consume(now)
    }

    /// Number of IPs currently tracked
    pub async fn tracked_clients(&self) -> usize {
        self.buckets.lock().await.len()
    }
}

/// Rate limiting middleware
///
/// Requires the server to be started with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    match limiter.check(addr).await {
        None => next.run(req).await,
        Some(retry_after) => {
            debug!(client = %addr.ip(), path = %req.uri().path(), retry_after, "rate limited");
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ApiError::rate_limited(retry_after)),
            )
                .into_response();
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after));
            response
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router, body::Body, extract::connect_info::MockConnectInfo, middleware, routing::post,
    };
    use tower::ServiceExt;

    fn limiter(requests: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            enabled: true,
            requests_per_window: requests,
            window: Duration::from_secs(window_secs),
            exempt_ips: vec!["10.0.0.9".parse().unwrap()],
        })
    }

    fn addr(ip: &str) -> SocketAddr {
        SocketAddr::new(ip.parse().unwrap(), 40000)
    }

    #[tokio::test]
    async fn one_request_per_window() {
        let limiter = limiter(1, 60);

        assert_eq!(limiter.check(addr("192.0.2.1")).await, None);
        let wait = limiter.check(addr("192.0.2.1")).await.unwrap();
        assert!((59..=60).contains(&wait), "wait was {wait}");
    }

    #[tokio::test]
    async fn clients_are_tracked_separately() {
        let limiter = limiter(1, 60);

        assert_eq!(limiter.check(addr("192.0.2.1")).await, None);
        assert_eq!(limiter.check(addr("192.0.2.2")).await, None);
        assert!(limiter.check(addr("192.0.2.1")).await.is_some());
        assert_eq!(limiter.tracked_clients().await, 2);
    }

    #[tokio::test]
    async fn burst_up_to_window_allowance() {
        let limiter = limiter(3, 60);

        for _ in 0..3 {
            assert_eq!(limiter.check(addr("192.0.2.1")).await, None);
        }
        assert!(limiter.check(addr("192.0.2.1")).await.is_some());
    }

    #[tokio::test]
    async fn exempt_ip_is_never_limited() {
        let limiter = limiter(1, 60);

        for _ in 0..5 {
            assert_eq!(limiter.check(addr("10.0.0.9")).await, None);
        }
        assert_eq!(limiter.tracked_clients().await, 0);
    }

    #[tokio::test]
    async fn disabled_limiter_allows_everything() {
        let mut config = RateLimitConfig::default();
        config.enabled = false;
        let limiter = RateLimiter::new(config);

        for _ in 0..5 {
            assert_eq!(limiter.check(addr("192.0.2.1")).await, None);
        }
    }

    #[test]
    fn bucket_refills_over_time() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(1.0 / 60.0, 1.0);
        bucket.last_refill = start;

        assert_eq!(bucket.try_consume(start), None);
        assert!(bucket.try_consume(start + Duration::from_secs(30)).is_some());
        assert_eq!(bucket.try_consume(start + Duration::from_secs(61)), None);
    }

    #[tokio::test]
    async fn middleware_returns_429_with_retry_after() {
        let limiter = Arc::new(limiter(1, 60));
        let app = Router::new()
            .route("/export", post(|| async { "ok" }))
            .route_layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
            .layer(MockConnectInfo(addr("192.0.2.7")));

        let request = || {
            axum::http::Request::builder()
                .method("POST")
                .uri("/export")
                .body(Body::empty())
                .unwrap()
        };

        let first = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(request()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().contains_key(RETRY_AFTER));

        let body = axum::body::to_bytes(second.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "rate_limited");
        assert!(json["error"]["details"]["retry_after_seconds"].as_u64().unwrap() >= 59);
    }
}

//! Per-IP rate limiting middleware.
//!
//! An open proxy is an easy amplifier; a fixed-window counter per client
//! keeps a single player or scraper from monopolising upstream bandwidth.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use super::state::AppState;

/// Request count inside the current window for one client
#[derive(Clone, Copy, Debug)]
struct Window {
    started: Instant,
    count: u32,
}

/// Per-IP fixed-window rate limiter.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    windows: Arc<DashMap<String, Window>>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        Self::with_window(requests_per_minute, Duration::from_secs(60))
    }

    fn with_window(limit: u32, window: Duration) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            limit,
            window,
        }
    }

    /// Count one request from `client`.
    ///
    /// Over the limit, returns how long until the client's window resets.
    fn check(&self, client: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let mut w = self.windows.entry(client.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        let age = now.duration_since(w.started);
        if age >= self.window {
            *w = Window {
                started: now,
                count: 0,
            };
        }

        w.count += 1;
        if w.count <= self.limit {
            Ok(())
        } else {
            Err(self.window.saturating_sub(now.duration_since(w.started)))
        }
    }

    /// Drop windows that have expired.
    pub fn cleanup(&self) {
        self.windows.retain(|_, w| w.started.elapsed() < self.window);
    }
}

/// First X-Forwarded-For hop, else the peer address, else "unknown".
fn client_key(req: &Request) -> String {
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first) = value.split(',').next()
        && !first.trim().is_empty()
    {
        return first.trim().to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Axum middleware: reject requests exceeding the per-IP rate limit.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if let Some(limiter) = &state.rate_limiter {
        let client = client_key(&req);
        if let Err(retry_after) = limiter.check(&client) {
            warn!("Rate limit exceeded for {}", client);
            // Round up so clients never retry inside the current window
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            return (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, secs.to_string())],
                "Rate limit exceeded\n",
            )
                .into_response();
        }
    }

    next.run(req).await
}

/// Periodically purge expired counters until the token is cancelled.
pub fn spawn_cleanup(limiter: RateLimiter, shutdown: tokio_util::sync::CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(limiter.window);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => limiter.cleanup(),
            }
        }
    });
}

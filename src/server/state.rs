use crate::{
    config::Config,
    error::{ProxyError, Result},
    hls::ProxyEndpoint,
    server::rate_limit::RateLimiter,
};
use metrics_exporter_prometheus::PrometheusHandle;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Shared HTTP client for connection pooling
    pub http_client: Client,
    /// Target for proxied manifest references
    pub endpoint: ProxyEndpoint,
    /// Per-IP rate limiter (None when disabled)
    pub rate_limiter: Option<RateLimiter>,
    pub metrics: PrometheusHandle,
    pub started_at: Instant,
}

impl AppState {
    /// Create a new AppState with the given configuration
    pub fn new(config: Config) -> Result<Self> {
        if config.accept_invalid_certs {
            warn!(
                "UPSTREAM_ACCEPT_INVALID_CERTS is enabled: upstream TLS certificates are NOT verified"
            );
        }

        // No overall timeout: manifests and segments are streamed for as long as they last
        let http_client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| ProxyError::Internal(format!("Failed to create HTTP client: {e}")))?;

        let rate_limiter = (config.rate_limit_rpm > 0).then(|| RateLimiter::new(config.rate_limit_rpm));
        let endpoint = ProxyEndpoint::new(&config.public_base_url, &config.proxy_path);

        Ok(Self {
            config: Arc::new(config),
            http_client,
            endpoint,
            rate_limiter,
            metrics: crate::metrics::init(),
            started_at: Instant::now(),
        })
    }
}

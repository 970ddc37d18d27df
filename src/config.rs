use crate::error::ProxyError;
use crate::hls::resource::RewritePolicy;
use std::env;

/// Default cap on a single unterminated manifest line.
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// Externally reachable base of this proxy, used when building proxied URIs
    pub public_base_url: String,
    /// Route serving the proxy endpoint (always starts with `/`)
    pub proxy_path: String,
    pub is_dev: bool,
    /// Where rewritten manifest references point
    pub rewrite_policy: RewritePolicy,
    /// Skip upstream TLS certificate validation. Security trade-off, off by default.
    pub accept_invalid_certs: bool,
    pub connect_timeout_secs: u64,
    /// User-Agent sent upstream when the client did not send one
    pub default_user_agent: String,
    /// Fixed Referer/Origin for upstream requests; defaults to the upstream's own origin
    pub upstream_referer: Option<String>,
    /// Permit loopback/private IP literals as upstream targets
    pub allow_private_upstreams: bool,
    pub max_line_bytes: usize,
    /// Requests per minute per client IP (0 = disabled)
    pub rate_limit_rpm: u32,
}

impl Config {
    /// Load configuration from environment variables
    /// In DEV mode, provides sensible defaults. In PROD mode, PORT and PUBLIC_BASE_URL are required.
    pub fn from_env() -> Result<Self, ProxyError> {
        let is_dev = env::var("DEV_MODE")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        let port_var = if is_dev {
            env::var("PORT").unwrap_or_else(|_| "3000".to_string())
        } else {
            env::var("PORT")
                .map_err(|_| ProxyError::ConfigError("PORT is required in production".into()))?
        };
        let port: u16 = port_var
            .parse()
            .map_err(|e| ProxyError::ConfigError(format!("PORT: {e}")))?;

        let public_base_url = if is_dev {
            env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| format!("http://localhost:{port}"))
        } else {
            env::var("PUBLIC_BASE_URL").map_err(|_| {
                ProxyError::ConfigError("PUBLIC_BASE_URL is required in production".into())
            })?
        };
        let public_base_url = public_base_url.trim_end_matches('/').to_string();

        let proxy_path = env::var("PROXY_PATH").unwrap_or_else(|_| "/proxy".to_string());
        if !proxy_path.starts_with('/') {
            return Err(ProxyError::ConfigError(format!(
                "PROXY_PATH must start with '/': {proxy_path}"
            )));
        }

        let rewrite_policy = match env::var("REWRITE_POLICY")
            .unwrap_or_else(|_| "proxy".to_string())
            .to_lowercase()
            .as_str()
        {
            "direct" => RewritePolicy::Direct,
            "proxy-manifests" | "proxy_manifests" => RewritePolicy::ProxyManifests,
            _ => RewritePolicy::ProxyAll,
        };

        let accept_invalid_certs = env_flag("UPSTREAM_ACCEPT_INVALID_CERTS", false);

        let connect_timeout_secs = env::var("UPSTREAM_CONNECT_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let default_user_agent =
            env::var("DEFAULT_USER_AGENT").unwrap_or_else(|_| "Mozilla/5.0".to_string());

        let upstream_referer = env::var("UPSTREAM_REFERER").ok().filter(|s| !s.is_empty());

        // Local test streams live on loopback, so dev mode allows them
        let allow_private_upstreams = env_flag("ALLOW_PRIVATE_UPSTREAMS", is_dev);

        let max_line_bytes = env::var("MAX_LINE_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_MAX_LINE_BYTES);

        let rate_limit_rpm = env::var("RATE_LIMIT_RPM")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .unwrap_or(0);

        Ok(Config {
            port,
            public_base_url,
            proxy_path,
            is_dev,
            rewrite_policy,
            accept_invalid_certs,
            connect_timeout_secs,
            default_user_agent,
            upstream_referer,
            allow_private_upstreams,
            max_line_bytes,
            rate_limit_rpm,
        })
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

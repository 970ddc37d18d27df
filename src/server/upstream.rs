//! Upstream request construction and response header handling.
//!
//! One attempt per client request: a failed upstream is reported, never retried.

use crate::config::Config;
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use reqwest::{Client, Response};
use tracing::{debug, warn};
use url::Url;

/// Bytes of a failed upstream body kept for the log line.
const FAILURE_PREVIEW_BYTES: usize = 512;

/// Connection-scoped headers the server regenerates for its own connection.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
];

/// Headers sent upstream: `Accept`, `Referer`, `Origin`, `Host` and `User-Agent`.
///
/// Referer and Origin default to the upstream's own origin; `UPSTREAM_REFERER`
/// pins them for CDNs that check hotlinking.
pub fn request_headers(
    target: &Url,
    client_user_agent: Option<&HeaderValue>,
    config: &Config,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

    let target_origin = target.origin().ascii_serialization();
    let (referer, origin) = match &config.upstream_referer {
        Some(referer) => {
            let origin = Url::parse(referer)
                .map(|u| u.origin().ascii_serialization())
                .unwrap_or_else(|_| referer.trim_end_matches('/').to_string());
            (referer.clone(), origin)
        }
        None => (format!("{target_origin}/"), target_origin),
    };
    insert_str(&mut headers, header::REFERER, &referer);
    insert_str(&mut headers, header::ORIGIN, &origin);

    if let Some(host) = target.host_str() {
        let host = match target.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        insert_str(&mut headers, header::HOST, &host);
    }

    match client_user_agent {
        Some(ua) => {
            headers.insert(header::USER_AGENT, ua.clone());
        }
        None => insert_str(&mut headers, header::USER_AGENT, &config.default_user_agent),
    }

    headers
}

fn insert_str(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(_) => warn!("Skipping upstream header {} with invalid value {:?}", name, value),
    }
}

/// Issue the upstream GET. The body is left unread for streaming.
pub async fn fetch(client: &Client, target: &Url, headers: HeaderMap) -> reqwest::Result<Response> {
    debug!("Fetching upstream {}", target);
    client.get(target.clone()).headers(headers).send().await
}

/// Copy upstream response headers for the client.
///
/// Hop-by-hop headers are dropped; `content-length` is dropped as well when the
/// body is going to be rewritten, since its length changes.
pub fn response_headers(upstream: &HeaderMap, rewriting: bool) -> HeaderMap {
    let mut headers = upstream.clone();
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
    if rewriting {
        headers.remove(header::CONTENT_LENGTH);
    }
    headers
}

/// Read the start of a failed upstream body for diagnostics, then drop the response.
pub async fn failure_preview(mut response: Response) -> String {
    let mut preview = Vec::with_capacity(FAILURE_PREVIEW_BYTES);
    while preview.len() < FAILURE_PREVIEW_BYTES {
        match response.chunk().await {
            Ok(Some(chunk)) => preview.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(e) => {
                debug!("Upstream error body unreadable: {}", e);
                break;
            }
        }
    }
    preview.truncate(FAILURE_PREVIEW_BYTES);
    String::from_utf8_lossy(&preview).replace('\n', "\\n")
}

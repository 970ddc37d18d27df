use crate::{
    error::{ProxyError, Result},
    hls::{LineRewriter, ResourceKind, RewriteStream},
    metrics,
    server::{state::AppState, upstream, url_validation::parse_upstream_url},
};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, header},
    response::Response,
};
use futures_util::TryStreamExt;
use serde::Deserialize;
use std::time::Instant;
use tracing::{error, info, warn};
use url::Url;

#[derive(Debug, Deserialize)]
pub struct ProxyParams {
    url: Option<String>,
}

/// How the upstream body reaches the client, decided before streaming starts.
#[derive(Debug)]
pub enum ForwardPlan {
    /// Binary asset, piped through untouched
    Static,
    /// Manifest, piped through the line rewriter
    Manifest(LineRewriter),
    /// Manifest whose rewriter could not be built; piped through untouched
    RawFallback,
}

impl ForwardPlan {
    pub fn select(kind: ResourceKind, target: &Url, state: &AppState) -> Self {
        if kind == ResourceKind::Static {
            return ForwardPlan::Static;
        }

        match LineRewriter::new(
            target,
            state.config.rewrite_policy,
            state.endpoint.clone(),
            state.config.max_line_bytes,
        ) {
            Ok(rewriter) => ForwardPlan::Manifest(rewriter),
            Err(e) => {
                warn!("Forwarding {} without rewriting: {}", target, e);
                metrics::record_fallback();
                ForwardPlan::RawFallback
            }
        }
    }

    pub fn rewrites(&self) -> bool {
        matches!(self, ForwardPlan::Manifest(_))
    }
}

/// Proxy a playlist or media resource from upstream to the player.
///
/// Manifests are rewritten line by line while streaming so that relative
/// segment, key and variant references resolve (and by default route back
/// through this endpoint). Everything else is streamed through as-is.
pub async fn proxy(
    State(state): State<AppState>,
    Query(params): Query<ProxyParams>,
    headers: HeaderMap,
) -> Result<Response> {
    let start = Instant::now();

    let raw_url = params
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or(ProxyError::MissingUrl)?;
    let target = parse_upstream_url(raw_url, state.config.allow_private_upstreams)?;
    let kind = ResourceKind::of(&target);

    info!("Proxying {} resource: {}", kind.as_str(), target);

    let request_headers =
        upstream::request_headers(&target, headers.get(header::USER_AGENT), &state.config);

    let response = match upstream::fetch(&state.http_client, &target, request_headers).await {
        Ok(response) => response,
        Err(e) => {
            error!("Upstream request to {} failed: {:?}", target, e);
            metrics::record_upstream_error();
            metrics::record_request(kind.as_str(), 500);
            metrics::record_duration(kind.as_str(), start);
            return Err(ProxyError::TransportFailure(e));
        }
    };

    let status = response.status();
    if status.as_u16() >= 400 {
        let upstream_headers = response.headers().clone();
        let preview = upstream::failure_preview(response).await;
        warn!(
            "Upstream {} responded {}; headers: {:?}; body: \"{}\"",
            target, status, upstream_headers, preview
        );
        metrics::record_upstream_error();
        metrics::record_request(kind.as_str(), status.as_u16());
        metrics::record_duration(kind.as_str(), start);
        return Err(ProxyError::UpstreamFailure(status));
    }

    let plan = ForwardPlan::select(kind, &target, &state);
    let response_headers = upstream::response_headers(response.headers(), plan.rewrites());

    let failed_url = target.to_string();
    let upstream_body = Box::pin(response.bytes_stream().inspect_err(move |e| {
        error!("Upstream body for {} failed mid-stream: {}", failed_url, e);
        metrics::record_upstream_error();
    }));

    let body = match plan {
        ForwardPlan::Manifest(rewriter) => {
            info!("Rewriting manifest against base {}", rewriter.base());
            Body::from_stream(RewriteStream::new(upstream_body, rewriter).on_complete(|stats| {
                metrics::record_rewritten_lines(stats.rewritten, stats.failed);
            }))
        }
        ForwardPlan::Static | ForwardPlan::RawFallback => Body::from_stream(upstream_body),
    };

    metrics::record_request(kind.as_str(), status.as_u16());
    metrics::record_duration(kind.as_str(), start);

    let mut out = Response::new(body);
    *out.status_mut() = status;
    *out.headers_mut() = response_headers;
    Ok(out)
}

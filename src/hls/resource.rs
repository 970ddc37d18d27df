//! Resource classification and proxy URL construction.
//!
//! A request target is either a binary asset (segment, key, subtitle, image)
//! that is piped through untouched, or a manifest whose URI lines get rewritten.

use url::{Url, form_urlencoded};

/// File extensions served as raw bytes without manifest rewriting.
pub const STATIC_EXTENSIONS: &[&str] = &[
    // segment containers
    "ts", "m4s", "mp4", "m4a", "m4v", "aac", "mp3", "ac3", "ec3", "cmfv", "cmfa",
    // keys
    "key", "bin",
    // subtitles
    "vtt", "webvtt", "srt", "ttml", "dfxp",
    // thumbnails
    "jpg", "jpeg", "png", "webp",
];

/// What kind of resource a URL names
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    Static,
    Manifest,
}

impl ResourceKind {
    /// Classify by the extension of the last path segment. Query and fragment are ignored.
    pub fn of(url: &Url) -> Self {
        let last = url.path().rsplit('/').next().unwrap_or("");
        match last.rsplit_once('.') {
            Some((_, ext))
                if STATIC_EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext)) =>
            {
                ResourceKind::Static
            }
            _ => ResourceKind::Manifest,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Static => "static",
            ResourceKind::Manifest => "manifest",
        }
    }
}

/// Where rewritten manifest references point
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RewritePolicy {
    /// Every reference is routed back through the proxy
    ProxyAll,
    /// Nested manifests go through the proxy, static assets are fetched directly from upstream
    ProxyManifests,
    /// Relative references become absolute upstream URLs, nothing is proxied
    Direct,
}

/// Builds `{public_base_url}{proxy_path}?url=<encoded>` references.
#[derive(Clone, Debug)]
pub struct ProxyEndpoint {
    prefix: String,
}

impl ProxyEndpoint {
    pub fn new(public_base_url: &str, proxy_path: &str) -> Self {
        Self {
            prefix: format!("{}{}", public_base_url.trim_end_matches('/'), proxy_path),
        }
    }

    /// Wrap an absolute upstream URL so the client fetches it through the proxy.
    pub fn wrap(&self, target: &Url) -> String {
        let encoded: String = form_urlencoded::byte_serialize(target.as_str().as_bytes()).collect();
        format!("{}?url={}", self.prefix, encoded)
    }

    /// True if `reference` already points at this endpoint.
    pub fn owns(&self, reference: &str) -> bool {
        reference
            .strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.starts_with('?'))
    }
}

/// Upstream URL with its final path segment, query and fragment removed.
///
/// Returns `None` for URLs that cannot act as a base (`data:`, `mailto:` ...).
pub fn base_url(upstream: &Url) -> Option<Url> {
    if upstream.cannot_be_a_base() {
        return None;
    }
    upstream.join("./").ok()
}

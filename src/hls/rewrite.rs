//! Incremental M3U8 line rewriting.
//!
//! [`LineRewriter`] is fed upstream chunks as they arrive and hands back every
//! line completed by that chunk, with URI lines resolved against the manifest's
//! base URL. Only the unterminated tail of the stream is buffered between calls.
//!
//! Terminators are preserved byte for byte: a line ending in `\r\n` is emitted
//! with `\r\n`, a final line without a terminator is emitted without one.

use crate::error::{ProxyError, Result};
use crate::hls::resource::{ProxyEndpoint, ResourceKind, RewritePolicy, base_url};
use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};
use url::Url;

/// How a single manifest line is treated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineKind {
    /// `#EXTM3U`, `#EXTINF:...`, comments. Never rewritten.
    Tag,
    Blank,
    /// Anything else names a resource
    Uri,
}

/// Classify a line with its terminator already removed.
pub fn classify(line: &[u8]) -> LineKind {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        LineKind::Blank
    } else if trimmed[0] == b'#' {
        LineKind::Tag
    } else {
        LineKind::Uri
    }
}

/// `scheme://...` references are already absolute and left alone.
fn is_absolute(reference: &str) -> bool {
    match reference.split_once("://") {
        Some((scheme, _)) => {
            let mut chars = scheme.chars();
            chars.next().is_some_and(|c| c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Split `raw` into its content and its `\n` / `\r\n` / `\r` terminator.
fn split_terminator(raw: &[u8]) -> (&[u8], &[u8]) {
    let mut end = raw.len();
    if raw[..end].ends_with(b"\n") {
        end -= 1;
    }
    if raw[..end].ends_with(b"\r") {
        end -= 1;
    }
    raw.split_at(end)
}

/// Per-stream counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RewriteStats {
    pub lines: u64,
    pub rewritten: u64,
    /// URI lines forwarded unchanged because they could not be rewritten
    pub failed: u64,
}

/// Streaming rewriter for one manifest response.
#[derive(Debug)]
pub struct LineRewriter {
    base: Url,
    policy: RewritePolicy,
    endpoint: ProxyEndpoint,
    /// Bytes after the last newline seen. Never contains `\n`.
    pending: BytesMut,
    max_line_bytes: usize,
    /// Inside an overlong line: forward raw until the next newline
    overflow: bool,
    stats: RewriteStats,
}

impl LineRewriter {
    pub fn new(
        upstream: &Url,
        policy: RewritePolicy,
        endpoint: ProxyEndpoint,
        max_line_bytes: usize,
    ) -> Result<Self> {
        let base = base_url(upstream).ok_or_else(|| {
            ProxyError::RewriteFailure(format!("{upstream} cannot be used as a base URL"))
        })?;

        Ok(Self {
            base,
            policy,
            endpoint,
            pending: BytesMut::new(),
            max_line_bytes,
            overflow: false,
            stats: RewriteStats::default(),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn stats(&self) -> RewriteStats {
        self.stats
    }

    /// Feed one upstream chunk; returns every line it completes.
    pub fn process(&mut self, chunk: &[u8]) -> Bytes {
        let mut out = BytesMut::with_capacity(chunk.len() + 128);
        let mut rest = chunk;

        if self.overflow {
            match rest.iter().position(|&b| b == b'\n') {
                Some(nl) => {
                    out.extend_from_slice(&rest[..=nl]);
                    rest = &rest[nl + 1..];
                    self.overflow = false;
                }
                None => {
                    out.extend_from_slice(rest);
                    return out.freeze();
                }
            }
        }

        let Some(last_nl) = rest.iter().rposition(|&b| b == b'\n') else {
            self.pending.extend_from_slice(rest);
            self.spill_overlong(&mut out);
            return out.freeze();
        };

        let (complete, tail) = rest.split_at(last_nl + 1);
        for (idx, piece) in complete.split_inclusive(|&b| b == b'\n').enumerate() {
            if idx == 0 && !self.pending.is_empty() {
                self.pending.extend_from_slice(piece);
                let line = self.pending.split();
                self.emit_line(&line, &mut out);
            } else {
                self.emit_line(piece, &mut out);
            }
        }

        self.pending.extend_from_slice(tail);
        self.spill_overlong(&mut out);
        out.freeze()
    }

    /// End of upstream: emit the unterminated last line, if any.
    pub fn finish(&mut self) -> Bytes {
        self.overflow = false;
        if self.pending.is_empty() {
            return Bytes::new();
        }

        let last = self.pending.split();
        let mut out = BytesMut::with_capacity(last.len() + 128);
        self.emit_line(&last, &mut out);
        out.freeze()
    }

    fn spill_overlong(&mut self, out: &mut BytesMut) {
        // A trailing `\r` may still turn out to be the terminator
        let content_len = self.pending.len() - usize::from(self.pending.ends_with(b"\r"));
        if content_len <= self.max_line_bytes {
            return;
        }

        warn!(
            "Manifest line exceeds {} bytes, forwarding it unchanged",
            self.max_line_bytes
        );
        self.stats.lines += 1;
        out.extend_from_slice(&self.pending.split());
        self.overflow = true;
    }

    fn emit_line(&mut self, raw: &[u8], out: &mut BytesMut) {
        self.stats.lines += 1;
        let (content, terminator) = split_terminator(raw);

        let rewritten = if content.len() > self.max_line_bytes {
            warn!(
                "Manifest line exceeds {} bytes, forwarding it unchanged",
                self.max_line_bytes
            );
            None
        } else if classify(content) == LineKind::Uri {
            self.rewrite_uri(content)
        } else {
            None
        };

        match rewritten {
            Some(line) => {
                self.stats.rewritten += 1;
                out.extend_from_slice(line.as_bytes());
            }
            None => out.extend_from_slice(content),
        }
        out.extend_from_slice(terminator);
    }

    /// Resolve a URI line. `None` means forward it unchanged.
    fn rewrite_uri(&mut self, content: &[u8]) -> Option<String> {
        let reference = match std::str::from_utf8(content) {
            Ok(s) => s.trim(),
            Err(e) => {
                warn!("Manifest line is not valid UTF-8 ({}), forwarding unchanged", e);
                self.stats.failed += 1;
                return None;
            }
        };

        if is_absolute(reference) || self.endpoint.owns(reference) {
            return None;
        }

        let resolved = match self.base.join(reference) {
            Ok(url) => url,
            Err(e) => {
                warn!(
                    "Failed to resolve manifest reference {:?} against {}: {}",
                    reference, self.base, e
                );
                self.stats.failed += 1;
                return None;
            }
        };

        let line = match self.policy {
            RewritePolicy::Direct => resolved.to_string(),
            RewritePolicy::ProxyManifests if ResourceKind::of(&resolved) == ResourceKind::Static => {
                resolved.to_string()
            }
            RewritePolicy::ProxyAll | RewritePolicy::ProxyManifests => self.endpoint.wrap(&resolved),
        };
        debug!("Rewrote {} -> {}", reference, line);
        Some(line)
    }
}

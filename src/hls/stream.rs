//! Stream adapter driving a [`LineRewriter`] from an upstream body.

use crate::hls::rewrite::{LineRewriter, RewriteStats};
use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tracing::debug;

/// Rewrites a manifest body chunk by chunk.
///
/// The upstream is only polled when this stream is polled, so a slow client
/// stalls the upstream read instead of piling up rewritten output. Dropping the
/// stream drops the upstream body and with it the upstream connection.
pub struct RewriteStream<S> {
    upstream: S,
    rewriter: LineRewriter,
    done: bool,
    on_complete: Option<Box<dyn FnOnce(RewriteStats) + Send>>,
}

impl<S> RewriteStream<S> {
    pub fn new(upstream: S, rewriter: LineRewriter) -> Self {
        Self {
            upstream,
            rewriter,
            done: false,
            on_complete: None,
        }
    }

    /// Run `f` with the final counters once the upstream ends cleanly.
    pub fn on_complete(mut self, f: impl FnOnce(RewriteStats) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    fn complete(&mut self) {
        let stats = self.rewriter.stats();
        debug!(
            "Manifest rewrite complete: {} lines, {} rewritten, {} failed",
            stats.lines, stats.rewritten, stats.failed
        );
        if let Some(f) = self.on_complete.take() {
            f(stats);
        }
    }
}

impl<S, E> Stream for RewriteStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            if this.done {
                return Poll::Ready(None);
            }

            match ready!(Pin::new(&mut this.upstream).poll_next(cx)) {
                Some(Ok(chunk)) => {
                    let out = this.rewriter.process(&chunk);
                    if !out.is_empty() {
                        return Poll::Ready(Some(Ok(out)));
                    }
                    // Chunk held no complete line; keep reading
                }
                Some(Err(e)) => {
                    // Partial line is dropped: the response is failing anyway
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    this.done = true;
                    let tail = this.rewriter.finish();
                    this.complete();
                    if !tail.is_empty() {
                        return Poll::Ready(Some(Ok(tail)));
                    }
                    return Poll::Ready(None);
                }
            }
        }
    }
}

//! Prometheus metrics.
//!
//! Recording goes through the `metrics` facade; the exporter is installed once
//! per process and rendered by the `/metrics` handler.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder (first call only) and return its handle.
pub fn init() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            // Another recorder may already be installed (tests); recording then goes there
            let _ = metrics::set_global_recorder(recorder);
            handle
        })
        .clone()
}

/// Count a finished proxy request by resource kind and status.
pub fn record_request(kind: &'static str, status: u16) {
    counter!("hls_relay_requests_total", "kind" => kind, "status" => status.to_string())
        .increment(1);
}

/// Record time from handler entry until the response head is ready.
pub fn record_duration(kind: &'static str, start: Instant) {
    histogram!("hls_relay_request_duration_seconds", "kind" => kind)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_error() {
    counter!("hls_relay_upstream_errors_total").increment(1);
}

pub fn record_fallback() {
    counter!("hls_relay_rewrite_fallbacks_total").increment(1);
}

pub fn record_rewritten_lines(rewritten: u64, failed: u64) {
    counter!("hls_relay_lines_rewritten_total").increment(rewritten);
    counter!("hls_relay_lines_rewrite_failed_total").increment(failed);
}

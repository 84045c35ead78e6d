//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, cache activity, censoring, connections)
//! - Expose a Prometheus-compatible scrape endpoint when enabled
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by outcome
//! - `proxy_cache_lookups_total` (counter): cache lookups by result
//! - `proxy_cache_revalidations_total` (counter): revalidations by result
//! - `proxy_censored_words_total` (counter): words replaced in response bodies
//! - `proxy_active_connections` (gauge): current client connection count
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Labels are static strings so recording never allocates

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Count a finished request. `outcome` is one of `relayed`, `cache_hit`,
/// `bad_gateway`, `invalid` or `aborted`.
pub fn record_request(outcome: &'static str) {
    metrics::counter!("proxy_requests_total", "outcome" => outcome).increment(1);
}

/// Count a cache lookup: `hit`, `miss`, `collision` or `uncacheable`.
pub fn record_cache_lookup(result: &'static str) {
    metrics::counter!("proxy_cache_lookups_total", "result" => result).increment(1);
}

/// Count a revalidation. `result` is `not_modified`, `replaced` or `fail_open`.
pub fn record_revalidation(result: &'static str) {
    metrics::counter!("proxy_cache_revalidations_total", "result" => result).increment(1);
}

pub fn record_censored_words(count: u64) {
    if count > 0 {
        metrics::counter!("proxy_censored_words_total").increment(count);
    }
}

pub fn connection_opened() {
    metrics::gauge!("proxy_active_connections").increment(1.0);
}

pub fn connection_closed() {
    metrics::gauge!("proxy_active_connections").decrement(1.0);
}

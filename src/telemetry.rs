//! Process-wide logging and metrics setup for the CLI.
//!
//! Logs go through a compact `fmt` subscriber filtered by
//! `RUST_LOG` (or the CLI's `--log` default). Metric names used across the
//! crate live here; the Prometheus listener only exists with the
//! `metrics-exporter` feature.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Call once, before anything logs.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[cfg(feature = "metrics-exporter")]
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()?;

    tracing::info!(port, "Prometheus exporter listening on /metrics");
    metrics::gauge!("cryptodash_up").set(1.0);
    Ok(())
}

#[cfg(not(feature = "metrics-exporter"))]
pub fn init_metrics(_port: u16) -> anyhow::Result<()> {
    Ok(())
}

// Metric names shared by the fetchers and feeds.
pub const REST_REQUESTS: &str = "cryptodash_rest_requests_total";
pub const REST_FAILURES: &str = "cryptodash_rest_failures_total";
pub const STREAM_MESSAGES: &str = "cryptodash_stream_messages_total";
pub const STREAM_FAILOVERS: &str = "cryptodash_stream_failovers_total";
pub const PAGE_CACHE_HITS: &str = "cryptodash_page_cache_hits_total";
pub const PAGE_CACHE_MISSES: &str = "cryptodash_page_cache_misses_total";

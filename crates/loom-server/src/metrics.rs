//! Prometheus metrics recorder and `/metrics` endpoint handler.
//!
//! Path-level counters and histograms already exist in
//! `loom-rpc::registry::PathRegistry::dispatch`; the constants here are the
//! connection/subscription/upload-level ones this crate itself records.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global). Must be called once at
/// server startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// Render Prometheus text format from the installed recorder.
#[must_use]
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Connections opened total (counter).
pub const CONNECTIONS_TOTAL: &str = "loom_connections_total";
/// Connections closed total (counter, labels: reason).
pub const DISCONNECTIONS_TOTAL: &str = "loom_disconnections_total";
/// Active connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "loom_connections_active";
/// Subscriptions dropped for falling behind (counter).
pub const SUBSCRIPTION_SLOW_CONSUMER_TOTAL: &str = "loom_subscription_slow_consumer_total";
/// Active subscriptions (gauge).
pub const SUBSCRIPTIONS_ACTIVE: &str = "loom_subscriptions_active";
/// Upload chunks accepted total (counter).
pub const UPLOAD_CHUNKS_TOTAL: &str = "loom_upload_chunks_total";
/// Upload bytes received total (counter).
pub const UPLOAD_BYTES_TOTAL: &str = "loom_upload_bytes_total";
/// SRP handshake failures total (counter, labels: reason).
pub const HANDSHAKE_FAILURES_TOTAL: &str = "loom_handshake_failures_total";

/// Increment a monotonic counter metric by 1.
pub fn counter_inc(name: &'static str) {
    metrics::counter!(name).increment(1);
}

/// Adjust a gauge metric up or down by one (e.g. active-connection counts).
pub fn gauge_step(name: &'static str, up: bool) {
    if up {
        metrics::gauge!(name).increment(1.0);
    } else {
        metrics::gauge!(name).decrement(1.0);
    }
}

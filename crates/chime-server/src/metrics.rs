//! Transport metric names and the Prometheus recorder.
//!
//! The relay engine emits its own counters (see `chime_relay::metrics`);
//! this module covers the WebSocket transport's edge: handshakes,
//! rejections, and per-connection timings. The recorder is installed once
//! by the binary and its handle threaded into the router for `/metrics`.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Handshakes rejected by the authentication gate (counter).
pub const AUTH_REJECTIONS_TOTAL: &str = "chime_auth_rejections_total";
/// WebSocket connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "chime_ws_connections_total";
/// WebSocket connections torn down (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "chime_ws_disconnections_total";
/// Handshakes refused at the connection cap (counter).
pub const WS_CONNECTIONS_REFUSED_TOTAL: &str = "chime_ws_connections_refused_total";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "chime_ws_connection_duration_seconds";
/// Inbound frame dispatch latency in seconds (histogram).
pub const DISPATCH_DURATION_SECONDS: &str = "chime_dispatch_duration_seconds";

/// Install the process-global Prometheus recorder and return its handle.
///
/// # Panics
///
/// Panics if a recorder is already installed; call once at startup.
#[must_use]
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("metrics recorder installed");
    handle
}

/// Render the current metrics in Prometheus text format.
#[must_use]
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

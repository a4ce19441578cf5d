//! Mark-and-sweep heartbeat over the whole registry.
//!
//! Each sweep pass visits every registered connection. One that ponged since
//! the last pass gets its flag reset and a fresh transport ping; one that did
//! not is closed and removed. A silent connection is therefore evicted
//! exactly one interval after the ping it failed to answer, and at worst two
//! intervals after its last pong.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use chime_core::frame::CLOSE_HEARTBEAT_TIMEOUT;

use crate::metrics::HEARTBEAT_EVICTIONS_TOTAL;
use crate::registry::ConnectionRegistry;

/// Counts from one sweep pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Connections pinged this pass.
    pub pinged: usize,
    /// Connections evicted for missing a pong.
    pub evicted: usize,
}

/// Run one sweep pass: evict the silent, ping the rest.
pub async fn sweep_once(registry: &ConnectionRegistry) -> SweepStats {
    let mut stats = SweepStats::default();
    for conn in registry.all().await {
        if conn.check_alive() {
            // Flag is now false; the next pong flips it back.
            let _ = conn.send_ping();
            stats.pinged += 1;
        } else {
            info!(
                session_id = %conn.session_id,
                connection = %conn.id,
                last_pong_ms = conn.last_pong_elapsed().as_millis(),
                "missed heartbeat, evicting connection"
            );
            // Termination rides the cancellation token; the close frame
            // is best-effort and a wedged channel cannot refuse teardown.
            let _ = conn.terminate(CLOSE_HEARTBEAT_TIMEOUT, "heartbeat timeout");
            let _ = registry.remove(&conn.session_id, &conn.id).await;
            counter!(HEARTBEAT_EVICTIONS_TOTAL).increment(1);
            stats.evicted += 1;
        }
    }
    stats
}

/// Periodic sweep loop; runs until cancelled.
pub async fn run_sweeper(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stats = sweep_once(&registry).await;
                if stats.evicted > 0 {
                    debug!(pinged = stats.pinged, evicted = stats.evicted, "heartbeat sweep");
                }
            }
            () = cancel.cancelled() => {
                debug!("heartbeat sweeper stopped");
                return;
            }
        }
    }
}

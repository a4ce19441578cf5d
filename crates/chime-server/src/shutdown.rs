//! Graceful shutdown coordination.
//!
//! A single [`CancellationToken`] fans out to the accept loop and every
//! per-connection session task. [`ShutdownCoordinator::drain`] cancels the
//! token and then waits, up to a grace period, for the spawned tasks to
//! finish on their own.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_GRACE: Duration = Duration::from_secs(30);

/// Shared handle used to request and observe shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// New coordinator in the running state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token for tasks that need to observe cancellation.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel and wait for `handles` to finish, up to the grace period.
    pub async fn drain(&self, handles: Vec<JoinHandle<()>>, grace: Option<Duration>) {
        let grace = grace.unwrap_or(DEFAULT_GRACE);
        self.shutdown();
        info!(
            tasks = handles.len(),
            grace_secs = grace.as_secs(),
            "draining tasks"
        );
        if timeout(grace, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!("grace period elapsed before all tasks finished");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

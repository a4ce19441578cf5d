//! Channel-backed handle for one live client connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use chime_core::{ConnectionId, SessionId, UserId};

/// One unit handed to the connection's socket writer task.
#[derive(Clone, Debug)]
pub enum Transmit {
    /// A serialized JSON frame to deliver as a text message.
    Frame(Arc<String>),
    /// Transport-level liveness probe from the heartbeat sweep.
    Ping,
    /// Close the socket with the given code, then stop writing.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Verified identity attached by the handshake gate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Logical user this connection belongs to.
    pub user_id: UserId,
    /// Role claim from the credential (`"guest"` when the gate is disabled).
    pub role: String,
}

impl Identity {
    /// Identity for a connection that presented no credential.
    #[must_use]
    pub fn guest(user_id: UserId) -> Self {
        Self {
            user_id,
            role: "guest".to_owned(),
        }
    }
}

/// Handle for one admitted connection.
///
/// The registry owns the canonical `Arc`; senders hold clones. All writes go
/// through the bounded channel so a slow client can never block the relay;
/// a refused `try_send` is counted and reported to the caller instead.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Unique per-transport instance id.
    pub id: ConnectionId,
    /// Session this transport serves.
    pub session_id: SessionId,
    /// Identity from the handshake.
    pub identity: Identity,
    /// Channel to the socket writer task.
    tx: mpsc::Sender<Transmit>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether a pong arrived since the last heartbeat sweep.
    is_alive: AtomicBool,
    /// When the last pong (or client ping) was received.
    last_pong: Mutex<Instant>,
    /// Frames refused by a full or closed channel.
    dropped_frames: AtomicU64,
    /// Cancelled when the relay terminates this connection. The session
    /// loop selects on it, so teardown does not depend on the channel.
    cancel: CancellationToken,
}

impl ConnectionHandle {
    /// Create a handle with a fresh connection id.
    pub fn new(session_id: SessionId, identity: Identity, tx: mpsc::Sender<Transmit>) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            session_id,
            identity,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_frames: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    /// User this connection belongs to.
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.identity.user_id
    }

    /// Queue a serialized frame for delivery.
    ///
    /// Returns `false` if the channel is full or closed, incrementing the
    /// dropped-frame counter.
    pub fn send_frame(&self, frame: Arc<String>) -> bool {
        self.transmit(Transmit::Frame(frame))
    }

    /// Queue a transport-level ping.
    pub fn send_ping(&self) -> bool {
        self.transmit(Transmit::Ping)
    }

    /// Ask the writer task to close the socket.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.transmit(Transmit::Close {
            code,
            reason: reason.into(),
        })
    }

    /// Forcibly terminate the connection.
    ///
    /// Queues the close frame when the channel has room and cancels the
    /// termination token regardless, so a wedged channel can refuse the
    /// close frame but never the teardown itself. Returns whether the
    /// close frame was queued.
    pub fn terminate(&self, code: u16, reason: impl Into<String>) -> bool {
        let queued = self.close(code, reason);
        self.cancel.cancel();
        queued
    }

    /// Resolves once the relay has terminated this connection.
    pub fn terminated(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Whether the relay has terminated this connection.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn transmit(&self, item: Transmit) -> bool {
        if self.tx.try_send(item).is_ok() {
            true
        } else {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Whether the writer task is still draining the channel.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Total frames refused by the channel.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Record a pong (or client ping): the transport is alive.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag for the heartbeat sweep.
    ///
    /// Returns `true` if the connection ponged since the last sweep.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

//! The relay engine: admission, lifecycle, and the four send modes.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chime_core::frame::{CLOSE_GOING_AWAY, CLOSE_SUPERSEDED};
use chime_core::{ConnectionId, MessageId, OutboundFrame, SessionId, UserId};

use crate::connection::{ConnectionHandle, Identity, Transmit};
use crate::heartbeat;
use crate::metrics::{
    CONNECTIONS_ACTIVE, CONNECTIONS_SUPERSEDED_TOTAL, FRAMES_DROPPED_TOTAL, FRAMES_SENT_TOTAL,
    OFFLINE_FLUSHED_TOTAL,
};
use crate::queue::{OfflineQueue, QueuedMessage};
use crate::registry::ConnectionRegistry;
use crate::rules::RuleTable;
use crate::tracker::MessageTracker;

/// Tunables for the relay engine.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Interval between heartbeat sweeps.
    pub heartbeat_interval: Duration,
    /// Delay before the canned `voice_command_response` goes out.
    pub command_response_delay: Duration,
    /// Per-session cap on queued offline messages.
    pub offline_queue_limit: usize,
    /// Text carried in the `welcome` frame.
    pub welcome_message: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            command_response_delay: Duration::from_millis(500),
            offline_queue_limit: 256,
            welcome_message: "Connected to notification relay".to_owned(),
        }
    }
}

/// What happened when a connection was admitted.
#[derive(Debug)]
pub struct AdmitOutcome {
    /// The registered handle; the registry holds its own clone.
    pub connection: Arc<ConnectionHandle>,
    /// Tracker id of the `welcome` frame.
    pub welcome_id: MessageId,
    /// Offline messages delivered during admission.
    pub flushed: usize,
    /// Whether a prior connection held this session id and was closed.
    pub superseded: bool,
}

/// The relay engine.
///
/// Owns the registry, message tracker, offline queue, and command rule
/// table. Transports stay outside: admission takes the writer half of a
/// channel, and everything the relay wants written arrives there as
/// [`Transmit`] items.
pub struct RelayService {
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) tracker: MessageTracker,
    pub(crate) queue: OfflineQueue,
    pub(crate) rules: RuleTable,
    pub(crate) config: RelayConfig,
    cancel: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RelayService {
    /// Build a relay with the default marketplace rule table.
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            tracker: MessageTracker::new(),
            queue: OfflineQueue::new(config.offline_queue_limit),
            rules: RuleTable::marketplace(),
            config,
            cancel: CancellationToken::new(),
            sweeper: Mutex::new(None),
        }
    }

    /// Replace the command rule table.
    #[must_use]
    pub fn with_rules(mut self, rules: RuleTable) -> Self {
        self.rules = rules;
        self
    }

    /// Start the heartbeat sweeper. Idempotent; a stopped relay stays
    /// stopped.
    pub fn start(&self) {
        let mut slot = self.sweeper.lock();
        if slot.is_some() || self.cancel.is_cancelled() {
            return;
        }
        info!(
            heartbeat_interval_ms = self.config.heartbeat_interval.as_millis(),
            "relay started"
        );
        *slot = Some(tokio::spawn(heartbeat::run_sweeper(
            self.registry.clone(),
            self.config.heartbeat_interval,
            self.cancel.child_token(),
        )));
    }

    /// Stop the sweeper and close every live connection with `1001`.
    /// Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.sweeper.lock().take();
        let was_running = handle.is_some();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        let remaining = self.registry.all().await;
        for conn in &remaining {
            let _ = conn.terminate(CLOSE_GOING_AWAY, "server shutting down");
            let _ = self.registry.remove(&conn.session_id, &conn.id).await;
        }
        gauge!(CONNECTIONS_ACTIVE).set(0.0);
        if was_running {
            info!(closed = remaining.len(), "relay stopped");
        }
    }

    /// Whether the sweeper is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.sweeper.lock().is_some() && !self.cancel.is_cancelled()
    }

    /// Token cancelled when the relay stops; session tasks select on it.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Admit a connection for a session.
    ///
    /// Registers the handle (closing any prior holder of the session id with
    /// `4000`), sends the tracked `welcome`, then flushes the session's
    /// offline queue in arrival order.
    pub async fn admit(
        &self,
        session_id: SessionId,
        identity: Identity,
        tx: mpsc::Sender<Transmit>,
    ) -> AdmitOutcome {
        let conn = Arc::new(ConnectionHandle::new(session_id, identity, tx));
        let superseded = match self.registry.admit(conn.clone()).await {
            Some(old) => {
                let _ = old.terminate(CLOSE_SUPERSEDED, "session superseded by a new connection");
                counter!(CONNECTIONS_SUPERSEDED_TOTAL).increment(1);
                true
            }
            None => false,
        };
        self.set_active_gauge().await;

        let welcome = OutboundFrame::welcome(&self.config.welcome_message, &conn.session_id);
        let welcome_id = self.send_to_session(&conn.session_id, welcome).await;
        let flushed = self.flush_offline(&conn).await;

        info!(
            session_id = %conn.session_id,
            user_id = %conn.user_id(),
            connection = %conn.id,
            flushed,
            superseded,
            "connection admitted"
        );
        AdmitOutcome {
            connection: conn,
            welcome_id,
            flushed,
            superseded,
        }
    }

    /// Remove a departed connection.
    ///
    /// Identity-aware: a displaced transport's teardown cannot evict the
    /// connection that replaced it.
    pub async fn disconnect(&self, session_id: &SessionId, connection_id: &ConnectionId) {
        if self.registry.remove(session_id, connection_id).await.is_some() {
            debug!(session_id = %session_id, connection = %connection_id, "connection removed");
            self.set_active_gauge().await;
        }
    }

    /// Targeted send to one session, tracked.
    ///
    /// The frame is recorded in the message tracker and its id embedded in
    /// the wire payload. With no live connection, or a refused write, the
    /// serialized frame goes to the offline queue for the session's next
    /// admission.
    pub async fn send_to_session(&self, session_id: &SessionId, frame: OutboundFrame) -> MessageId {
        let message_id = self
            .tracker
            .track(session_id, frame.kind, frame.data.clone())
            .await;
        let frame = frame.with_message_id(message_id.clone());
        let wire = Arc::new(frame.to_json());

        let delivered = match self.registry.get(session_id).await {
            Some(conn) => {
                let ok = conn.send_frame(wire.clone());
                if !ok {
                    warn!(session_id = %session_id, "write refused, queueing offline");
                    counter!(FRAMES_DROPPED_TOTAL).increment(1);
                }
                ok
            }
            None => false,
        };
        if delivered {
            counter!(FRAMES_SENT_TOTAL, "kind" => frame.kind.as_str()).increment(1);
        } else {
            self.queue
                .enqueue(session_id, QueuedMessage::new(message_id.clone(), wire))
                .await;
        }
        message_id
    }

    /// Best-effort fan-out to every live connection of the given users.
    /// Untracked; refused writes are skipped, never queued.
    pub async fn send_to_users(&self, users: &[UserId], frame: &OutboundFrame) -> usize {
        let conns = self.registry.connections_for_users(users).await;
        Self::fan_out(&conns, frame)
    }

    /// Best-effort fan-out to every live connection.
    pub async fn broadcast_all(&self, frame: &OutboundFrame) -> usize {
        let conns = self.registry.all().await;
        Self::fan_out(&conns, frame)
    }

    /// Best-effort fan-out to every live connection except `excluded`'s.
    pub async fn broadcast_except(&self, excluded: &UserId, frame: &OutboundFrame) -> usize {
        let conns = self.registry.all_except(excluded).await;
        Self::fan_out(&conns, frame)
    }

    fn fan_out(conns: &[Arc<ConnectionHandle>], frame: &OutboundFrame) -> usize {
        let wire = Arc::new(frame.to_json());
        let mut delivered = 0;
        for conn in conns {
            if conn.send_frame(wire.clone()) {
                counter!(FRAMES_SENT_TOTAL, "kind" => frame.kind.as_str()).increment(1);
                delivered += 1;
            } else {
                debug!(session_id = %conn.session_id, "fan-out write refused, skipping");
                counter!(FRAMES_DROPPED_TOTAL).increment(1);
            }
        }
        delivered
    }

    /// Deliver the session's queued messages in arrival order.
    ///
    /// A refused write mid-flush puts the undelivered remainder back at the
    /// queue's front, so order survives the next attempt.
    async fn flush_offline(&self, conn: &Arc<ConnectionHandle>) -> usize {
        let pending = self.queue.drain(&conn.session_id).await;
        if pending.is_empty() {
            return 0;
        }
        let total = pending.len();
        let mut delivered = 0;
        let mut iter = pending.into_iter();
        while let Some(message) = iter.next() {
            if conn.send_frame(message.frame.clone()) {
                counter!(OFFLINE_FLUSHED_TOTAL).increment(1);
                delivered += 1;
            } else {
                warn!(
                    session_id = %conn.session_id,
                    delivered,
                    remaining = total - delivered,
                    "flush interrupted, requeueing remainder"
                );
                let mut rest = vec![message];
                rest.extend(iter);
                self.queue.requeue_front(&conn.session_id, rest).await;
                break;
            }
        }
        delivered
    }

    /// Live-connection registry, for health and stats surfaces.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Per-session message tracker.
    #[must_use]
    pub fn tracker(&self) -> &MessageTracker {
        &self.tracker
    }

    /// Offline queue store.
    #[must_use]
    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    /// Engine tunables.
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    async fn set_active_gauge(&self) {
        #[allow(clippy::cast_precision_loss)]
        let count = self.registry.count().await as f64;
        gauge!(CONNECTIONS_ACTIVE).set(count);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

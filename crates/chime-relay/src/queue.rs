//! Per-session FIFO buffer for messages sent while no connection is live.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use tokio::sync::RwLock;
use tracing::warn;

use chime_core::{MessageId, SessionId};

use crate::metrics::{OFFLINE_ENQUEUED_TOTAL, OFFLINE_EVICTED_TOTAL, OFFLINE_QUEUE_DEPTH};

/// One message awaiting delivery.
///
/// The frame is pre-serialized at send time with its tracker id already
/// embedded, so a flushed delivery is byte-identical to the live delivery
/// that would have happened.
#[derive(Clone, Debug)]
pub struct QueuedMessage {
    /// Tracker id of the message.
    pub message_id: MessageId,
    /// Serialized outbound frame.
    pub frame: Arc<String>,
    /// When the message was queued.
    pub queued_at: DateTime<Utc>,
}

impl QueuedMessage {
    /// Wrap a serialized frame for queueing.
    #[must_use]
    pub fn new(message_id: MessageId, frame: Arc<String>) -> Self {
        Self {
            message_id,
            frame,
            queued_at: Utc::now(),
        }
    }
}

/// Offline queues keyed by session id.
///
/// Each queue is capped: enqueueing onto a full queue evicts the oldest
/// entry. Producers never see a backpressure error; stale notifications are
/// the ones that lose value first.
pub struct OfflineQueue {
    inner: RwLock<HashMap<SessionId, VecDeque<QueuedMessage>>>,
    limit: usize,
}

impl OfflineQueue {
    /// Create an empty queue store with the given per-session cap.
    pub fn new(limit: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            limit: limit.max(1),
        }
    }

    /// Append a message to the tail of a session's queue.
    pub async fn enqueue(&self, session_id: &SessionId, message: QueuedMessage) {
        let mut inner = self.inner.write().await;
        let queue = inner.entry(session_id.clone()).or_default();
        if queue.len() >= self.limit {
            if let Some(evicted) = queue.pop_front() {
                warn!(
                    %session_id,
                    message_id = %evicted.message_id,
                    limit = self.limit,
                    "offline queue full, evicting oldest message"
                );
                counter!(OFFLINE_EVICTED_TOTAL).increment(1);
            }
        }
        queue.push_back(message);
        counter!(OFFLINE_ENQUEUED_TOTAL).increment(1);
        Self::update_depth(&inner);
    }

    /// Return and clear a session's queue in FIFO order.
    ///
    /// Draining an absent or empty queue returns an empty vec.
    pub async fn drain(&self, session_id: &SessionId) -> Vec<QueuedMessage> {
        let mut inner = self.inner.write().await;
        let drained = inner
            .remove(session_id)
            .map(Vec::from)
            .unwrap_or_default();
        Self::update_depth(&inner);
        drained
    }

    /// Reinstate undelivered messages at the head, preserving their order.
    ///
    /// Used when the transport dies partway through a flush: the undelivered
    /// tail goes back in front of anything enqueued meanwhile.
    pub async fn requeue_front(&self, session_id: &SessionId, messages: Vec<QueuedMessage>) {
        if messages.is_empty() {
            return;
        }
        let mut inner = self.inner.write().await;
        let queue = inner.entry(session_id.clone()).or_default();
        for message in messages.into_iter().rev() {
            queue.push_front(message);
        }
        Self::update_depth(&inner);
    }

    /// Number of messages queued for one session.
    pub async fn depth(&self, session_id: &SessionId) -> usize {
        self.inner
            .read()
            .await
            .get(session_id)
            .map_or(0, VecDeque::len)
    }

    /// Total queued messages across all sessions.
    pub async fn total_depth(&self) -> usize {
        self.inner.read().await.values().map(VecDeque::len).sum()
    }

    #[allow(clippy::cast_precision_loss)]
    fn update_depth(inner: &HashMap<SessionId, VecDeque<QueuedMessage>>) {
        let depth: usize = inner.values().map(VecDeque::len).sum();
        gauge!(OFFLINE_QUEUE_DEPTH).set(depth as f64);
    }
}

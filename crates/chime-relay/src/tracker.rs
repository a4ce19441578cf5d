//! Per-session log of sent messages with read state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use chime_core::{FrameKind, MessageId, SessionId};

use crate::metrics::{MESSAGES_TRACKED_TOTAL, RECEIPTS_MARKED_TOTAL, RECEIPTS_UNKNOWN_TOTAL};

/// One tracked outbound message.
///
/// The payload is immutable once recorded; only the read flag mutates, and
/// only via a matching read receipt.
#[derive(Clone, Debug)]
pub struct TrackedMessage {
    /// Frame kind that carried this message.
    pub kind: FrameKind,
    /// Payload as sent.
    pub payload: Value,
    /// Whether a read receipt has arrived.
    pub read: bool,
    /// When the message was recorded.
    pub created_at: DateTime<Utc>,
}

/// Message log keyed by (session id, message id).
///
/// Records accumulate for the process lifetime; nothing here expires them.
/// `track` runs synchronously before transmission so the generated id can be
/// embedded in the outbound frame for the client to echo back.
pub struct MessageTracker {
    inner: RwLock<HashMap<SessionId, HashMap<MessageId, TrackedMessage>>>,
}

impl MessageTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Record an outbound message and return its generated id.
    pub async fn track(&self, session_id: &SessionId, kind: FrameKind, payload: Value) -> MessageId {
        let id = MessageId::new();
        let message = TrackedMessage {
            kind,
            payload,
            read: false,
            created_at: Utc::now(),
        };
        let mut inner = self.inner.write().await;
        let _ = inner
            .entry(session_id.clone())
            .or_default()
            .insert(id.clone(), message);
        counter!(MESSAGES_TRACKED_TOTAL, "kind" => kind.as_str()).increment(1);
        id
    }

    /// Set the read flag for a tracked message.
    ///
    /// Returns whether the pair existed. An unknown pair is a no-op observable
    /// only through the log; it never creates a record and never errors.
    /// Marking an already-read message is equally a success.
    pub async fn mark_read(&self, session_id: &SessionId, message_id: &MessageId) -> bool {
        let mut inner = self.inner.write().await;
        match inner.get_mut(session_id).and_then(|m| m.get_mut(message_id)) {
            Some(message) => {
                message.read = true;
                counter!(RECEIPTS_MARKED_TOTAL).increment(1);
                true
            }
            None => {
                debug!(%session_id, %message_id, "read receipt for unknown message, ignoring");
                counter!(RECEIPTS_UNKNOWN_TOTAL).increment(1);
                false
            }
        }
    }

    /// Read flag for a tracked message, if it exists.
    pub async fn is_read(&self, session_id: &SessionId, message_id: &MessageId) -> Option<bool> {
        self.inner
            .read()
            .await
            .get(session_id)
            .and_then(|m| m.get(message_id))
            .map(|m| m.read)
    }

    /// A copy of one tracked message, if it exists.
    pub async fn get(
        &self,
        session_id: &SessionId,
        message_id: &MessageId,
    ) -> Option<TrackedMessage> {
        self.inner
            .read()
            .await
            .get(session_id)
            .and_then(|m| m.get(message_id))
            .cloned()
    }

    /// Number of messages tracked for one session.
    pub async fn session_len(&self, session_id: &SessionId) -> usize {
        self.inner
            .read()
            .await
            .get(session_id)
            .map_or(0, HashMap::len)
    }

    /// Number of sessions with at least one tracked message.
    pub async fn session_count(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Total tracked messages across all sessions.
    pub async fn total(&self) -> usize {
        self.inner.read().await.values().map(HashMap::len).sum()
    }

    /// Tracked messages without a read receipt, across all sessions.
    pub async fn unread_total(&self) -> usize {
        self.inner
            .read()
            .await
            .values()
            .flat_map(HashMap::values)
            .filter(|m| !m.read)
            .count()
    }
}

impl Default for MessageTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sid(s: &str) -> SessionId {
        SessionId::from(s)
    }

    #[tokio::test]
    async fn track_returns_fresh_unread_id() {
        let tracker = MessageTracker::new();
        let id = tracker
            .track(&sid("abc123"), FrameKind::Notification, json!({"n": 1}))
            .await;
        assert_eq!(tracker.is_read(&sid("abc123"), &id).await, Some(false));
        assert_eq!(tracker.session_len(&sid("abc123")).await, 1);
    }

    #[tokio::test]
    async fn tracked_ids_are_unique_within_session() {
        let tracker = MessageTracker::new();
        let a = tracker
            .track(&sid("s"), FrameKind::Notification, json!({}))
            .await;
        let b = tracker
            .track(&sid("s"), FrameKind::Notification, json!({}))
            .await;
        assert_ne!(a, b);
        assert_eq!(tracker.session_len(&sid("s")).await, 2);
    }

    #[tokio::test]
    async fn mark_read_flips_flag() {
        let tracker = MessageTracker::new();
        let id = tracker
            .track(&sid("s"), FrameKind::VoiceCommandResponse, json!({}))
            .await;
        assert!(tracker.mark_read(&sid("s"), &id).await);
        assert_eq!(tracker.is_read(&sid("s"), &id).await, Some(true));
    }

    #[tokio::test]
    async fn mark_read_is_idempotent() {
        let tracker = MessageTracker::new();
        let id = tracker
            .track(&sid("s"), FrameKind::Notification, json!({}))
            .await;
        assert!(tracker.mark_read(&sid("s"), &id).await);
        assert!(tracker.mark_read(&sid("s"), &id).await);
        assert_eq!(tracker.is_read(&sid("s"), &id).await, Some(true));
    }

    #[tokio::test]
    async fn mark_read_unknown_id_is_noop() {
        let tracker = MessageTracker::new();
        let _ = tracker
            .track(&sid("s"), FrameKind::Notification, json!({}))
            .await;
        assert!(!tracker.mark_read(&sid("s"), &MessageId::from("ghost")).await);
        // No record was created for the unknown id.
        assert_eq!(tracker.session_len(&sid("s")).await, 1);
        assert!(tracker.is_read(&sid("s"), &MessageId::from("ghost")).await.is_none());
    }

    #[tokio::test]
    async fn mark_read_wrong_session_is_noop() {
        let tracker = MessageTracker::new();
        let id = tracker
            .track(&sid("mine"), FrameKind::Notification, json!({}))
            .await;
        assert!(!tracker.mark_read(&sid("theirs"), &id).await);
        // The real record is untouched and no session was conjured up.
        assert_eq!(tracker.is_read(&sid("mine"), &id).await, Some(false));
        assert_eq!(tracker.session_len(&sid("theirs")).await, 0);
    }

    #[tokio::test]
    async fn payload_is_preserved() {
        let tracker = MessageTracker::new();
        let id = tracker
            .track(
                &sid("s"),
                FrameKind::VoiceCommandResponse,
                json!({"response": "Your RFQ list"}),
            )
            .await;
        let message = tracker.get(&sid("s"), &id).await.unwrap();
        assert_eq!(message.kind, FrameKind::VoiceCommandResponse);
        assert_eq!(message.payload["response"], "Your RFQ list");
        assert!(!message.read);
    }

    #[tokio::test]
    async fn totals_span_sessions() {
        let tracker = MessageTracker::new();
        let a = tracker
            .track(&sid("s1"), FrameKind::Notification, json!({}))
            .await;
        let _ = tracker
            .track(&sid("s2"), FrameKind::Notification, json!({}))
            .await;
        let _ = tracker
            .track(&sid("s2"), FrameKind::Welcome, json!({}))
            .await;
        assert_eq!(tracker.total().await, 3);
        assert_eq!(tracker.session_count().await, 2);
        assert_eq!(tracker.unread_total().await, 3);

        let _ = tracker.mark_read(&sid("s1"), &a).await;
        assert_eq!(tracker.unread_total().await, 2);
    }
}

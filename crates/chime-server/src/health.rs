//! Liveness endpoint payload.

use std::time::Instant;

use serde::Serialize;

use chime_relay::RelayService;

/// Snapshot returned by `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process is serving.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live WebSocket connections.
    pub connections: usize,
    /// Sessions with at least one tracked message.
    pub sessions: usize,
    /// Messages parked for offline sessions.
    pub queued_messages: usize,
    /// Messages with read-receipt tracking.
    pub tracked_messages: usize,
}

/// Collect the current health snapshot from the relay's counters.
pub async fn health_snapshot(started_at: Instant, relay: &RelayService) -> HealthResponse {
    HealthResponse {
        status: "ok".to_string(),
        uptime_secs: started_at.elapsed().as_secs(),
        connections: relay.registry().count().await,
        sessions: relay.tracker().session_count().await,
        queued_messages: relay.queue().total_depth().await,
        tracked_messages: relay.tracker().total().await,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc;

    use chime_core::{FrameKind, OutboundFrame, SessionId, UserId};
    use chime_relay::{Identity, RelayConfig, RelayService, Transmit};

    fn relay() -> RelayService {
        RelayService::new(RelayConfig::default())
    }

    fn notification(text: &str) -> OutboundFrame {
        OutboundFrame::new(FrameKind::Notification, json!({ "text": text }))
    }

    #[tokio::test]
    async fn reports_ok() {
        let relay = relay();
        let health = health_snapshot(Instant::now(), &relay).await;
        assert_eq!(health.status, "ok");
    }

    #[tokio::test]
    async fn fresh_start_is_zeroed() {
        let relay = relay();
        let health = health_snapshot(Instant::now(), &relay).await;
        assert_eq!(health.uptime_secs, 0);
        assert_eq!(health.connections, 0);
        assert_eq!(health.sessions, 0);
        assert_eq!(health.queued_messages, 0);
        assert_eq!(health.tracked_messages, 0);
    }

    #[tokio::test]
    async fn uptime_reflects_elapsed_time() {
        let relay = relay();
        let started = Instant::now()
            .checked_sub(Duration::from_secs(90))
            .expect("clock far enough from epoch");
        let health = health_snapshot(started, &relay).await;
        assert!(health.uptime_secs >= 90);
    }

    #[tokio::test]
    async fn counts_connections_and_tracked_messages() {
        let relay = relay();
        let session = SessionId::from("phone-1");
        let (tx, _rx) = mpsc::channel::<Transmit>(8);
        let _ = relay
            .admit(session.clone(), Identity::guest(UserId::new()), tx)
            .await;
        let _ = relay
            .send_to_session(&session, notification("rfq update"))
            .await;

        let health = health_snapshot(Instant::now(), &relay).await;
        assert_eq!(health.connections, 1);
        assert_eq!(health.sessions, 1);
        // Welcome frame plus the notification, both tracked.
        assert_eq!(health.tracked_messages, 2);
        assert_eq!(health.queued_messages, 0);
    }

    #[tokio::test]
    async fn counts_queued_messages_for_offline_sessions() {
        let relay = relay();
        let offline = SessionId::from("phone-offline");
        let _ = relay
            .send_to_session(&offline, notification("while you were out"))
            .await;

        let health = health_snapshot(Instant::now(), &relay).await;
        assert_eq!(health.connections, 0);
        assert_eq!(health.queued_messages, 1);
    }

    #[tokio::test]
    async fn serializes_expected_shape() {
        let relay = relay();
        let health = health_snapshot(Instant::now(), &relay).await;
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json.get("uptime_secs").is_some());
        assert!(json.get("connections").is_some());
        assert!(json.get("sessions").is_some());
        assert!(json.get("queued_messages").is_some());
        assert!(json.get("tracked_messages").is_some());
    }
}

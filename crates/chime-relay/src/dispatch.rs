//! Inbound frame dispatch.
//!
//! One entry point, [`RelayService::handle_frame`], takes the raw text of a
//! client frame and routes it by `type`. Malformed and unknown frames are
//! logged and dropped; the connection always stays open.

use std::sync::Arc;

use metrics::counter;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use chime_core::frame::{InboundFrame, ReadReceiptPayload, VoiceCommandPayload, now_ms};
use chime_core::{FrameKind, OutboundFrame, SessionId};

use crate::metrics::{
    COMMANDS_TOTAL, FRAMES_MALFORMED_TOTAL, FRAMES_RECEIVED_TOTAL, FRAMES_UNKNOWN_TOTAL,
};
use crate::service::RelayService;

impl RelayService {
    /// Dispatch one inbound text frame from a session's socket.
    #[instrument(skip(self, text), fields(session_id = %session_id))]
    pub async fn handle_frame(self: &Arc<Self>, session_id: &SessionId, text: &str) {
        counter!(FRAMES_RECEIVED_TOTAL).increment(1);
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                counter!(FRAMES_MALFORMED_TOTAL).increment(1);
                return;
            }
        };
        let Some(kind) = frame.known_kind() else {
            warn!(kind = %frame.kind, "dropping frame of unknown type");
            counter!(FRAMES_UNKNOWN_TOTAL).increment(1);
            return;
        };
        match kind {
            FrameKind::Ping => self.handle_ping(session_id).await,
            FrameKind::ReadReceipt => self.handle_read_receipt(frame.data).await,
            FrameKind::VoiceCommand => self.handle_voice_command(session_id, frame.data).await,
            other => {
                // Outbound-only tag echoed back by a confused client.
                debug!(kind = %other, "dropping outbound-tagged frame from client");
                counter!(FRAMES_UNKNOWN_TOTAL).increment(1);
            }
        }
    }

    /// Reply to an application-level `ping` with a direct, untracked `pong`.
    ///
    /// Deliberately leaves the liveness flag alone: liveness rides the
    /// protocol-level ping/pong, not the JSON frames.
    async fn handle_ping(&self, session_id: &SessionId) {
        let Some(conn) = self.registry.get(session_id).await else {
            debug!("ping from session with no live connection");
            return;
        };
        let pong = OutboundFrame::pong(now_ms());
        let _ = conn.send_frame(Arc::new(pong.to_json()));
    }

    /// Mark a tracked message read.
    ///
    /// The payload names its own target session; the socket the receipt
    /// arrived on does not constrain it. Unknown ids are a logged no-op.
    async fn handle_read_receipt(&self, data: Value) {
        let payload: ReadReceiptPayload = match serde_json::from_value(data) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(error = %e, "dropping read_receipt with invalid payload");
                return;
            }
        };
        if self
            .tracker
            .mark_read(&payload.session_id, &payload.message_id)
            .await
        {
            debug!(
                message_id = %payload.message_id,
                target_session = %payload.session_id,
                "message marked read"
            );
        }
    }

    /// Acknowledge a voice command now, answer it after the configured delay.
    async fn handle_voice_command(self: &Arc<Self>, session_id: &SessionId, data: Value) {
        let payload: VoiceCommandPayload = match serde_json::from_value(data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "voice_command with invalid payload");
                if let Some(conn) = self.registry.get(session_id).await {
                    let reply = OutboundFrame::error("voice_command requires a string `command`");
                    let _ = conn.send_frame(Arc::new(reply.to_json()));
                }
                return;
            }
        };

        let ack = OutboundFrame::command_received(&payload.command);
        let _ = self.send_to_session(session_id, ack).await;

        let relay = Arc::clone(self);
        let session = session_id.clone();
        let cancel = self.shutdown_token();
        let delay = self.config.command_response_delay;
        let _ = tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => return,
            }
            let hit = relay.rules.classify(&payload.command);
            counter!(COMMANDS_TOTAL, "rule" => hit.rule.to_owned()).increment(1);
            debug!(session_id = %session, rule = hit.rule, "voice command classified");
            let reply = OutboundFrame::command_response(&payload.command, hit.response, now_ms());
            let _ = relay.send_to_session(&session, reply).await;
        });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

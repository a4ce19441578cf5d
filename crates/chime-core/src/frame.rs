//! The JSON frame schema exchanged over the relay's WebSocket.
//!
//! Every frame is a JSON object tagged with a `type` field and carrying a
//! `data` payload. Inbound frames keep the tag as a raw string so unknown
//! types survive parsing (the dispatcher logs and drops them); outbound
//! frames use the [`FrameKind`] enum for compile-time exhaustiveness and an
//! optional `messageId` echoed back by read receipts.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::ids::{MessageId, SessionId};

// ── Close codes ──────────────────────────────────────────────────────────────

/// Handshake refused: missing, malformed, or expired credential.
pub const CLOSE_AUTH_FAILURE: u16 = 1008;
/// Handshake refused: the server is at its connection cap.
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;
/// Server-initiated close during graceful shutdown.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// A newer connection claimed this session id.
pub const CLOSE_SUPERSEDED: u16 = 4000;
/// Evicted by the liveness sweep after a missed pong.
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4001;

// ── Frame kinds ──────────────────────────────────────────────────────────────

/// All frame type discriminators on the wire.
///
/// Each variant serializes to the exact snake_case string clients send and
/// expect back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameKind {
    // -- Inbound --
    /// Application-level liveness probe; answered with `pong`.
    #[serde(rename = "ping")]
    Ping,
    /// Client acknowledgment that a tracked message was seen.
    #[serde(rename = "read_receipt")]
    ReadReceipt,
    /// Free-text command routed through the rule table.
    #[serde(rename = "voice_command")]
    VoiceCommand,

    // -- Outbound --
    /// First frame after admission; carries the session id.
    #[serde(rename = "welcome")]
    Welcome,
    /// Reply to `ping` with the server timestamp.
    #[serde(rename = "pong")]
    Pong,
    /// Immediate acknowledgment of a received command.
    #[serde(rename = "voice_command_received")]
    VoiceCommandReceived,
    /// Delayed canned response produced by the rule table.
    #[serde(rename = "voice_command_response")]
    VoiceCommandResponse,
    /// Recoverable per-frame failure reported to the client.
    #[serde(rename = "error")]
    Error,
    /// Domain notification pushed by producers.
    #[serde(rename = "notification")]
    Notification,
}

/// All frame kinds in definition order, for iteration in tests.
pub const ALL_FRAME_KINDS: [FrameKind; 9] = [
    FrameKind::Ping,
    FrameKind::ReadReceipt,
    FrameKind::VoiceCommand,
    FrameKind::Welcome,
    FrameKind::Pong,
    FrameKind::VoiceCommandReceived,
    FrameKind::VoiceCommandResponse,
    FrameKind::Error,
    FrameKind::Notification,
];

impl FrameKind {
    /// Return the canonical wire string (e.g. `"read_receipt"`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::ReadReceipt => "read_receipt",
            Self::VoiceCommand => "voice_command",
            Self::Welcome => "welcome",
            Self::Pong => "pong",
            Self::VoiceCommandReceived => "voice_command_received",
            Self::VoiceCommandResponse => "voice_command_response",
            Self::Error => "error",
            Self::Notification => "notification",
        }
    }

    /// Whether frames of this kind are recorded in the message tracker and
    /// carry a `messageId`.
    #[must_use]
    pub fn is_tracked(self) -> bool {
        matches!(
            self,
            Self::Welcome
                | Self::VoiceCommandReceived
                | Self::VoiceCommandResponse
                | Self::Notification
        )
    }

    /// Whether this kind arrives from clients.
    #[must_use]
    pub fn is_inbound(self) -> bool {
        matches!(self, Self::Ping | Self::ReadReceipt | Self::VoiceCommand)
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrameKind {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_FRAME_KINDS
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| FrameError::UnknownKind(s.to_owned()))
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Failures while decoding an inbound frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The text was not a JSON object with a string `type` field.
    #[error("malformed frame: {0}")]
    Parse(#[from] serde_json::Error),
    /// The `type` string names no known frame kind.
    #[error("unknown frame kind: {0}")]
    UnknownKind(String),
}

// ── Inbound ──────────────────────────────────────────────────────────────────

/// Raw inbound envelope, parsed before dispatch.
///
/// The tag stays a `String` so the dispatcher can log-and-drop unknown types
/// instead of failing the whole parse.
#[derive(Clone, Debug, Deserialize)]
pub struct InboundFrame {
    /// The `type` discriminant as sent by the client.
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload; defaults to `null` when the client omits it.
    #[serde(default)]
    pub data: Value,
}

impl InboundFrame {
    /// Parse one inbound text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(text)?)
    }

    /// The known [`FrameKind`] for this tag, if any.
    #[must_use]
    pub fn known_kind(&self) -> Option<FrameKind> {
        self.kind.parse().ok()
    }
}

/// `read_receipt` payload.
///
/// The session id is part of the payload, not implied by the connection: the
/// receipt targets whichever session's tracker holds the message.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptPayload {
    /// Id of the tracked message being acknowledged.
    pub message_id: MessageId,
    /// Session whose tracker owns the message.
    pub session_id: SessionId,
}

/// `voice_command` payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VoiceCommandPayload {
    /// Free-text command to classify.
    pub command: String,
}

// ── Outbound ─────────────────────────────────────────────────────────────────

/// Outgoing frame pushed to a client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboundFrame {
    /// Frame type tag.
    #[serde(rename = "type")]
    pub kind: FrameKind,
    /// Payload object.
    pub data: Value,
    /// Tracker id, present exactly on tracked kinds.
    #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
}

impl OutboundFrame {
    /// Build a frame with no tracker id.
    #[must_use]
    pub fn new(kind: FrameKind, data: Value) -> Self {
        Self {
            kind,
            data,
            message_id: None,
        }
    }

    /// Attach the tracker id embedded in the wire frame.
    #[must_use]
    pub fn with_message_id(mut self, id: MessageId) -> Self {
        self.message_id = Some(id);
        self
    }

    /// Build the post-admission `welcome` frame.
    #[must_use]
    pub fn welcome(message: &str, session_id: &SessionId) -> Self {
        Self::new(
            FrameKind::Welcome,
            json!({ "message": message, "sessionId": session_id.as_str() }),
        )
    }

    /// Build a `pong` reply carrying the server timestamp (epoch ms).
    #[must_use]
    pub fn pong(timestamp_ms: i64) -> Self {
        Self::new(FrameKind::Pong, json!({ "timestamp": timestamp_ms }))
    }

    /// Build the immediate `voice_command_received` acknowledgment.
    #[must_use]
    pub fn command_received(command: &str) -> Self {
        Self::new(FrameKind::VoiceCommandReceived, json!({ "command": command }))
    }

    /// Build the delayed `voice_command_response`.
    #[must_use]
    pub fn command_response(original: &str, response: &str, timestamp_ms: i64) -> Self {
        Self::new(
            FrameKind::VoiceCommandResponse,
            json!({
                "originalCommand": original,
                "response": response,
                "timestamp": timestamp_ms,
            }),
        )
    }

    /// Build an `error` frame for a recoverable per-frame failure.
    #[must_use]
    pub fn error(message: &str) -> Self {
        Self::new(FrameKind::Error, json!({ "message": message }))
    }

    /// Serialize to the wire string.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            // Value payloads with string keys cannot fail to serialize.
            format!(r#"{{"type":"error","data":{{"message":"serialization failed: {e}"}}}}"#)
        })
    }
}

/// Current wall-clock time as epoch milliseconds, as carried in `pong` and
/// `voice_command_response` payloads.
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── FrameKind ───────────────────────────────────────────────────

    #[test]
    fn kind_serializes_to_wire_string() {
        for kind in ALL_FRAME_KINDS {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn kind_roundtrip_from_string() {
        for kind in ALL_FRAME_KINDS {
            let parsed: FrameKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn unknown_kind_string_errors() {
        let err = "rpc_call".parse::<FrameKind>().unwrap_err();
        assert!(matches!(err, FrameError::UnknownKind(s) if s == "rpc_call"));
    }

    #[test]
    fn tracked_kinds() {
        assert!(FrameKind::Welcome.is_tracked());
        assert!(FrameKind::VoiceCommandReceived.is_tracked());
        assert!(FrameKind::VoiceCommandResponse.is_tracked());
        assert!(FrameKind::Notification.is_tracked());
        assert!(!FrameKind::Pong.is_tracked());
        assert!(!FrameKind::Error.is_tracked());
        assert!(!FrameKind::Ping.is_tracked());
    }

    #[test]
    fn inbound_kinds() {
        assert!(FrameKind::Ping.is_inbound());
        assert!(FrameKind::ReadReceipt.is_inbound());
        assert!(FrameKind::VoiceCommand.is_inbound());
        assert!(!FrameKind::Welcome.is_inbound());
        assert!(!FrameKind::Notification.is_inbound());
    }

    // ── InboundFrame ────────────────────────────────────────────────

    #[test]
    fn parse_ping() {
        let frame = InboundFrame::parse(r#"{"type": "ping"}"#).unwrap();
        assert_eq!(frame.kind, "ping");
        assert_eq!(frame.known_kind(), Some(FrameKind::Ping));
        assert!(frame.data.is_null());
    }

    #[test]
    fn parse_voice_command() {
        let frame =
            InboundFrame::parse(r#"{"type": "voice_command", "data": {"command": "show rfqs"}}"#)
                .unwrap();
        assert_eq!(frame.known_kind(), Some(FrameKind::VoiceCommand));
        let payload: VoiceCommandPayload = serde_json::from_value(frame.data).unwrap();
        assert_eq!(payload.command, "show rfqs");
    }

    #[test]
    fn parse_read_receipt_payload_is_camel_case() {
        let frame = InboundFrame::parse(
            r#"{"type": "read_receipt", "data": {"messageId": "m1", "sessionId": "abc123"}}"#,
        )
        .unwrap();
        let payload: ReadReceiptPayload = serde_json::from_value(frame.data).unwrap();
        assert_eq!(payload.message_id.as_str(), "m1");
        assert_eq!(payload.session_id.as_str(), "abc123");
    }

    #[test]
    fn parse_unknown_type_keeps_tag() {
        let frame = InboundFrame::parse(r#"{"type": "subscribe", "data": {}}"#).unwrap();
        assert_eq!(frame.kind, "subscribe");
        assert!(frame.known_kind().is_none());
    }

    #[test]
    fn parse_rejects_malformed_json() {
        let err = InboundFrame::parse("not json at all").unwrap_err();
        assert!(matches!(err, FrameError::Parse(_)));
    }

    #[test]
    fn parse_rejects_missing_type() {
        let err = InboundFrame::parse(r#"{"data": {}}"#).unwrap_err();
        assert!(matches!(err, FrameError::Parse(_)));
    }

    // ── OutboundFrame wire fixtures ─────────────────────────────────

    #[test]
    fn welcome_wire_format() {
        let frame = OutboundFrame::welcome("connected", &SessionId::from("abc123"));
        let v: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(v["type"], "welcome");
        assert_eq!(v["data"]["message"], "connected");
        assert_eq!(v["data"]["sessionId"], "abc123");
        assert!(v.get("messageId").is_none());
    }

    #[test]
    fn pong_wire_format() {
        let frame = OutboundFrame::pong(1_700_000_000_123);
        let v: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(v["type"], "pong");
        assert_eq!(v["data"]["timestamp"], 1_700_000_000_123_i64);
    }

    #[test]
    fn command_response_wire_format() {
        let frame = OutboundFrame::command_response("show rfqs", "Your RFQ list: 3 open", 42)
            .with_message_id(MessageId::from("m-7"));
        let v: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(v["type"], "voice_command_response");
        assert_eq!(v["data"]["originalCommand"], "show rfqs");
        assert_eq!(v["data"]["response"], "Your RFQ list: 3 open");
        assert_eq!(v["data"]["timestamp"], 42);
        assert_eq!(v["messageId"], "m-7");
    }

    #[test]
    fn message_id_omitted_when_absent() {
        let frame = OutboundFrame::error("bad payload");
        assert!(!frame.to_json().contains("messageId"));
    }

    #[test]
    fn outbound_roundtrip() {
        let frame = OutboundFrame::new(FrameKind::Notification, json!({"rfqId": "rfq_9"}))
            .with_message_id(MessageId::from("m1"));
        let back: OutboundFrame = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(back.kind, FrameKind::Notification);
        assert_eq!(back.data["rfqId"], "rfq_9");
        assert_eq!(back.message_id.unwrap().as_str(), "m1");
    }

    #[test]
    fn now_ms_is_positive_and_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(a > 0);
        assert!(b >= a);
    }
}

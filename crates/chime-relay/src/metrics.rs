//! Relay metric name constants, shared by every emission site.

/// Frames delivered to a live connection (counter, labels: mode).
pub const FRAMES_SENT_TOTAL: &str = "chime_frames_sent_total";
/// Frames refused by a full or closed channel (counter, labels: mode).
pub const FRAMES_DROPPED_TOTAL: &str = "chime_frames_dropped_total";
/// Inbound frames handled (counter, labels: kind).
pub const FRAMES_RECEIVED_TOTAL: &str = "chime_frames_received_total";
/// Inbound frames that failed to parse (counter).
pub const FRAMES_MALFORMED_TOTAL: &str = "chime_frames_malformed_total";
/// Inbound frames with an unknown type tag (counter).
pub const FRAMES_UNKNOWN_TOTAL: &str = "chime_frames_unknown_total";
/// Messages recorded by the tracker (counter, labels: kind).
pub const MESSAGES_TRACKED_TOTAL: &str = "chime_messages_tracked_total";
/// Read receipts that matched a tracked message (counter).
pub const RECEIPTS_MARKED_TOTAL: &str = "chime_receipts_marked_total";
/// Read receipts naming an unknown message (counter).
pub const RECEIPTS_UNKNOWN_TOTAL: &str = "chime_receipts_unknown_total";
/// Messages appended to an offline queue (counter).
pub const OFFLINE_ENQUEUED_TOTAL: &str = "chime_offline_enqueued_total";
/// Messages flushed from an offline queue on reconnect (counter).
pub const OFFLINE_FLUSHED_TOTAL: &str = "chime_offline_flushed_total";
/// Messages evicted from a full offline queue (counter).
pub const OFFLINE_EVICTED_TOTAL: &str = "chime_offline_evicted_total";
/// Total messages currently queued across all sessions (gauge).
pub const OFFLINE_QUEUE_DEPTH: &str = "chime_offline_queue_depth";
/// Voice commands classified (counter, labels: rule).
pub const COMMANDS_TOTAL: &str = "chime_commands_total";
/// Connections evicted by the heartbeat sweep (counter).
pub const HEARTBEAT_EVICTIONS_TOTAL: &str = "chime_heartbeat_evictions_total";
/// Connections displaced by a session re-admission (counter).
pub const CONNECTIONS_SUPERSEDED_TOTAL: &str = "chime_connections_superseded_total";
/// Live connections in the registry (gauge).
pub const CONNECTIONS_ACTIVE: &str = "chime_connections_active";

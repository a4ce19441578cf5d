//! # chime-relay
//!
//! The transport-agnostic relay engine. A [`RelayService`] owns four
//! explicit stores (connection registry, message tracker, offline queue,
//! command rule table) and exposes the operations the WebSocket layer
//! drives:
//!
//! - **Admission**: register a connection, displace any prior holder of the
//!   session id, send the welcome frame, flush the offline queue in FIFO order
//! - **Dispatch**: route inbound frames by `type` (ping, read receipts,
//!   delayed voice-command responses; unknown types are dropped)
//! - **Sending**: session-targeted delivery with offline fallback, plus
//!   best-effort user fan-out and broadcasts
//! - **Liveness**: a mark-and-sweep heartbeat that pings every connection
//!   and evicts the ones that missed a pong
//!
//! The engine never touches sockets: connections are [`ConnectionHandle`]s
//! backed by a bounded channel that some writer task drains, which is what
//! keeps the whole crate testable without a network.

#![deny(unsafe_code)]

pub mod connection;
pub mod dispatch;
pub mod heartbeat;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod rules;
pub mod service;
pub mod tracker;

pub use connection::{ConnectionHandle, Identity, Transmit};
pub use queue::{OfflineQueue, QueuedMessage};
pub use registry::ConnectionRegistry;
pub use rules::{CommandRule, RuleTable};
pub use service::{AdmitOutcome, RelayConfig, RelayService};
pub use tracker::MessageTracker;

//! # chime-server
//!
//! Axum HTTP + `WebSocket` transport for the chime relay.
//!
//! - `GET /ws`: handshake gate (bearer JWT), admission into the relay, and
//!   the per-connection session loop
//! - `GET /health`: liveness snapshot of the relay's counters
//! - `GET /metrics`: Prometheus text format from the installed recorder
//! - Layered configuration: defaults, JSON settings file, `CHIME_*` env vars
//! - Graceful shutdown via `CancellationToken` (sockets closed with `1001`)

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod session;
pub mod shutdown;

pub use auth::{AuthError, AuthGate};
pub use config::{ConfigError, ServerConfig};
pub use server::ChimeServer;
pub use shutdown::ShutdownCoordinator;

//! # chime-core
//!
//! Shared vocabulary for the chime notification relay.
//!
//! This crate is the zero-IO leaf every other chime crate depends on:
//!
//! - **Branded IDs**: `SessionId`, `UserId`, `MessageId`, `ConnectionId` as
//!   newtypes so a session id can never be passed where a message id belongs
//! - **Frames**: the JSON wire schema exchanged over the WebSocket — inbound
//!   envelope, typed payloads, outbound builder, and the `FrameKind` tag enum
//! - **Close codes**: the policy close codes the relay uses when it refuses
//!   or evicts a connection

#![deny(unsafe_code)]

pub mod frame;
pub mod ids;

pub use frame::{FrameError, FrameKind, InboundFrame, OutboundFrame};
pub use ids::{ConnectionId, MessageId, SessionId, UserId};

//! Branded ID newtypes for the relay's join keys.
//!
//! The relay joins three in-memory stores (registry, tracker, offline queue)
//! on string identifiers. Each identifier gets its own newtype so a
//! `MessageId` can never be handed to an API expecting a `SessionId`.
//!
//! Generated IDs are UUID v7 (time-ordered) via [`uuid::Uuid::now_v7`];
//! session and user ids may also arrive from clients as arbitrary strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate a fresh UUID v7 string (time-ordered).
fn generate() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(generate())
            }

            /// Wrap an externally supplied string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Identifier for one logical connection lifetime; client-supplied via
    /// the handshake query string or generated when absent. The join key
    /// across registry, tracker, and offline queue.
    SessionId
}

branded_id! {
    /// Logical user identity; several sessions (devices) may share one.
    UserId
}

branded_id! {
    /// Identifier for one tracked outbound message, echoed back by read
    /// receipts.
    MessageId
}

branded_id! {
    /// Identifier for one transport instance. Distinguishes reconnects that
    /// reuse a session id, so removal never evicts a replacement connection.
    ConnectionId
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

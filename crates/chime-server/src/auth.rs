//! Handshake authentication gate.
//!
//! When a shared secret is configured the gate is *required*: every
//! connection must present a bearer token (query param or `Authorization`
//! header) that verifies as an HS256 JWT carrying `sub`, `role`, and `exp`
//! claims. Verification is fail-closed; any missing, malformed, expired, or
//! wrong-key token is rejected and the transport closes the socket with
//! close code `1008`.
//!
//! Without a secret the gate is *disabled*: the caller-supplied `user_id`
//! query param (or a generated anonymous id) becomes the identity, with the
//! `"guest"` role.

use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use chime_core::UserId;
use chime_relay::Identity;

/// Bearer token verification failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token was presented but the gate requires one.
    #[error("missing bearer credential")]
    MissingCredential,
    /// The token's `exp` claim is in the past.
    #[error("bearer credential expired")]
    Expired,
    /// The token failed signature or structural validation.
    #[error("invalid bearer credential: {0}")]
    Invalid(String),
}

/// Claims carried by an accepted bearer token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: becomes the connection's user id.
    pub sub: String,
    /// Role label passed through to the identity.
    pub role: String,
    /// Expiry as a Unix timestamp (seconds).
    pub exp: u64,
}

struct Verifier {
    key: DecodingKey,
    validation: Validation,
}

/// The handshake gate. Holds the verifier when a secret is configured.
pub struct AuthGate {
    verifier: Option<Verifier>,
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("required", &self.is_required())
            .finish_non_exhaustive()
    }
}

impl AuthGate {
    /// Gate that requires a valid HS256 token signed with `secret`.
    #[must_use]
    pub fn required(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // No clock leeway: an expired token is rejected immediately.
        validation.leeway = 0;
        Self {
            verifier: Some(Verifier {
                key: DecodingKey::from_secret(secret.as_bytes()),
                validation,
            }),
        }
    }

    /// Gate that admits everyone as a guest.
    #[must_use]
    pub fn disabled() -> Self {
        Self { verifier: None }
    }

    /// Build a gate from an optional secret. Empty strings count as absent.
    #[must_use]
    pub fn from_secret(secret: Option<&str>) -> Self {
        match secret {
            Some(s) if !s.is_empty() => Self::required(s),
            _ => Self::disabled(),
        }
    }

    /// Whether connections must present a token.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.verifier.is_some()
    }

    /// Resolve the identity for a handshake.
    ///
    /// `bearer` is the presented token, if any; `user_id` is the caller's
    /// claimed id, honored only when the gate is disabled.
    pub fn authenticate(
        &self,
        bearer: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Identity, AuthError> {
        match &self.verifier {
            Some(verifier) => {
                let token = bearer.ok_or(AuthError::MissingCredential)?;
                let data = decode::<Claims>(token, &verifier.key, &verifier.validation)
                    .map_err(|err| match err.kind() {
                        ErrorKind::ExpiredSignature => AuthError::Expired,
                        _ => AuthError::Invalid(err.to_string()),
                    })?;
                Ok(Identity {
                    user_id: UserId::from_string(data.claims.sub),
                    role: data.claims.role,
                })
            }
            None => {
                let user_id = user_id
                    .filter(|id| !id.is_empty())
                    .map_or_else(UserId::new, UserId::from);
                Ok(Identity::guest(user_id))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

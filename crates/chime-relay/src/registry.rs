//! Live-connection registry keyed by session id.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use chime_core::{ConnectionId, SessionId, UserId};

use crate::connection::ConnectionHandle;

/// Tracks every admitted connection.
///
/// Two indexes: the primary map keyed by session id (at most one connection
/// per session at any instant) and a user index for fan-out to all of one
/// user's devices. Both are updated together under one write lock.
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    by_session: HashMap<SessionId, Arc<ConnectionHandle>>,
    by_user: HashMap<UserId, HashSet<SessionId>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Register a connection, displacing any prior holder of its session id.
    ///
    /// The displaced handle is returned so the caller can close its
    /// transport; the registry itself never writes to sockets.
    pub async fn admit(&self, conn: Arc<ConnectionHandle>) -> Option<Arc<ConnectionHandle>> {
        let session_id = conn.session_id.clone();
        let user_id = conn.user_id().clone();
        let mut inner = self.inner.write().await;
        let _ = inner
            .by_user
            .entry(user_id.clone())
            .or_default()
            .insert(session_id.clone());
        let displaced = inner.by_session.insert(session_id.clone(), conn);
        if let Some(ref old) = displaced {
            debug!(
                session_id = %old.session_id,
                old_connection = %old.id,
                "session re-admitted, prior connection displaced"
            );
            if *old.user_id() != user_id {
                Self::unindex(&mut inner.by_user, old.user_id(), &session_id);
            }
        }
        displaced
    }

    /// Remove a connection on transport close.
    ///
    /// Identity-aware: removes only when the registered connection is the
    /// named instance, so a displaced transport's close can never evict the
    /// connection that replaced it.
    pub async fn remove(
        &self,
        session_id: &SessionId,
        connection_id: &ConnectionId,
    ) -> Option<Arc<ConnectionHandle>> {
        let mut inner = self.inner.write().await;
        match inner.by_session.get(session_id) {
            Some(current) if current.id == *connection_id => {
                let removed = inner.by_session.remove(session_id)?;
                Self::unindex(&mut inner.by_user, removed.user_id(), session_id);
                Some(removed)
            }
            _ => None,
        }
    }

    fn unindex(by_user: &mut HashMap<UserId, HashSet<SessionId>>, user: &UserId, session: &SessionId) {
        if let Some(sessions) = by_user.get_mut(user) {
            let _ = sessions.remove(session);
            if sessions.is_empty() {
                let _ = by_user.remove(user);
            }
        }
    }

    /// The live connection for a session, if any.
    pub async fn get(&self, session_id: &SessionId) -> Option<Arc<ConnectionHandle>> {
        self.inner.read().await.by_session.get(session_id).cloned()
    }

    /// Live connections for each of the given users (multi-device fan-out).
    pub async fn connections_for_users(&self, users: &[UserId]) -> Vec<Arc<ConnectionHandle>> {
        let inner = self.inner.read().await;
        let mut out = Vec::new();
        for user in users {
            if let Some(sessions) = inner.by_user.get(user) {
                out.extend(
                    sessions
                        .iter()
                        .filter_map(|s| inner.by_session.get(s).cloned()),
                );
            }
        }
        out
    }

    /// Every live connection.
    pub async fn all(&self) -> Vec<Arc<ConnectionHandle>> {
        self.inner.read().await.by_session.values().cloned().collect()
    }

    /// Every live connection not belonging to `excluded`.
    pub async fn all_except(&self, excluded: &UserId) -> Vec<Arc<ConnectionHandle>> {
        self.inner
            .read()
            .await
            .by_session
            .values()
            .filter(|c| c.user_id() != excluded)
            .cloned()
            .collect()
    }

    /// Number of live connections.
    pub async fn count(&self) -> usize {
        self.inner.read().await.by_session.len()
    }

    /// Number of distinct users with at least one live connection.
    pub async fn user_count(&self) -> usize {
        self.inner.read().await.by_user.len()
    }

    /// Session ids of every live connection.
    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.inner.read().await.by_session.keys().cloned().collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! Axum router, handshake gate, and server lifecycle.
//!
//! `GET /ws` upgrades and then applies the admission policy in order:
//! shutdown check, capacity check, authentication. Refusals close the
//! already-upgraded socket with the policy close code so clients can tell
//! "come back later" (`1013`) apart from "fix your credential" (`1008`).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use chime_core::SessionId;
use chime_core::frame::{CLOSE_AUTH_FAILURE, CLOSE_GOING_AWAY, CLOSE_TRY_AGAIN_LATER};
use chime_relay::RelayService;

use crate::auth::AuthGate;
use crate::config::ServerConfig;
use crate::health::{HealthResponse, health_snapshot};
use crate::metrics::{AUTH_REJECTIONS_TOTAL, WS_CONNECTIONS_REFUSED_TOTAL};
use crate::session::run_ws_session;
use crate::shutdown::ShutdownCoordinator;

/// Query parameters accepted by `GET /ws`.
#[derive(Debug, Deserialize)]
struct WsQuery {
    /// Session to join; omitted means a fresh generated id.
    session_id: Option<String>,
    /// Bearer token, for clients that cannot set headers.
    token: Option<String>,
    /// Claimed user id, honored only when the gate is disabled.
    user_id: Option<String>,
}

#[derive(Clone)]
struct AppState {
    relay: Arc<RelayService>,
    gate: Arc<AuthGate>,
    shutdown: Arc<ShutdownCoordinator>,
    started_at: Instant,
    metrics: PrometheusHandle,
    max_connections: usize,
    max_message_bytes: usize,
}

/// The relay server: router assembly plus lifecycle.
pub struct ChimeServer {
    config: ServerConfig,
    relay: Arc<RelayService>,
    gate: Arc<AuthGate>,
    shutdown: Arc<ShutdownCoordinator>,
    started_at: Instant,
    metrics: PrometheusHandle,
}

impl ChimeServer {
    /// Assemble a server from configuration and a metrics handle.
    #[must_use]
    pub fn new(config: ServerConfig, metrics: PrometheusHandle) -> Self {
        let relay = Arc::new(RelayService::new(config.relay_config()));
        let gate = Arc::new(AuthGate::from_secret(config.auth.secret.as_deref()));
        Self {
            config,
            relay,
            gate,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            started_at: Instant::now(),
            metrics,
        }
    }

    /// Build the axum router with all routes and state.
    #[must_use]
    pub fn router(&self) -> Router {
        let state = AppState {
            relay: self.relay.clone(),
            gate: self.gate.clone(),
            shutdown: self.shutdown.clone(),
            started_at: self.started_at,
            metrics: self.metrics.clone(),
            max_connections: self.config.max_connections,
            max_message_bytes: self.config.max_message_bytes,
        };
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task's
    /// join handle. The relay's heartbeat sweeper starts here.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        self.relay.start();

        let app = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(err) = serve.await {
                error!(error = %err, "server error");
            }
        });
        info!(%addr, auth_required = self.gate.is_required(), "listening");
        Ok((addr, handle))
    }

    /// Stop the relay (closing live sockets with `1001`) and the accept
    /// loop. Idempotent.
    pub async fn stop(&self) {
        // Close frames must be queued before session tasks observe the
        // cancelled token and tear down.
        self.relay.stop().await;
        self.shutdown.shutdown();
    }

    /// The relay engine behind this server.
    #[must_use]
    pub fn relay(&self) -> &Arc<RelayService> {
        &self.relay
    }

    /// The configuration this server was built with.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The shutdown coordinator for this server.
    #[must_use]
    pub fn shutdown_coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }
}

async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let bearer = query.token.clone().or_else(|| {
        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(ToOwned::to_owned)
    });
    ws.max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| accept_socket(socket, state, query, bearer))
}

/// Admission policy, applied after the upgrade so refusals carry a close
/// code instead of an opaque HTTP error.
async fn accept_socket(
    socket: WebSocket,
    state: AppState,
    query: WsQuery,
    bearer: Option<String>,
) {
    if state.shutdown.is_shutting_down() {
        close_socket(socket, CLOSE_GOING_AWAY, "server shutting down").await;
        return;
    }

    if state.relay.registry().count().await >= state.max_connections {
        counter!(WS_CONNECTIONS_REFUSED_TOTAL).increment(1);
        warn!(
            max_connections = state.max_connections,
            "connection refused at capacity"
        );
        close_socket(socket, CLOSE_TRY_AGAIN_LATER, "server at capacity").await;
        return;
    }

    let identity = match state
        .gate
        .authenticate(bearer.as_deref(), query.user_id.as_deref())
    {
        Ok(identity) => identity,
        Err(err) => {
            counter!(AUTH_REJECTIONS_TOTAL).increment(1);
            warn!(error = %err, "handshake rejected");
            close_socket(socket, CLOSE_AUTH_FAILURE, "authentication failed").await;
            return;
        }
    };

    let session_id = query
        .session_id
        .filter(|id| !id.is_empty())
        .map_or_else(SessionId::new, SessionId::from_string);

    run_ws_session(
        socket,
        session_id,
        identity,
        state.relay.clone(),
        state.shutdown.token(),
    )
    .await;
}

async fn close_socket(mut socket: WebSocket, code: u16, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health_snapshot(state.started_at, &state.relay).await)
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    crate::metrics::render(&state.metrics)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Per-connection WebSocket session loop.
//!
//! The socket splits into a writer task draining the connection's
//! [`Transmit`] channel and an inbound loop feeding the relay's dispatcher.
//! All policy lives in the relay; this module only moves frames and
//! reports liveness. Covered end to end by the crate's integration tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use chime_core::SessionId;
use chime_relay::{Identity, RelayService, Transmit};

use crate::metrics::{
    DISPATCH_DURATION_SECONDS, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// Capacity of the per-connection outbound channel. A client that falls
/// this far behind starts losing frames (counted by the relay).
const SEND_BUFFER: usize = 1024;

/// How long teardown waits for the writer to flush queued frames,
/// including any close frame, before aborting it.
const FLUSH_GRACE: Duration = Duration::from_secs(1);

/// Drive one admitted connection until the client leaves, the relay closes
/// it, or shutdown begins.
#[instrument(skip_all, fields(session_id = %session_id))]
pub async fn run_ws_session(
    socket: WebSocket,
    session_id: SessionId,
    identity: Identity,
    relay: Arc<RelayService>,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Transmit>(SEND_BUFFER);

    // Admission queues the welcome and any offline backlog before the
    // writer starts draining, so the client sees them in arrival order.
    let outcome = relay.admit(session_id, identity, send_tx).await;
    let conn = outcome.connection;
    counter!(WS_CONNECTIONS_TOTAL).increment(1);

    let mut writer = tokio::spawn(async move {
        while let Some(item) = send_rx.recv().await {
            match item {
                Transmit::Frame(frame) => {
                    let message = Message::Text(frame.as_str().into());
                    if ws_tx.send(message).await.is_err() {
                        break;
                    }
                }
                Transmit::Ping => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                Transmit::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    let _ = ws_tx.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
    });

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            // Relay-initiated teardown (eviction, supersession, stop) rides
            // the connection's token; a full send channel cannot veto it.
            () = conn.terminated() => break,
            () = shutdown.cancelled() => break,
        };
        let Some(Ok(msg)) = msg else { break };
        match msg {
            Message::Text(text) => {
                dispatch_timed(&relay, &conn.session_id, text.as_str()).await;
            }
            Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => dispatch_timed(&relay, &conn.session_id, text).await,
                Err(_) => info!("skipping non-UTF-8 binary message"),
            },
            Message::Ping(_) | Message::Pong(_) => conn.mark_alive(),
            Message::Close(_) => {
                info!("client closed");
                break;
            }
        }
    }

    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(conn.age().as_secs_f64());
    info!(
        user_id = %conn.user_id(),
        duration_secs = conn.age().as_secs(),
        "websocket closed"
    );

    relay.disconnect(&conn.session_id, &conn.id).await;
    // Dropping the handle closes the channel; the writer exits after its
    // final frame (a relay-initiated close included) reaches the socket.
    drop(conn);
    if tokio::time::timeout(FLUSH_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
}

async fn dispatch_timed(relay: &Arc<RelayService>, session_id: &SessionId, text: &str) {
    let started = Instant::now();
    relay.handle_frame(session_id, text).await;
    histogram!(DISPATCH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

//! `WebSocket` handler for real-time registry streaming.
//!
//! Clients connect to `GET /ws/nodes`. The current snapshot is sent
//! immediately, then one JSON text frame per snapshot the change publisher
//! broadcasts. A client that falls behind skips the lagged snapshots and
//! resumes from the newest one, which carries the full registry anyway.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use meshgate_types::RegistrySnapshot;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::state::AppState;

/// Upgrade an HTTP request to a `WebSocket` connection and begin
/// streaming registry snapshots.
///
/// # Route
///
/// `GET /ws/nodes`
pub async fn ws_nodes(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws(socket, state))
}

/// Serialize and send one snapshot. Returns `false` once the client is gone.
async fn send_snapshot(socket: &mut WebSocket, snapshot: &RegistrySnapshot) -> bool {
    let json = match serde_json::to_string(snapshot) {
        Ok(j) => j,
        Err(e) => {
            warn!(version = snapshot.version, "Failed to serialize snapshot: {e}");
            return true;
        }
    };
    socket.send(Message::Text(json.into())).await.is_ok()
}

async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    // Subscribe before the initial read so no change falls in between.
    let mut rx = state.subscribe();
    let initial = state.registry.snapshot();
    debug!(version = initial.version, "WebSocket client connected");

    if !send_snapshot(&mut socket, &initial).await {
        debug!("WebSocket client disconnected (initial send failed)");
        return;
    }
    let mut last_sent = initial.version;

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(snapshot) => {
                        // Already covered by the initial snapshot.
                        if snapshot.version <= last_sent {
                            continue;
                        }
                        if !send_snapshot(&mut socket, &snapshot).await {
                            debug!("WebSocket client disconnected (send failed)");
                            return;
                        }
                        last_sent = snapshot.version;
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "WebSocket client lagged, skipping ahead");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Snapshot channel closed, shutting down WebSocket");
                        return;
                    }
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client disconnected");
                        return;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!("WebSocket client disconnected (pong failed)");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {e}");
                        return;
                    }
                    _ => {}
                }
            }
        }
    }
}

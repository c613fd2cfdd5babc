//! Observer server startup helper for the gateway binary.
//!
//! [`spawn_observer`] binds the listener eagerly, so a port clash is
//! reported at startup, then serves on a background task until the
//! shared cancellation token fires.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::server::{ServerConfig, ServerError, serve};
use crate::state::AppState;

/// Bind the Observer listener and serve it on a background Tokio task.
///
/// The returned handle completes once `cancel` fires and in-flight
/// requests have drained.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address is invalid or already
/// in use.
pub async fn spawn_observer(
    config: &ServerConfig,
    state: Arc<AppState>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, ServerError> {
    let addr = config.addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {addr}: {e}")))?;

    let handle = tokio::spawn(async move {
        if let Err(e) = serve(listener, state, cancel).await {
            tracing::error!(error = %e, "Observer server exited with error");
        }
    });

    tracing::info!(%addr, "Observer server spawned on background task");
    Ok(handle)
}

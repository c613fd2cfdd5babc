//! Shared application state for the Observer API server.
//!
//! [`AppState`] bundles the handles the gateway binary already built: the
//! registry for REST reads, the change publisher's broadcast sender for
//! `WebSocket` streaming, the session slot for status reports and the
//! command gateway for outbound requests.

use std::sync::Arc;

use meshgate_core::{CommandGateway, Registry, SessionHandle};
use meshgate_types::RegistrySnapshot;
use tokio::sync::broadcast;

/// Shared state available to all handlers via Axum's `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The live node registry.
    pub registry: Arc<Registry>,
    /// Snapshot broadcast fed by the change publisher.
    pub tx: broadcast::Sender<Arc<RegistrySnapshot>>,
    /// Supervisor session slot.
    pub session: Arc<SessionHandle>,
    /// Outbound command path.
    pub commands: CommandGateway,
}

impl AppState {
    /// Assemble state from the gateway's components.
    pub const fn new(
        registry: Arc<Registry>,
        tx: broadcast::Sender<Arc<RegistrySnapshot>>,
        session: Arc<SessionHandle>,
        commands: CommandGateway,
    ) -> Self {
        Self {
            registry,
            tx,
            session,
            commands,
        }
    }

    /// Subscribe to published snapshots.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RegistrySnapshot>> {
        self.tx.subscribe()
    }
}

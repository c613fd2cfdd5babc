//! REST API endpoint handlers for the Observer server.
//!
//! Reads are served from a fresh [`Registry`](meshgate_core::Registry)
//! snapshot; the command endpoint goes through the
//! [`CommandGateway`](meshgate_core::CommandGateway).
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Liveness probe |
//! | `GET` | `/api/nodes` | All known nodes keyed by id |
//! | `GET` | `/api/nodes/{id}` | One node |
//! | `GET` | `/api/status` | Broker connection state and registry size |
//! | `POST` | `/api/request-location` | Ask a node to report its position |

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use meshgate_types::{Command, ConnectionState, NodeId, NodeView, RegistrySnapshot};
use serde::{Deserialize, Serialize};

use crate::error::ObserverError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

/// Body of `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `ok` while the server answers.
    pub status: String,
}

/// Body of `GET /api/status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Broker session state.
    pub connection: ConnectionState,
    /// Current registry version.
    pub version: u64,
    /// Number of known nodes.
    pub nodes: usize,
}

/// Body accepted by `POST /api/request-location`.
#[derive(Debug, Deserialize)]
pub struct LocationRequest {
    /// Target node.
    pub node_id: String,
}

/// Body returned by `POST /api/request-location` on success.
#[derive(Debug, Serialize, Deserialize)]
pub struct LocationRequested {
    /// Always `ok`.
    pub status: String,
    /// Node the request was sent to.
    pub requested: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Liveness probe.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: String::from("ok"),
    })
}

/// List every known node as `{ node_id: { name, fields, ... } }`.
pub async fn list_nodes(State(state): State<Arc<AppState>>) -> Json<RegistrySnapshot> {
    Json(state.registry.snapshot())
}

/// Get a single node by id.
pub async fn get_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<NodeView>, ObserverError> {
    state
        .registry
        .get(&NodeId::new(id.clone()))
        .map(Json)
        .ok_or_else(|| ObserverError::NotFound(format!("node {id} not found")))
}

/// Broker connection state plus registry counters.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        connection: state.session.state(),
        version: state.registry.version(),
        nodes: state.registry.len(),
    })
}

/// Publish a position request to one node.
///
/// Fails fast with `503` while the broker session is down; nothing is
/// queued for later delivery.
pub async fn request_location(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LocationRequest>,
) -> Result<Json<LocationRequested>, ObserverError> {
    let node_id = NodeId::new(body.node_id.trim());
    if node_id.as_str().is_empty() {
        return Err(ObserverError::BadRequest(String::from("node_id is required")));
    }

    state
        .commands
        .request(&node_id, &Command::RequestPosition)
        .await
        .inspect_err(|e| tracing::warn!(node_id = %node_id, error = %e, "location request failed"))?;

    Ok(Json(LocationRequested {
        status: String::from("ok"),
        requested: node_id.to_string(),
    }))
}

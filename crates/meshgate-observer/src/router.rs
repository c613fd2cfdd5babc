//! Axum router construction for the Observer API.
//!
//! Assembles all routes (REST + `WebSocket`) into a single [`Router`]
//! with CORS middleware enabled for cross-origin dashboard access.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router for the Observer server.
///
/// The router includes:
/// - `GET /health` -- liveness probe
/// - `GET /ws/nodes` -- `WebSocket` snapshot stream
/// - `GET /api/nodes` -- all nodes
/// - `GET /api/nodes/{id}` -- single node
/// - `GET /api/status` -- connection state and registry counters
/// - `POST /api/request-location` -- position request to one node
///
/// CORS allows any origin; the dashboard is served from elsewhere.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        // WebSocket
        .route("/ws/nodes", get(ws::ws_nodes))
        // REST API
        .route("/api/nodes", get(handlers::list_nodes))
        .route("/api/nodes/{id}", get(handlers::get_node))
        .route("/api/status", get(handlers::status))
        .route("/api/request-location", post(handlers::request_location))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

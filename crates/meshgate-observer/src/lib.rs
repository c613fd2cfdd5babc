//! Observer API server for the Meshgate gateway.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **`WebSocket` endpoint** (`/ws/nodes`) streaming registry snapshots
//!   published by the [`ChangePublisher`]
//! - **REST endpoints** for the current node registry and the broker
//!   connection status
//! - **Command endpoint** (`POST /api/request-location`) that asks a node
//!   to report its position through the [`CommandGateway`]
//!
//! # Architecture
//!
//! REST reads take a snapshot straight from the shared [`Registry`], which
//! only holds its lock for the copy. `WebSocket` clients first receive the
//! current snapshot, then every snapshot the publisher broadcasts; slow
//! clients skip ahead to the newest one.
//!
//! [`ChangePublisher`]: meshgate_core::ChangePublisher
//! [`CommandGateway`]: meshgate_core::CommandGateway
//! [`Registry`]: meshgate_core::Registry

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod startup;
pub mod state;
pub mod ws;

pub use error::ObserverError;
pub use router::build_router;
pub use server::{ServerConfig, ServerError, start_server};
pub use startup::spawn_observer;
pub use state::AppState;

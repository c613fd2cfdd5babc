//! Ingestion and reconciliation engine for the Meshgate telemetry gateway.
//!
//! The gateway subscribes to a message broker carrying mesh radio traffic,
//! decodes every message into a normalized event, merges it into an
//! in-memory node registry and fans registry changes out to observers. It
//! also publishes commands back to individual nodes.
//!
//! ```text
//! broker -> SessionSupervisor -> IngestPipeline -> Decoder -> Registry
//!                                       |                       |
//!                                PersistenceSink          ChangePublisher -> observers
//!
//! caller -> CommandGateway -> SessionHandle (live session) -> broker
//! ```
//!
//! # Modules
//!
//! - [`config`] -- YAML configuration with environment overrides
//! - [`error`] -- Transport boundary errors
//! - [`proto`] -- Binary envelope schema
//! - [`decoder`] -- JSON / protobuf message decoder
//! - [`registry`] -- Sticky-merge node registry with a version counter
//! - [`persistence`] -- Storage trait and non-blocking sink
//! - [`ingest`] -- Decode, merge and persist pipeline
//! - [`session`] -- Transport session traits
//! - [`nats`] -- NATS session implementation
//! - [`supervisor`] -- Reconnect state machine and live session slot
//! - [`publisher`] -- Periodic snapshot broadcaster
//! - [`command`] -- Outbound command gateway

pub mod command;
pub mod config;
pub mod decoder;
pub mod error;
pub mod ingest;
pub mod nats;
pub mod persistence;
pub mod proto;
pub mod publisher;
pub mod registry;
pub mod session;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use command::{CommandError, CommandGateway};
pub use config::{ConfigError, GatewayConfig};
pub use decoder::{DecodeError, Decoder};
pub use error::{ConnectError, PublishError, TransportError};
pub use ingest::IngestPipeline;
pub use nats::{NatsConnector, NatsSession};
pub use persistence::{NodeStore, NoopStore, PersistOp, PersistenceError, PersistenceSink, StoredNode};
pub use publisher::ChangePublisher;
pub use registry::{ApplyOutcome, NodeState, Registry};
pub use session::{Connector, InboundMessage, MessageStream, Session};
pub use supervisor::{Backoff, ConnectedSession, SessionHandle, SessionSupervisor};

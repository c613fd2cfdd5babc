//! `PostgreSQL` persistence for the Meshgate telemetry gateway.
//!
//! The gateway keeps its registry in memory; this crate gives it a memory
//! across restarts. Node identities and positions are upserted into a
//! `nodes` table and every non-command message is appended to an `events`
//! history table.
//!
//! ```text
//! IngestPipeline --> PersistenceSink (queue) --> PgNodeStore --> PostgreSQL
//!                                                   |-- nodes  (identity + last position)
//!                                                   +-- events (append-only raw history)
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`node_store`] -- [`NodeStore`](meshgate_core::NodeStore) implementation
//! - [`error`] -- Shared error types

pub mod error;
pub mod node_store;
pub mod postgres;

pub use error::DbError;
pub use node_store::{NodeRow, PgNodeStore};
pub use postgres::{PostgresConfig, PostgresPool};

//! Shared type definitions for the Meshgate telemetry gateway.
//!
//! This crate is the single source of truth for the types that cross crate
//! boundaries: the normalized [`Event`] produced by the decoder, the
//! read-only registry views handed to observers, outbound [`Command`]s and
//! the supervisor's [`ConnectionState`]. Types flow to `TypeScript` via
//! `ts-rs` for the map dashboard.
//!
//! # Modules
//!
//! - [`ids`] -- Node identity
//! - [`event`] -- Normalized ingestion events and scalar field values
//! - [`node`] -- Registry snapshots
//! - [`command`] -- Outbound commands
//! - [`status`] -- Transport connection state

pub mod command;
pub mod event;
pub mod ids;
pub mod node;
pub mod status;

pub use command::Command;
pub use event::{Event, EventKind, FieldValue, Fields, field_names};
pub use ids::{GATEWAY_SELF_ID, NodeId};
pub use node::{NodeView, RegistrySnapshot, display_name};
pub use status::ConnectionState;

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation.

    #[test]
    fn export_bindings() {
        use ts_rs::TS;

        let _ = crate::ids::NodeId::export_all();
        let _ = crate::event::FieldValue::export_all();
        let _ = crate::event::EventKind::export_all();
        let _ = crate::node::NodeView::export_all();
        let _ = crate::command::Command::export_all();
        let _ = crate::status::ConnectionState::export_all();
    }
}

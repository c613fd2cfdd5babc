//! Read-only views of the node registry.
//!
//! The registry hands these out to observers; they are plain clones and
//! carry no link back to the live state.

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use ts_rs::TS;

use crate::event::{Fields, field_names};
use crate::ids::NodeId;

/// Derive the name shown for a node: long name, else short name, else id.
pub fn display_name(id: &NodeId, fields: &Fields) -> String {
    [field_names::LONG_NAME, field_names::SHORT_NAME]
        .iter()
        .filter_map(|key| fields.get(*key))
        .filter(|v| !v.is_absent())
        .find_map(|v| v.as_str().map(str::to_owned))
        .unwrap_or_else(|| id.to_string())
}

/// Point-in-time copy of one registry entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct NodeView {
    /// Node identity. Carried as the map key on the wire.
    #[serde(skip_serializing)]
    pub id: NodeId,
    /// Derived display name.
    pub name: String,
    /// Accumulated fields.
    pub fields: Fields,
    /// First time the node was heard.
    pub first_seen: DateTime<Utc>,
    /// Last time a message from the node changed its state.
    pub last_seen: DateTime<Utc>,
    /// Per-node revision counter.
    pub version: u64,
}

/// A consistent copy of the whole registry at one version.
///
/// Serializes as `{ "<node_id>": { "name": ..., "fields": ..., ... } }`,
/// ordered by node id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrySnapshot {
    /// Registry version the snapshot was taken at.
    pub version: u64,
    /// Nodes ordered by id.
    pub nodes: Vec<NodeView>,
}

impl RegistrySnapshot {
    /// Look up a node by id.
    pub fn get(&self, id: &NodeId) -> Option<&NodeView> {
        self.nodes
            .binary_search_by(|n| n.id.cmp(id))
            .ok()
            .and_then(|idx| self.nodes.get(idx))
    }

    /// Number of nodes in the snapshot.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the snapshot holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Serialize for RegistrySnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.nodes.len()))?;
        for node in &self.nodes {
            map.serialize_entry(node.id.as_str(), node)?;
        }
        map.end()
    }
}

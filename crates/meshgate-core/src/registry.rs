//! In-memory node registry.
//!
//! The registry is the single source of truth for everything the gateway
//! knows about the mesh. It is written by exactly one task (the ingest
//! pipeline) and read by many (the change publisher, HTTP handlers), so it
//! sits behind a [`std::sync::RwLock`] that is held for one call at a time
//! and never across an `.await`.
//!
//! # Merge rule
//!
//! Merges are sticky: the last non-absent value wins per field and absent
//! values (`null`, empty text) never erase what is stored. Latitude and
//! longitude are treated as a pair and only written when both are present
//! and at least one of them moved.
//!
//! # Versioning
//!
//! A global version counter is bumped on every mutating merge and mirrored
//! in an [`AtomicU64`] so that [`Registry::version`] is lock-free. Readers
//! compare versions instead of diffing snapshots.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use meshgate_types::event::field_names;
use meshgate_types::{Event, FieldValue, Fields, NodeId, NodeView, RegistrySnapshot, display_name};

use crate::persistence::StoredNode;

/// Coordinates closer than this (in degrees) are considered unchanged.
const COORDINATE_EPSILON: f64 = 1e-9;

/// Mutable state for one node. Owned by the [`Registry`].
#[derive(Debug, Clone, PartialEq)]
pub struct NodeState {
    id: NodeId,
    fields: Fields,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    version: u64,
}

impl NodeState {
    fn new(id: NodeId, seen_at: DateTime<Utc>, version: u64) -> Self {
        Self {
            id,
            fields: Fields::new(),
            first_seen: seen_at,
            last_seen: seen_at,
            version,
        }
    }

    /// Node identity.
    pub const fn id(&self) -> &NodeId {
        &self.id
    }

    /// Accumulated fields.
    pub const fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Long name, else short name, else the id.
    pub fn display_name(&self) -> String {
        display_name(&self.id, &self.fields)
    }

    /// Current `(latitude, longitude)` if both are known.
    pub fn position(&self) -> Option<(f64, f64)> {
        stored_pair(&self.fields)
    }

    /// Per-node revision counter.
    pub const fn version(&self) -> u64 {
        self.version
    }

    fn view(&self) -> NodeView {
        NodeView {
            id: self.id.clone(),
            name: self.display_name(),
            fields: self.fields.clone(),
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            version: self.version,
        }
    }
}

/// What a single [`Registry::apply`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct ApplyOutcome {
    /// The registry was mutated and its version bumped.
    pub merged: bool,
    /// A new node entry was created.
    pub created: bool,
    /// The stored coordinate pair moved.
    pub position_changed: bool,
    /// The short or long name changed.
    pub identity_changed: bool,
}

/// Field-level changes produced by one merge.
#[derive(Debug, Default)]
struct FieldChanges {
    dirty: bool,
    position: bool,
    identity: bool,
}

/// Thread-safe map of every node ever heard.
#[derive(Debug, Default)]
pub struct Registry {
    nodes: RwLock<BTreeMap<NodeId, NodeState>>,
    version: AtomicU64,
}

impl Registry {
    /// Create an empty registry at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<NodeId, NodeState>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<NodeId, NodeState>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current global version. Lock-free.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Number of known nodes.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no node has been heard yet.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Copy of a single node.
    pub fn get(&self, id: &NodeId) -> Option<NodeView> {
        self.read().get(id).map(NodeState::view)
    }

    /// Merge an event into the registry.
    ///
    /// Self-originated events are ignored. Returns what changed; a
    /// non-merged outcome means the registry (and its version) is untouched.
    pub fn apply(&self, event: &Event) -> ApplyOutcome {
        if event.is_self_originated() {
            return ApplyOutcome::default();
        }

        let mut nodes = self.write();
        let next_version = self.version.load(Ordering::Acquire).saturating_add(1);
        let created = !nodes.contains_key(event.node_id());
        let node = nodes
            .entry(event.node_id().clone())
            .or_insert_with(|| {
                NodeState::new(event.node_id().clone(), event.received_at(), next_version)
            });

        let changes = merge_fields(&mut node.fields, event.fields());
        if !created && !changes.dirty {
            return ApplyOutcome::default();
        }

        if !created {
            node.version = node.version.saturating_add(1);
            node.last_seen = node.last_seen.max(event.received_at());
        }
        self.version.store(next_version, Ordering::Release);

        ApplyOutcome {
            merged: true,
            created,
            position_changed: changes.position,
            identity_changed: changes.identity,
        }
    }

    /// Consistent copy of every node, ordered by id.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let nodes = self.read();
        RegistrySnapshot {
            version: self.version.load(Ordering::Acquire),
            nodes: nodes.values().map(NodeState::view).collect(),
        }
    }

    /// Seed the registry from persisted nodes.
    ///
    /// Stored values never overwrite what live traffic already set. Returns
    /// the number of entries created.
    pub fn restore(&self, stored: impl IntoIterator<Item = StoredNode>) -> usize {
        let mut nodes = self.write();
        let next_version = self.version.load(Ordering::Acquire).saturating_add(1);
        let mut restored = 0_usize;

        for record in stored {
            if record.id.is_blank() || nodes.contains_key(&record.id) {
                continue;
            }
            let mut node = NodeState::new(record.id.clone(), record.first_seen, next_version);
            node.last_seen = record.last_seen.max(record.first_seen);

            if let Some(name) = record.name.filter(|n| !n.trim().is_empty() && *n != record.id.0) {
                node.fields
                    .insert(field_names::LONG_NAME.to_owned(), FieldValue::Text(name));
            }
            if let (Some(lat), Some(lon)) = (record.latitude, record.longitude) {
                node.fields
                    .insert(field_names::LATITUDE.to_owned(), FieldValue::Float(lat));
                node.fields
                    .insert(field_names::LONGITUDE.to_owned(), FieldValue::Float(lon));
            }
            if let Some(alt) = record.altitude {
                node.fields
                    .insert(field_names::ALTITUDE.to_owned(), FieldValue::Float(alt));
            }

            nodes.insert(record.id, node);
            restored = restored.saturating_add(1);
        }

        if restored > 0 {
            self.version.store(next_version, Ordering::Release);
        }
        restored
    }
}

fn is_coordinate(key: &str) -> bool {
    key == field_names::LATITUDE || key == field_names::LONGITUDE
}

fn is_identity(key: &str) -> bool {
    key == field_names::LONG_NAME || key == field_names::SHORT_NAME
}

fn present_f64(fields: &Fields, key: &str) -> Option<f64> {
    fields
        .get(key)
        .filter(|v| !v.is_absent())
        .and_then(FieldValue::as_f64)
        .filter(|v| v.is_finite())
}

fn stored_pair(fields: &Fields) -> Option<(f64, f64)> {
    Some((
        present_f64(fields, field_names::LATITUDE)?,
        present_f64(fields, field_names::LONGITUDE)?,
    ))
}

fn merge_fields(stored: &mut Fields, incoming: &Fields) -> FieldChanges {
    let mut changes = FieldChanges::default();

    for (key, value) in incoming {
        if is_coordinate(key) || value.is_absent() {
            continue;
        }
        if stored.get(key) != Some(value) {
            stored.insert(key.clone(), value.clone());
            changes.dirty = true;
            changes.identity |= is_identity(key);
        }
    }

    if let Some((lat, lon)) = stored_pair(incoming) {
        let moved = stored_pair(stored).is_none_or(|(old_lat, old_lon)| {
            (old_lat - lat).abs() > COORDINATE_EPSILON || (old_lon - lon).abs() > COORDINATE_EPSILON
        });
        if moved {
            stored.insert(field_names::LATITUDE.to_owned(), FieldValue::Float(lat));
            stored.insert(field_names::LONGITUDE.to_owned(), FieldValue::Float(lon));
            changes.dirty = true;
            changes.position = true;
        }
    }

    changes
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::float_cmp,
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing
)]
mod tests {
    use chrono::TimeZone;
    use meshgate_types::EventKind;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn event(id: &str, kind: EventKind, secs: i64) -> Event {
        Event::new(NodeId::from(id), kind, "msh.test", at(secs))
    }

    fn position(id: &str, lat: f64, lon: f64, secs: i64) -> Event {
        event(id, EventKind::Position, secs)
            .with_field(field_names::LATITUDE, lat)
            .with_field(field_names::LONGITUDE, lon)
    }

    #[test]
    fn nodeinfo_creates_named_node() {
        let registry = Registry::new();
        let outcome = registry.apply(
            &event("!a1b2", EventKind::NodeInfo, 0)
                .with_field(field_names::SHORT_NAME, "AB")
                .with_field(field_names::LONG_NAME, "Alpha Beta"),
        );

        assert!(outcome.merged);
        assert!(outcome.created);
        assert!(outcome.identity_changed);
        assert_eq!(registry.version(), 1);

        let node = registry.get(&NodeId::from("!a1b2")).unwrap();
        assert_eq!(node.name, "Alpha Beta");
        assert_eq!(node.first_seen, at(0));
        assert_eq!(node.last_seen, at(0));
        assert_eq!(node.version, 1);
    }

    #[test]
    fn applying_same_event_twice_is_a_noop() {
        let registry = Registry::new();
        let ev = position("!a1b2", 45.0, 9.0, 0).with_field(field_names::ALTITUDE, 120_i64);

        assert!(registry.apply(&ev).merged);
        let version = registry.version();
        let before = registry.snapshot();

        let second = registry.apply(&ev);
        assert_eq!(second, ApplyOutcome::default());
        assert_eq!(registry.version(), version);
        assert_eq!(registry.snapshot(), before);
    }

    #[test]
    fn non_finite_telemetry_is_idempotent() {
        let registry = Registry::new();
        let ev = event("!a1b2", EventKind::Telemetry, 0)
            .with_field("voltage", f64::NAN)
            .with_field("temperature", f64::INFINITY)
            .with_field("battery_level", 87_i64);

        assert!(registry.apply(&ev).merged);
        let version = registry.version();

        let second = registry.apply(&ev);
        assert!(!second.merged);
        assert_eq!(registry.version(), version);

        let node = registry.get(&NodeId::from("!a1b2")).unwrap();
        assert!(!node.fields.contains_key("voltage"));
        assert!(!node.fields.contains_key("temperature"));
        assert_eq!(node.fields["battery_level"], FieldValue::Int(87));
    }

    #[test]
    fn nulls_and_empties_never_erase() {
        let registry = Registry::new();
        registry.apply(&event("!1", EventKind::NodeInfo, 0).with_field(field_names::LONG_NAME, "Base"));

        let outcome = registry.apply(
            &event("!1", EventKind::NodeInfo, 1)
                .with_field(field_names::LONG_NAME, FieldValue::Null)
                .with_field(field_names::SHORT_NAME, ""),
        );
        assert!(!outcome.merged);

        let node = registry.get(&NodeId::from("!1")).unwrap();
        assert_eq!(node.name, "Base");
        assert!(!node.fields.contains_key(field_names::SHORT_NAME));
        assert_eq!(node.last_seen, at(0));
    }

    #[test]
    fn half_a_coordinate_pair_is_ignored() {
        let registry = Registry::new();
        registry.apply(&position("!1", 45.0, 9.0, 0));

        let outcome =
            registry.apply(&event("!1", EventKind::Position, 1).with_field(field_names::LATITUDE, 46.0));
        assert!(!outcome.merged);

        let node = registry.get(&NodeId::from("!1")).unwrap();
        assert_eq!(node.fields[field_names::LATITUDE], FieldValue::Float(45.0));
    }

    #[test]
    fn position_pair_moves_once() {
        let registry = Registry::new();
        let first = registry.apply(&position("!1", 45.0, 9.0, 0));
        assert!(first.position_changed);

        let same = registry.apply(&position("!1", 45.0, 9.0, 1));
        assert!(!same.position_changed);
        assert!(!same.merged);

        let moved = registry.apply(&position("!1", 45.0, 9.1, 2));
        assert!(moved.position_changed);
        assert!(!moved.created);
        assert_eq!(registry.version(), 2);
        assert_eq!(registry.get(&NodeId::from("!1")).unwrap().last_seen, at(2));
    }

    #[test]
    fn zero_coordinates_are_accepted() {
        let registry = Registry::new();
        let outcome = registry.apply(&position("!1", 0.0, 0.0, 0));
        assert!(outcome.position_changed);

        let node = registry.get(&NodeId::from("!1")).unwrap();
        assert_eq!(node.fields[field_names::LONGITUDE], FieldValue::Float(0.0));
    }

    #[test]
    fn coordinates_on_any_event_kind_count() {
        let registry = Registry::new();
        let telemetry = event("!1", EventKind::Telemetry, 0)
            .with_field(field_names::LATITUDE, 10_i64)
            .with_field(field_names::LONGITUDE, 20_i64)
            .with_field("voltage", 3.9);
        let outcome = registry.apply(&telemetry);
        assert!(outcome.position_changed);

        let node = registry.get(&NodeId::from("!1")).unwrap();
        assert_eq!(node.fields[field_names::LATITUDE], FieldValue::Float(10.0));
        assert_eq!(node.fields["voltage"], FieldValue::Float(3.9));
    }

    #[test]
    fn self_originated_events_are_never_merged() {
        let registry = Registry::new();
        let echo = event("!meshgate", EventKind::Command, 0)
            .with_field(field_names::CMD, "request_position")
            .self_originated(true);

        assert_eq!(registry.apply(&echo), ApplyOutcome::default());
        assert!(registry.is_empty());
        assert_eq!(registry.version(), 0);
    }

    #[test]
    fn sticky_merge_is_a_fold_over_non_absent_values() {
        let sequence = [
            vec![("a", FieldValue::from(1_i64)), ("b", FieldValue::from("x"))],
            vec![("a", FieldValue::Null), ("c", FieldValue::from(true))],
            vec![("b", FieldValue::from("")), ("a", FieldValue::from(2_i64))],
            vec![("c", FieldValue::from(false)), ("d", FieldValue::Null)],
            vec![("b", FieldValue::from("y"))],
        ];

        let registry = Registry::new();
        let mut expected = Fields::new();
        for (secs, batch) in (0_i64..).zip(sequence) {
            let mut ev = event("!fold", EventKind::Telemetry, secs);
            for (key, value) in batch {
                if !value.is_absent() {
                    expected.insert(key.to_owned(), value.clone());
                }
                ev = ev.with_field(key, value);
            }
            registry.apply(&ev);
        }

        let node = registry.get(&NodeId::from("!fold")).unwrap();
        assert_eq!(node.fields, expected);
    }

    #[test]
    fn version_is_strictly_increasing() {
        let registry = Registry::new();
        let mut last = registry.version();
        for i in 0..20_i64 {
            let outcome = registry.apply(&event("!v", EventKind::Telemetry, i).with_field("n", i % 3));
            let now = registry.version();
            if outcome.merged {
                assert!(now > last);
            } else {
                assert_eq!(now, last);
            }
            last = now;
        }
    }

    #[test]
    fn snapshot_is_ordered_and_versioned() {
        let registry = Registry::new();
        registry.apply(&position("!c", 1.0, 1.0, 0));
        registry.apply(&position("!a", 2.0, 2.0, 1));
        registry.apply(&position("!b", 3.0, 3.0, 2));

        let snapshot = registry.snapshot();
        let ids: Vec<&str> = snapshot.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["!a", "!b", "!c"]);
        assert_eq!(snapshot.version, 3);
        assert_eq!(snapshot.len(), registry.len());
    }

    #[test]
    fn restore_seeds_names_and_positions() {
        let registry = Registry::new();
        let restored = registry.restore(vec![
            StoredNode {
                id: NodeId::from("!a1b2"),
                name: Some("Alpha Beta".to_owned()),
                latitude: Some(45.0),
                longitude: Some(9.0),
                altitude: None,
                first_seen: at(0),
                last_seen: at(5),
            },
            StoredNode {
                id: NodeId::from("!0003"),
                name: Some("!0003".to_owned()),
                latitude: Some(1.0),
                longitude: None,
                altitude: None,
                first_seen: at(0),
                last_seen: at(0),
            },
        ]);

        assert_eq!(restored, 2);
        assert_eq!(registry.version(), 1);

        let alpha = registry.get(&NodeId::from("!a1b2")).unwrap();
        assert_eq!(alpha.name, "Alpha Beta");
        assert_eq!(alpha.last_seen, at(5));

        let bare = registry.get(&NodeId::from("!0003")).unwrap();
        assert!(bare.fields.is_empty());

        // A restored position that did not move is not a change.
        assert!(!registry.apply(&position("!a1b2", 45.0, 9.0, 10)).merged);
    }

    #[test]
    fn restore_with_nothing_keeps_version() {
        let registry = Registry::new();
        assert_eq!(registry.restore(Vec::new()), 0);
        assert_eq!(registry.version(), 0);
    }
}

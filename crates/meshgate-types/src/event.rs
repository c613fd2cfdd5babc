//! Normalized ingestion events.
//!
//! Every message pulled off the transport, whatever its wire encoding, is
//! turned into exactly one [`Event`] by the decoder. The registry only ever
//! sees events, so its merge rule can match on [`EventKind`] instead of
//! probing arbitrary payload keys.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::NodeId;

/// Well-known field names shared by the decoder and the registry.
pub mod field_names {
    /// Latitude in floating degrees.
    pub const LATITUDE: &str = "latitude";
    /// Longitude in floating degrees.
    pub const LONGITUDE: &str = "longitude";
    /// Altitude in metres.
    pub const ALTITUDE: &str = "altitude";
    /// Short (up to four character) node name.
    pub const SHORT_NAME: &str = "short_name";
    /// Human readable node name.
    pub const LONG_NAME: &str = "long_name";
    /// Body of a text message.
    pub const TEXT: &str = "text";
    /// Name of a command carried by a `cmd` message.
    pub const CMD: &str = "cmd";
}

/// Named scalar values carried by an event or accumulated on a node.
pub type Fields = BTreeMap<String, FieldValue>;

/// A single scalar value.
///
/// `Null`, the empty string and non-finite floats are "absent": they are
/// carried through the decoder unchanged but never overwrite a stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(untagged)]
pub enum FieldValue {
    /// Explicit null.
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Text value.
    Text(String),
}

impl FieldValue {
    /// Whether this value must be ignored by the merge rule.
    pub fn is_absent(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => s.trim().is_empty(),
            Self::Float(v) => !v.is_finite(),
            Self::Bool(_) | Self::Int(_) => false,
        }
    }

    /// Numeric view of the value, if it has one.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Null | Self::Bool(_) | Self::Text(_) => None,
        }
    }

    /// Text view of the value, if it is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Null | Self::Bool(_) | Self::Int(_) | Self::Float(_) => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// What an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A position fix.
    Position,
    /// Node identity (short/long name).
    NodeInfo,
    /// Device or environment telemetry.
    Telemetry,
    /// A text message.
    Text,
    /// A command addressed to a node.
    Command,
    /// Anything the decoder does not model.
    Unknown {
        /// The discriminator as it appeared on the wire.
        raw_kind: String,
    },
}

impl EventKind {
    /// Stable label used in logs and the event history.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Position => "position",
            Self::NodeInfo => "nodeinfo",
            Self::Telemetry => "telemetry",
            Self::Text => "text",
            Self::Command => "command",
            Self::Unknown { raw_kind } => raw_kind,
        }
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized ingestion unit.
///
/// Built once by the decoder and read-only afterwards: the builder methods
/// consume the event, and there are no mutable accessors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    node_id: NodeId,
    kind: EventKind,
    fields: Fields,
    received_at: DateTime<Utc>,
    source_topic: String,
    is_self_originated: bool,
}

impl Event {
    /// Start an event with no fields.
    pub fn new(
        node_id: NodeId,
        kind: EventKind,
        source_topic: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            node_id,
            kind,
            fields: Fields::new(),
            received_at,
            source_topic: source_topic.into(),
            is_self_originated: false,
        }
    }

    /// Add (or replace) a field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Add every field from `fields`.
    #[must_use]
    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Mark whether the event echoes the gateway's own traffic.
    #[must_use]
    pub const fn self_originated(mut self, flag: bool) -> Self {
        self.is_self_originated = flag;
        self
    }

    /// The originating node.
    pub const fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// The event variant.
    pub const fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// All carried fields.
    pub const fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Look up a single field.
    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// When the gateway received the message.
    pub const fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// The transport topic the message arrived on.
    pub fn source_topic(&self) -> &str {
        &self.source_topic
    }

    /// Whether the message was published by this gateway.
    pub const fn is_self_originated(&self) -> bool {
        self.is_self_originated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_values() {
        assert!(FieldValue::Null.is_absent());
        assert!(FieldValue::from("").is_absent());
        assert!(FieldValue::from("  ").is_absent());
        assert!(!FieldValue::from("x").is_absent());
        assert!(!FieldValue::from(0_i64).is_absent());
        assert!(!FieldValue::from(false).is_absent());
        assert!(!FieldValue::from(0.0).is_absent());
        assert!(FieldValue::from(f64::NAN).is_absent());
        assert!(FieldValue::from(f64::INFINITY).is_absent());
    }

    #[test]
    fn field_values_deserialize_untagged() {
        let v: Fields = serde_json::from_str(r#"{"a":null,"b":true,"c":3,"d":1.5,"e":"x"}"#)
            .unwrap_or_default();
        assert_eq!(v.get("a"), Some(&FieldValue::Null));
        assert_eq!(v.get("b"), Some(&FieldValue::Bool(true)));
        assert_eq!(v.get("c"), Some(&FieldValue::Int(3)));
        assert_eq!(v.get("d"), Some(&FieldValue::Float(1.5)));
        assert_eq!(v.get("e"), Some(&FieldValue::Text("x".to_owned())));
    }

    #[test]
    fn builder_collects_fields() {
        let event = Event::new(NodeId::from("!1"), EventKind::Text, "msh.test", Utc::now())
            .with_field(field_names::TEXT, "hello")
            .self_originated(true);
        assert_eq!(event.field(field_names::TEXT).and_then(FieldValue::as_str), Some("hello"));
        assert!(event.is_self_originated());
        assert_eq!(event.source_topic(), "msh.test");
    }

    #[test]
    fn unknown_kind_label_is_raw_discriminator() {
        let kind = EventKind::Unknown {
            raw_kind: "waypoint".to_owned(),
        };
        assert_eq!(kind.as_str(), "waypoint");
        assert_eq!(EventKind::NodeInfo.to_string(), "nodeinfo");
    }
}

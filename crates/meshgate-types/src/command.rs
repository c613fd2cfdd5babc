//! Outbound commands addressed to mesh nodes.
//!
//! The field-device client listens on `<namespace>/<node_id>/<kind>` and
//! reads a JSON object with a `cmd` discriminator. The `from` field always
//! carries the gateway's own identity so the echo can be recognised and
//! dropped on ingestion.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use ts_rs::TS;

use crate::ids::NodeId;

/// A command the gateway can send to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    /// Ask the node to report its position.
    RequestPosition,
    /// Reboot the node.
    Reboot,
    /// Pin the node's reported position.
    #[serde(rename = "set-position")]
    SetPosition {
        /// Latitude in degrees.
        latitude: f64,
        /// Longitude in degrees.
        longitude: f64,
    },
}

impl Command {
    /// Wire name carried in the `cmd` field.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RequestPosition => "request_position",
            Self::Reboot => "reboot",
            Self::SetPosition { .. } => "set-position",
        }
    }

    /// Last topic segment the node subscribes to for this command.
    pub const fn topic_kind(&self) -> &'static str {
        match self {
            Self::RequestPosition => "location",
            Self::Reboot => "reboot",
            Self::SetPosition { .. } => "position",
        }
    }

    /// Build the JSON payload sent to `to`, signed with `from`.
    pub fn payload(&self, from: &NodeId, to: &NodeId) -> Value {
        let mut body = Map::new();
        body.insert("cmd".to_owned(), json!(self.name()));
        body.insert("from".to_owned(), json!(from.as_str()));
        body.insert("to".to_owned(), json!(to.as_str()));
        if let Self::SetPosition {
            latitude,
            longitude,
        } = self
        {
            body.insert("lat".to_owned(), json!(latitude));
            body.insert("lng".to_owned(), json!(longitude));
        }
        Value::Object(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_position_payload() {
        let payload = Command::RequestPosition
            .payload(&NodeId::from("!meshgate"), &NodeId::from("!a1b2"));
        assert_eq!(payload["cmd"], "request_position");
        assert_eq!(payload["from"], "!meshgate");
        assert_eq!(payload["to"], "!a1b2");
        assert_eq!(Command::RequestPosition.topic_kind(), "location");
    }

    #[test]
    fn serde_tag_matches_wire_name() {
        let commands = [
            Command::RequestPosition,
            Command::Reboot,
            Command::SetPosition {
                latitude: 1.0,
                longitude: 2.0,
            },
        ];
        for cmd in commands {
            let value = serde_json::to_value(&cmd).unwrap_or_default();
            assert_eq!(value["cmd"], cmd.name());
        }
    }

    #[test]
    fn set_position_carries_coordinates() {
        let cmd = Command::SetPosition {
            latitude: 45.1,
            longitude: 9.2,
        };
        let payload = cmd.payload(&NodeId::from("!gw"), &NodeId::from("!n"));
        assert_eq!(payload["cmd"], "set-position");
        assert_eq!(payload["lat"], 45.1);
        assert_eq!(payload["lng"], 9.2);
    }
}

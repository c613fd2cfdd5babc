//! Dual-format message decoder.
//!
//! Turns an opaque `(topic, payload)` pair into a normalized [`Event`].
//! Producers on the mesh speak two encodings:
//!
//! 1. **JSON** -- a UTF-8 object with a `from` identity, an optional
//!    `type`/`cmd` discriminator and a `payload` object of scalars.
//! 2. **Protobuf envelope** -- a [`ServiceEnvelope`] (or a [`FromRadio`]
//!    frame from a stream interface) wrapping a [`MeshPacket`] whose
//!    `decoded.portnum` selects the inner message type.
//!
//! JSON is tried first; anything that is not a JSON object falls back to
//! the binary path. Decoding never touches shared state.

use chrono::{DateTime, Utc};
use meshgate_types::event::field_names;
use meshgate_types::{Event, EventKind, FieldValue, Fields, NodeId};
use prost::Message as _;
use serde_json::{Map, Value};

use crate::proto::{
    DeviceMetrics, EnvironmentMetrics, FromRadio, MeshPacket, Position, ServiceEnvelope,
    Telemetry, User, portnum,
};

/// Fixed-point coordinates are degrees multiplied by this factor.
pub const COORDINATE_SCALE: f64 = 1e7;

/// Stream interface frame markers (current and 2.1 firmware).
const FRAME_MARKERS: [[u8; 2]; 2] = [[0x94, 0xC3], [0x44, 0x03]];

/// Length of a stream frame header: two marker bytes plus a big-endian u16.
const FRAME_HEADER_LEN: usize = 4;

/// Identity keys tried in order on JSON messages.
const IDENTITY_KEYS: [&str; 3] = ["from", "sender", "node_id"];

/// Structural JSON keys that never become fields.
const ENVELOPE_KEYS: [&str; 4] = ["type", "to", "cmd", "payload"];

/// Reasons a payload cannot become an [`Event`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Neither a JSON object nor a recognisable binary envelope.
    #[error("payload is neither a JSON object nor a mesh envelope")]
    Unparseable,

    /// The message carries no originating node identity.
    #[error("message has no originating node id")]
    MissingNodeId,

    /// The envelope parsed but its inner packet did not.
    #[error("malformed {kind} packet: {message}")]
    MalformedPacket {
        /// Inner packet type.
        kind: &'static str,
        /// Underlying decode error.
        message: String,
    },
}

/// Stateless decoder configured with the gateway's own identity.
#[derive(Debug, Clone)]
pub struct Decoder {
    self_id: NodeId,
}

impl Decoder {
    /// Create a decoder that flags messages from `self_id` as echoes.
    pub fn new(self_id: impl Into<NodeId>) -> Self {
        Self {
            self_id: self_id.into(),
        }
    }

    /// The identity treated as self-originated.
    pub const fn self_id(&self) -> &NodeId {
        &self.self_id
    }

    /// Decode a payload received now.
    ///
    /// # Errors
    ///
    /// See [`Decoder::decode_at`].
    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<Event, DecodeError> {
        self.decode_at(topic, payload, Utc::now())
    }

    /// Decode a payload with an explicit receive timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::MissingNodeId`] for JSON without an identity,
    /// [`DecodeError::MalformedPacket`] when an envelope's inner packet is
    /// corrupt, and [`DecodeError::Unparseable`] when neither encoding fits.
    pub fn decode_at(
        &self,
        topic: &str,
        payload: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<Event, DecodeError> {
        let event = match parse_json_object(payload) {
            Some(object) => decode_json(topic, &object, received_at)?,
            None => decode_envelope(topic, payload, received_at)?,
        };
        let echo = event.node_id() == &self.self_id;
        Ok(event.self_originated(echo))
    }
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

fn parse_json_object(payload: &[u8]) -> Option<Map<String, Value>> {
    let text = std::str::from_utf8(payload).ok()?;
    match serde_json::from_str::<Value>(text).ok()? {
        Value::Object(object) => Some(object),
        _ => None,
    }
}

fn decode_json(
    topic: &str,
    object: &Map<String, Value>,
    received_at: DateTime<Utc>,
) -> Result<Event, DecodeError> {
    let node_id = IDENTITY_KEYS
        .iter()
        .filter_map(|key| object.get(*key))
        .find_map(identity_from_value)
        .ok_or(DecodeError::MissingNodeId)?;

    // Top-level arguments first; `payload` entries override them below.
    let mut fields = Fields::new();
    collect_top_level(object, &mut fields);

    let kind = if let Some(cmd) = object.get(field_names::CMD) {
        if let Some(name) = scalar(cmd) {
            fields.insert(field_names::CMD.to_owned(), name);
        }
        EventKind::Command
    } else {
        match object.get("type").and_then(Value::as_str) {
            Some(raw) => kind_from_type(raw),
            None => EventKind::Unknown {
                raw_kind: last_topic_segment(topic).to_owned(),
            },
        }
    };

    match object.get("payload") {
        Some(Value::Object(payload)) => collect_scalars(payload, &mut fields, 0),
        Some(Value::String(text)) => {
            fields.insert(field_names::TEXT.to_owned(), FieldValue::from(text.as_str()));
        }
        _ => {}
    }

    Ok(Event::new(node_id, kind, topic, received_at).with_fields(fields))
}

fn identity_from_value(value: &Value) -> Option<NodeId> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(NodeId::new(s.trim())),
        Value::Number(n) => n.as_u64().map(|num| match u32::try_from(num) {
            Ok(num) => NodeId::from_num(num),
            Err(_) => NodeId::new(num.to_string()),
        }),
        _ => None,
    }
}

fn kind_from_type(raw: &str) -> EventKind {
    match raw.to_ascii_lowercase().as_str() {
        "position" | "sendposition" => EventKind::Position,
        "nodeinfo" => EventKind::NodeInfo,
        "telemetry" => EventKind::Telemetry,
        "text" | "sendtext" => EventKind::Text,
        _ => EventKind::Unknown {
            raw_kind: raw.to_owned(),
        },
    }
}

fn last_topic_segment(topic: &str) -> &str {
    topic.rsplit(['.', '/']).next().unwrap_or(topic)
}

/// Copy top-level scalars that are not part of the message envelope.
fn collect_top_level(object: &Map<String, Value>, out: &mut Fields) {
    for (key, value) in object {
        if IDENTITY_KEYS.contains(&key.as_str()) || ENVELOPE_KEYS.contains(&key.as_str()) {
            continue;
        }
        if let Some(scalar) = scalar(value) {
            let (key, scalar) = normalize(key, scalar);
            out.insert(key.to_owned(), scalar);
        }
    }
}

/// Copy scalar entries into `out`, flattening nested objects one level.
fn collect_scalars(object: &Map<String, Value>, out: &mut Fields, depth: u8) {
    for (key, value) in object {
        match value {
            Value::Object(inner) if depth == 0 => collect_scalars(inner, out, 1),
            Value::Object(_) | Value::Array(_) => {}
            _ => {
                if let Some(scalar) = scalar(value) {
                    let (key, scalar) = normalize(key, scalar);
                    out.insert(key.to_owned(), scalar);
                }
            }
        }
    }
}

fn scalar(value: &Value) -> Option<FieldValue> {
    match value {
        Value::Null => Some(FieldValue::Null),
        Value::Bool(b) => Some(FieldValue::Bool(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(FieldValue::Int)
            .or_else(|| n.as_f64().map(FieldValue::Float)),
        Value::String(s) => Some(FieldValue::Text(s.clone())),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Map producer key spellings onto the registry's field names.
fn normalize(key: &str, value: FieldValue) -> (&str, FieldValue) {
    match key {
        "shortname" => (field_names::SHORT_NAME, value),
        "longname" => (field_names::LONG_NAME, value),
        "lat" => (field_names::LATITUDE, value),
        "lon" | "lng" => (field_names::LONGITUDE, value),
        "latitude_i" => (field_names::LATITUDE, scale_fixed_point(&value)),
        "longitude_i" => (field_names::LONGITUDE, scale_fixed_point(&value)),
        other => (other, value),
    }
}

fn scale_fixed_point(value: &FieldValue) -> FieldValue {
    value
        .as_f64()
        .map_or(FieldValue::Null, |raw| FieldValue::Float(raw / COORDINATE_SCALE))
}

// ---------------------------------------------------------------------------
// Protobuf envelope
// ---------------------------------------------------------------------------

/// Strip a stream interface frame header if one is present and complete.
fn strip_frame_header(payload: &[u8]) -> &[u8] {
    let (Some(marker), Some(len)) = (payload.get(..2), payload.get(2..FRAME_HEADER_LEN)) else {
        return payload;
    };
    if !FRAME_MARKERS.iter().any(|m| m.as_slice() == marker) {
        return payload;
    }
    let body_len = usize::from(u16::from_be_bytes([
        len.first().copied().unwrap_or(0),
        len.get(1).copied().unwrap_or(0),
    ]));
    FRAME_HEADER_LEN
        .checked_add(body_len)
        .and_then(|end| payload.get(FRAME_HEADER_LEN..end))
        .unwrap_or(payload)
}

fn unwrap_packet(frame: &[u8]) -> Option<MeshPacket> {
    ServiceEnvelope::decode(frame)
        .ok()
        .and_then(|envelope| envelope.packet)
        .or_else(|| FromRadio::decode(frame).ok().and_then(|radio| radio.packet))
        .filter(|packet| packet.from != 0)
}

fn decode_envelope(
    topic: &str,
    payload: &[u8],
    received_at: DateTime<Utc>,
) -> Result<Event, DecodeError> {
    let packet = unwrap_packet(strip_frame_header(payload)).ok_or(DecodeError::Unparseable)?;
    let node_id = NodeId::from_num(packet.from);

    let Some(data) = packet.decoded else {
        let kind = EventKind::Unknown {
            raw_kind: "encrypted".to_owned(),
        };
        return Ok(Event::new(node_id, kind, topic, received_at));
    };

    let (kind, fields) = match data.portnum {
        portnum::TEXT_MESSAGE => {
            let mut fields = Fields::new();
            fields.insert(
                field_names::TEXT.to_owned(),
                FieldValue::from(String::from_utf8_lossy(&data.payload).into_owned()),
            );
            (EventKind::Text, fields)
        }
        portnum::POSITION => {
            let position = Position::decode(data.payload.as_slice())
                .map_err(|e| malformed("position", &e))?;
            (EventKind::Position, position_fields(&position))
        }
        portnum::NODEINFO => {
            let user =
                User::decode(data.payload.as_slice()).map_err(|e| malformed("nodeinfo", &e))?;
            (EventKind::NodeInfo, user_fields(&user))
        }
        portnum::TELEMETRY => {
            let telemetry = Telemetry::decode(data.payload.as_slice())
                .map_err(|e| malformed("telemetry", &e))?;
            (EventKind::Telemetry, telemetry_fields(&telemetry))
        }
        other => (
            EventKind::Unknown {
                raw_kind: format!("portnum_{other}"),
            },
            Fields::new(),
        ),
    };

    Ok(Event::new(node_id, kind, topic, received_at).with_fields(fields))
}

fn malformed(kind: &'static str, err: &prost::DecodeError) -> DecodeError {
    DecodeError::MalformedPacket {
        kind,
        message: err.to_string(),
    }
}

fn position_fields(position: &Position) -> Fields {
    let mut fields = Fields::new();
    if let Some(lat) = position.latitude_i {
        fields.insert(
            field_names::LATITUDE.to_owned(),
            FieldValue::Float(f64::from(lat) / COORDINATE_SCALE),
        );
    }
    if let Some(lon) = position.longitude_i {
        fields.insert(
            field_names::LONGITUDE.to_owned(),
            FieldValue::Float(f64::from(lon) / COORDINATE_SCALE),
        );
    }
    if let Some(alt) = position.altitude {
        fields.insert(field_names::ALTITUDE.to_owned(), FieldValue::from(alt));
    }
    if let Some(speed) = position.ground_speed {
        fields.insert("ground_speed".to_owned(), FieldValue::from(speed));
    }
    if position.time != 0 {
        fields.insert("time".to_owned(), FieldValue::from(position.time));
    }
    if position.sats_in_view != 0 {
        fields.insert("sats_in_view".to_owned(), FieldValue::from(position.sats_in_view));
    }
    fields
}

fn user_fields(user: &User) -> Fields {
    let mut fields = Fields::new();
    for (key, value) in [
        (field_names::LONG_NAME, &user.long_name),
        (field_names::SHORT_NAME, &user.short_name),
    ] {
        if !value.is_empty() {
            fields.insert(key.to_owned(), FieldValue::from(value.as_str()));
        }
    }
    if user.hw_model != 0 {
        fields.insert("hw_model".to_owned(), FieldValue::from(user.hw_model));
    }
    fields
}

fn telemetry_fields(telemetry: &Telemetry) -> Fields {
    let mut fields = Fields::new();
    let mut put = |key: &str, value: Option<FieldValue>| {
        if let Some(value) = value {
            fields.insert(key.to_owned(), value);
        }
    };

    if let Some(DeviceMetrics {
        battery_level,
        voltage,
        channel_utilization,
        air_util_tx,
        uptime_seconds,
    }) = &telemetry.device_metrics
    {
        put("battery_level", battery_level.map(FieldValue::from));
        put("voltage", voltage.map(FieldValue::from));
        put("channel_utilization", channel_utilization.map(FieldValue::from));
        put("air_util_tx", air_util_tx.map(FieldValue::from));
        put("uptime_seconds", uptime_seconds.map(FieldValue::from));
    }

    if let Some(EnvironmentMetrics {
        temperature,
        relative_humidity,
        barometric_pressure,
        gas_resistance,
    }) = &telemetry.environment_metrics
    {
        put("temperature", temperature.map(FieldValue::from));
        put("relative_humidity", relative_humidity.map(FieldValue::from));
        put("barometric_pressure", barometric_pressure.map(FieldValue::from));
        put("gas_resistance", gas_resistance.map(FieldValue::from));
    }

    fields
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::proto::Data;

    const TOPIC: &str = "msh.eu_868.2.json.LongFast.!gw";

    fn decoder() -> Decoder {
        Decoder::new("!meshgate")
    }

    fn float(event: &Event, key: &str) -> f64 {
        event.field(key).and_then(FieldValue::as_f64).unwrap()
    }

    fn envelope(from: u32, portnum: i32, payload: Vec<u8>) -> Vec<u8> {
        ServiceEnvelope {
            packet: Some(MeshPacket {
                from,
                to: u32::MAX,
                decoded: Some(Data {
                    portnum,
                    payload,
                    want_response: false,
                }),
                ..MeshPacket::default()
            }),
            channel_id: "LongFast".to_owned(),
            gateway_id: "!gw".to_owned(),
        }
        .encode_to_vec()
    }

    #[test]
    fn json_nodeinfo() {
        let payload = br#"{"from":"!a1b2","type":"nodeinfo","payload":{"shortname":"AB","longname":"Alpha Beta"}}"#;
        let event = decoder().decode(TOPIC, payload).unwrap();

        assert_eq!(event.node_id().as_str(), "!a1b2");
        assert_eq!(event.kind(), &EventKind::NodeInfo);
        assert_eq!(
            event.field(field_names::LONG_NAME).and_then(FieldValue::as_str),
            Some("Alpha Beta")
        );
        assert_eq!(
            event.field(field_names::SHORT_NAME).and_then(FieldValue::as_str),
            Some("AB")
        );
        assert!(!event.is_self_originated());
        assert_eq!(event.source_topic(), TOPIC);
    }

    #[test]
    fn json_fixed_point_position_is_scaled() {
        let payload = br#"{"from":"!a1b2","type":"sendposition","payload":{"latitude_i":451234567,"longitude_i":-91234567,"altitude":120}}"#;
        let event = decoder().decode(TOPIC, payload).unwrap();

        assert_eq!(event.kind(), &EventKind::Position);
        assert!((float(&event, field_names::LATITUDE) - 45.123_456_7).abs() < 1e-9);
        assert!((float(&event, field_names::LONGITUDE) + 9.123_456_7).abs() < 1e-9);
        assert_eq!(event.field(field_names::ALTITUDE), Some(&FieldValue::Int(120)));
        assert!(event.field("latitude_i").is_none());
    }

    #[test]
    fn json_top_level_position_fields() {
        let payload = br#"{"from":"!a1","type":"position","lat":45.5,"lon":9.2,"altitude":100,"to":"!ffff"}"#;
        let event = decoder().decode(TOPIC, payload).unwrap();

        assert_eq!(event.kind(), &EventKind::Position);
        assert!((float(&event, field_names::LATITUDE) - 45.5).abs() < 1e-9);
        assert!((float(&event, field_names::LONGITUDE) - 9.2).abs() < 1e-9);
        assert_eq!(event.field(field_names::ALTITUDE), Some(&FieldValue::Int(100)));
        assert!(event.field("from").is_none());
        assert!(event.field("type").is_none());
        assert!(event.field("to").is_none());
    }

    #[test]
    fn payload_fields_override_top_level() {
        let payload = br#"{"from":"!a1","type":"nodeinfo","longname":"Old","shortname":"OL","payload":{"longname":"New"}}"#;
        let event = decoder().decode(TOPIC, payload).unwrap();

        assert_eq!(
            event.field(field_names::LONG_NAME).and_then(FieldValue::as_str),
            Some("New")
        );
        assert_eq!(
            event.field(field_names::SHORT_NAME).and_then(FieldValue::as_str),
            Some("OL")
        );
    }

    #[test]
    fn numeric_identity_is_canonical() {
        let payload = br#"{"from":2712847316,"type":"telemetry","payload":{"battery_level":87,"voltage":4.1}}"#;
        let event = decoder().decode(TOPIC, payload).unwrap();
        assert_eq!(event.node_id().as_str(), "!a1b2c3d4");
        assert_eq!(event.kind(), &EventKind::Telemetry);
        assert_eq!(event.field("battery_level"), Some(&FieldValue::Int(87)));
    }

    #[test]
    fn self_identity_is_flagged() {
        let payload = br#"{"from":"!meshgate","cmd":"request_position","to":"!a1b2"}"#;
        let event = decoder().decode(TOPIC, payload).unwrap();
        assert!(event.is_self_originated());
        assert_eq!(event.kind(), &EventKind::Command);
        assert_eq!(
            event.field(field_names::CMD).and_then(FieldValue::as_str),
            Some("request_position")
        );
        assert!(event.field("from").is_none());
        assert!(event.field("to").is_none());
    }

    #[test]
    fn missing_identity_is_rejected() {
        let result = decoder().decode(TOPIC, br#"{"type":"text","payload":"hi"}"#);
        assert!(matches!(result, Err(DecodeError::MissingNodeId)));

        let result = decoder().decode(TOPIC, br#"{"from":"","type":"text"}"#);
        assert!(matches!(result, Err(DecodeError::MissingNodeId)));
    }

    #[test]
    fn text_payload_string_becomes_text_field() {
        let payload = br#"{"from":"!a1b2","type":"sendtext","payload":"ciao"}"#;
        let event = decoder().decode(TOPIC, payload).unwrap();
        assert_eq!(event.kind(), &EventKind::Text);
        assert_eq!(
            event.field(field_names::TEXT).and_then(FieldValue::as_str),
            Some("ciao")
        );
    }

    #[test]
    fn unknown_discriminators() {
        let event = decoder()
            .decode(TOPIC, br#"{"from":"!a1b2","type":"waypoint","payload":{"name":"camp"}}"#)
            .unwrap();
        assert_eq!(
            event.kind(),
            &EventKind::Unknown {
                raw_kind: "waypoint".to_owned()
            }
        );
        assert_eq!(event.field("name").and_then(FieldValue::as_str), Some("camp"));

        let event = decoder()
            .decode("msh/eu/status", br#"{"from":"!a1b2"}"#)
            .unwrap();
        assert_eq!(
            event.kind(),
            &EventKind::Unknown {
                raw_kind: "status".to_owned()
            }
        );
    }

    #[test]
    fn nested_payload_objects_flatten_one_level() {
        let payload = br#"{"from":"!a1b2","type":"telemetry","payload":{"device_metrics":{"voltage":3.9,"deep":{"x":1}},"list":[1,2]}}"#;
        let event = decoder().decode(TOPIC, payload).unwrap();
        assert_eq!(event.field("voltage"), Some(&FieldValue::Float(3.9)));
        assert!(event.field("x").is_none());
        assert!(event.field("list").is_none());
    }

    #[test]
    fn nulls_are_carried_through() {
        let payload = br#"{"from":"!a1b2","type":"nodeinfo","payload":{"longname":null}}"#;
        let event = decoder().decode(TOPIC, payload).unwrap();
        assert_eq!(event.field(field_names::LONG_NAME), Some(&FieldValue::Null));
    }

    #[test]
    fn envelope_position() {
        let position = Position {
            latitude_i: Some(451_234_567),
            longitude_i: Some(91_234_567),
            altitude: Some(42),
            time: 1_700_000_000,
            ground_speed: None,
            sats_in_view: 7,
        };
        let bytes = envelope(0xa1b2_c3d4, portnum::POSITION, position.encode_to_vec());
        let event = decoder().decode(TOPIC, &bytes).unwrap();

        assert_eq!(event.node_id().as_str(), "!a1b2c3d4");
        assert_eq!(event.kind(), &EventKind::Position);
        assert!((float(&event, field_names::LATITUDE) - 45.123_456_7).abs() < 1e-9);
        assert!((float(&event, field_names::LONGITUDE) - 9.123_456_7).abs() < 1e-9);
        assert_eq!(event.field(field_names::ALTITUDE), Some(&FieldValue::Int(42)));
        assert_eq!(event.field("sats_in_view"), Some(&FieldValue::Int(7)));
    }

    #[test]
    fn envelope_nodeinfo() {
        let user = User {
            id: "!00000001".to_owned(),
            long_name: "Base Camp".to_owned(),
            short_name: "BC".to_owned(),
            hw_model: 0,
        };
        let bytes = envelope(1, portnum::NODEINFO, user.encode_to_vec());
        let event = decoder().decode(TOPIC, &bytes).unwrap();

        assert_eq!(event.kind(), &EventKind::NodeInfo);
        assert_eq!(
            event.field(field_names::LONG_NAME).and_then(FieldValue::as_str),
            Some("Base Camp")
        );
        assert!(event.field("hw_model").is_none());
    }

    #[test]
    fn envelope_telemetry_flattens_metrics() {
        let telemetry = Telemetry {
            time: 10,
            device_metrics: Some(DeviceMetrics {
                battery_level: Some(90),
                voltage: Some(4.0),
                channel_utilization: None,
                air_util_tx: None,
                uptime_seconds: Some(3600),
            }),
            environment_metrics: None,
        };
        let bytes = envelope(2, portnum::TELEMETRY, telemetry.encode_to_vec());
        let event = decoder().decode(TOPIC, &bytes).unwrap();

        assert_eq!(event.kind(), &EventKind::Telemetry);
        assert_eq!(event.field("battery_level"), Some(&FieldValue::Int(90)));
        assert_eq!(event.field("voltage"), Some(&FieldValue::Float(4.0)));
        assert_eq!(event.field("uptime_seconds"), Some(&FieldValue::Int(3600)));
        assert!(event.field("channel_utilization").is_none());
    }

    #[test]
    fn envelope_text_and_unknown_port() {
        let bytes = envelope(3, portnum::TEXT_MESSAGE, b"hello mesh".to_vec());
        let event = decoder().decode(TOPIC, &bytes).unwrap();
        assert_eq!(event.kind(), &EventKind::Text);
        assert_eq!(
            event.field(field_names::TEXT).and_then(FieldValue::as_str),
            Some("hello mesh")
        );

        let bytes = envelope(3, 70, vec![1, 2, 3]);
        let event = decoder().decode(TOPIC, &bytes).unwrap();
        assert_eq!(
            event.kind(),
            &EventKind::Unknown {
                raw_kind: "portnum_70".to_owned()
            }
        );
    }

    #[test]
    fn framed_from_radio_is_unwrapped() {
        let radio = FromRadio {
            id: 9,
            packet: Some(MeshPacket {
                from: 5,
                decoded: Some(Data {
                    portnum: portnum::TEXT_MESSAGE,
                    payload: b"hi".to_vec(),
                    want_response: false,
                }),
                ..MeshPacket::default()
            }),
        }
        .encode_to_vec();
        let len = u16::try_from(radio.len()).unwrap();
        let mut frame = vec![0x94, 0xC3];
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&radio);

        let event = decoder().decode(TOPIC, &frame).unwrap();
        assert_eq!(event.node_id().as_str(), "!00000005");
        assert_eq!(
            event.field(field_names::TEXT).and_then(FieldValue::as_str),
            Some("hi")
        );
    }

    #[test]
    fn encrypted_packet_is_unknown_without_fields() {
        let bytes = ServiceEnvelope {
            packet: Some(MeshPacket {
                from: 7,
                encrypted: vec![0xde, 0xad],
                ..MeshPacket::default()
            }),
            channel_id: String::new(),
            gateway_id: String::new(),
        }
        .encode_to_vec();
        let event = decoder().decode(TOPIC, &bytes).unwrap();
        assert_eq!(
            event.kind(),
            &EventKind::Unknown {
                raw_kind: "encrypted".to_owned()
            }
        );
        assert!(event.fields().is_empty());
    }

    #[test]
    fn malformed_inner_packet() {
        let bytes = envelope(4, portnum::POSITION, vec![0x0d, 0x01]);
        let result = decoder().decode(TOPIC, &bytes);
        assert!(matches!(
            result,
            Err(DecodeError::MalformedPacket {
                kind: "position",
                ..
            })
        ));
    }

    #[test]
    fn garbage_is_unparseable() {
        let payloads: [&[u8]; 4] = [b"", b"not json at all", b"[1,2,3]", &[0xff, 0xff, 0xff]];
        for payload in payloads {
            let result = decoder().decode(TOPIC, payload);
            assert!(
                matches!(result, Err(DecodeError::Unparseable)),
                "payload {payload:?} should be unparseable"
            );
        }
    }

    #[test]
    fn frame_header_without_full_body_is_left_alone() {
        let payload = [0x94, 0xC3, 0x00, 0x10, 0x01];
        assert_eq!(strip_frame_header(&payload), &payload[..]);
    }
}

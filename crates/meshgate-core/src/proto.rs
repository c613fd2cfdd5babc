//! Binary envelope schema.
//!
//! Subset of the mesh radio protobuf schema that the gateway reads. Only
//! the fields the decoder uses are declared; unknown fields are skipped by
//! `prost` while decoding, so newer firmware payloads still parse. Field
//! tags match the upstream `.proto` definitions.

/// Application port numbers carried in [`Data::portnum`].
pub mod portnum {
    /// Plain UTF-8 text message.
    pub const TEXT_MESSAGE: i32 = 1;
    /// [`Position`](super::Position) payload.
    pub const POSITION: i32 = 3;
    /// [`User`](super::User) payload.
    pub const NODEINFO: i32 = 4;
    /// [`Telemetry`](super::Telemetry) payload.
    pub const TELEMETRY: i32 = 67;
}

/// Wrapper a gateway radio publishes to the broker.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ServiceEnvelope {
    /// The forwarded packet.
    #[prost(message, optional, tag = "1")]
    pub packet: Option<MeshPacket>,
    /// Channel name the packet was heard on.
    #[prost(string, tag = "2")]
    pub channel_id: String,
    /// Identity of the radio that forwarded the packet.
    #[prost(string, tag = "3")]
    pub gateway_id: String,
}

/// Message a radio emits on its serial/stream interface.
#[derive(Clone, PartialEq, prost::Message)]
pub struct FromRadio {
    /// Monotonic message id.
    #[prost(uint32, tag = "1")]
    pub id: u32,
    /// A received packet.
    #[prost(message, optional, tag = "2")]
    pub packet: Option<MeshPacket>,
}

/// A packet travelling through the mesh.
#[derive(Clone, PartialEq, prost::Message)]
pub struct MeshPacket {
    /// Sending node number.
    #[prost(fixed32, tag = "1")]
    pub from: u32,
    /// Destination node number (`0xffffffff` for broadcast).
    #[prost(fixed32, tag = "2")]
    pub to: u32,
    /// Channel index.
    #[prost(uint32, tag = "3")]
    pub channel: u32,
    /// Cleartext payload, when the packet could be decrypted.
    #[prost(message, optional, tag = "4")]
    pub decoded: Option<Data>,
    /// Encrypted payload, when it could not.
    #[prost(bytes = "vec", tag = "5")]
    pub encrypted: Vec<u8>,
    /// Packet id.
    #[prost(fixed32, tag = "6")]
    pub id: u32,
    /// Receive time, seconds since the epoch.
    #[prost(fixed32, tag = "7")]
    pub rx_time: u32,
    /// Signal to noise ratio at reception.
    #[prost(float, tag = "8")]
    pub rx_snr: f32,
    /// Remaining hops.
    #[prost(uint32, tag = "9")]
    pub hop_limit: u32,
    /// Received signal strength.
    #[prost(int32, tag = "12")]
    pub rx_rssi: i32,
}

/// Decoded application payload.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Data {
    /// Application port; see [`portnum`].
    #[prost(int32, tag = "1")]
    pub portnum: i32,
    /// Port-specific encoded payload.
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
    /// Whether the sender asked for a reply.
    #[prost(bool, tag = "3")]
    pub want_response: bool,
}

/// A position report. Coordinates are fixed-point degrees scaled by 1e7.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Position {
    /// Latitude * 1e7.
    #[prost(sfixed32, optional, tag = "1")]
    pub latitude_i: Option<i32>,
    /// Longitude * 1e7.
    #[prost(sfixed32, optional, tag = "2")]
    pub longitude_i: Option<i32>,
    /// Altitude in metres above MSL.
    #[prost(int32, optional, tag = "3")]
    pub altitude: Option<i32>,
    /// Fix time, seconds since the epoch.
    #[prost(fixed32, tag = "4")]
    pub time: u32,
    /// Ground speed in m/s.
    #[prost(uint32, optional, tag = "15")]
    pub ground_speed: Option<u32>,
    /// Satellites used for the fix.
    #[prost(uint32, tag = "19")]
    pub sats_in_view: u32,
}

/// Node identity broadcast.
#[derive(Clone, PartialEq, prost::Message)]
pub struct User {
    /// Textual node id (`!xxxxxxxx`).
    #[prost(string, tag = "1")]
    pub id: String,
    /// Full name.
    #[prost(string, tag = "2")]
    pub long_name: String,
    /// Short name, up to four characters.
    #[prost(string, tag = "3")]
    pub short_name: String,
    /// Hardware model number.
    #[prost(int32, tag = "5")]
    pub hw_model: i32,
}

/// Telemetry report. At most one of the metric groups is set.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Telemetry {
    /// Measurement time, seconds since the epoch.
    #[prost(fixed32, tag = "1")]
    pub time: u32,
    /// Device health metrics.
    #[prost(message, optional, tag = "2")]
    pub device_metrics: Option<DeviceMetrics>,
    /// Environment sensor metrics.
    #[prost(message, optional, tag = "3")]
    pub environment_metrics: Option<EnvironmentMetrics>,
}

/// Device health metrics.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DeviceMetrics {
    /// Battery level in percent (101 means powered).
    #[prost(uint32, optional, tag = "1")]
    pub battery_level: Option<u32>,
    /// Battery voltage.
    #[prost(float, optional, tag = "2")]
    pub voltage: Option<f32>,
    /// Channel utilisation in percent.
    #[prost(float, optional, tag = "3")]
    pub channel_utilization: Option<f32>,
    /// Transmit airtime in percent.
    #[prost(float, optional, tag = "4")]
    pub air_util_tx: Option<f32>,
    /// Seconds since boot.
    #[prost(uint32, optional, tag = "5")]
    pub uptime_seconds: Option<u32>,
}

/// Environment sensor metrics.
#[derive(Clone, PartialEq, prost::Message)]
pub struct EnvironmentMetrics {
    /// Temperature in degrees Celsius.
    #[prost(float, optional, tag = "1")]
    pub temperature: Option<f32>,
    /// Relative humidity in percent.
    #[prost(float, optional, tag = "2")]
    pub relative_humidity: Option<f32>,
    /// Barometric pressure in hPa.
    #[prost(float, optional, tag = "3")]
    pub barometric_pressure: Option<f32>,
    /// Gas resistance in MOhm.
    #[prost(float, optional, tag = "4")]
    pub gas_resistance: Option<f32>,
}

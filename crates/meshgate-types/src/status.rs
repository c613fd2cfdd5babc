//! Connection state of the transport session supervisor.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Where the session supervisor currently is in its reconnect cycle.
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Backoff -> Connecting -> ...
///        any state -> Stopped (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not started yet.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// A live session exists.
    Connected,
    /// Waiting before the next connection attempt.
    Backoff {
        /// Delay before the next attempt, in milliseconds.
        delay_ms: u64,
    },
    /// Stopped on request. Never restarts.
    Stopped,
}

impl ConnectionState {
    /// Backoff state for the given delay.
    pub fn backoff(delay: Duration) -> Self {
        Self::Backoff {
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Whether a live session exists.
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether the supervisor has stopped for good.
    pub const fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl core::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Backoff { delay_ms } => write!(f, "backoff({delay_ms}ms)"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_serializes_with_delay() {
        let state = ConnectionState::backoff(Duration::from_secs(3));
        let json = serde_json::to_value(state).unwrap_or_default();
        assert_eq!(json["state"], "backoff");
        assert_eq!(json["delay_ms"], 3000);
        assert_eq!(state.to_string(), "backoff(3000ms)");
    }

    #[test]
    fn connected_predicates() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(ConnectionState::Stopped.is_stopped());
    }
}

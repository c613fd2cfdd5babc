//! Node identity.
//!
//! Mesh radios identify themselves with a 32-bit node number. The canonical
//! textual form is `!` followed by eight lowercase hex digits, which is also
//! what the JSON producers put in their `sender` field. Identities that
//! arrive as strings are kept verbatim so that producers with their own
//! naming scheme still map onto a single registry entry.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Identity reserved for messages the gateway itself publishes.
///
/// Commands sent through the command gateway carry this id in their `from`
/// field so that the decoder can recognise the echo when the broker
/// delivers it back to our own subscription.
pub const GATEWAY_SELF_ID: &str = "!meshgate";

/// Unique, stable identifier for a node in the mesh.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct NodeId(pub String);

impl NodeId {
    /// Wrap a textual identity as received.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Render a numeric node number in canonical `!xxxxxxxx` form.
    pub fn from_num(num: u32) -> Self {
        Self(format!("!{num:08x}"))
    }

    /// Borrow the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identity is empty (after trimming whitespace).
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Whether the identity can be used as a single subject token.
    ///
    /// Subject tokens may not be empty and may not contain whitespace, the
    /// `.` separator or the `*`/`>` wildcards.
    pub fn is_subject_safe(&self) -> bool {
        !self.0.is_empty()
            && !self
                .0
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '.' | '*' | '>' | '/'))
    }
}

impl core::fmt::Display for NodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u32> for NodeId {
    fn from(num: u32) -> Self {
        Self::from_num(num)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ids_render_canonically() {
        assert_eq!(NodeId::from_num(0xa1b2_c3d4).as_str(), "!a1b2c3d4");
        assert_eq!(NodeId::from_num(0x2a).as_str(), "!0000002a");
    }

    #[test]
    fn subject_safety() {
        assert!(NodeId::from("!a1b2").is_subject_safe());
        assert!(!NodeId::from("").is_subject_safe());
        assert!(!NodeId::from("a.b").is_subject_safe());
        assert!(!NodeId::from("a b").is_subject_safe());
        assert!(!NodeId::from("*").is_subject_safe());
        assert!(!NodeId::from(">").is_subject_safe());
    }

    #[test]
    fn blank_detection() {
        assert!(NodeId::from("   ").is_blank());
        assert!(!NodeId::from("!1").is_blank());
    }
}

//! Transport boundary errors.
//!
//! These are the only errors allowed to change the supervisor's state
//! ([`ConnectError`], [`TransportError`]) or to reach a command caller
//! ([`PublishError`]). Decoder and persistence failures have their own
//! types and never leave their component.

/// Failure to establish a broker connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The broker could not be reached or refused the connection.
    #[error("failed to connect to {url}: {message}")]
    Unreachable {
        /// Broker URL that was tried.
        url: String,
        /// Underlying transport message.
        message: String,
    },

    /// The connection attempt did not finish in time.
    #[error("connection to {url} timed out after {timeout_ms}ms")]
    Timeout {
        /// Broker URL that was tried.
        url: String,
        /// Configured timeout.
        timeout_ms: u64,
    },
}

/// Failure on an established connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Subscribing to a subject filter failed.
    #[error("failed to subscribe to {filter}: {message}")]
    Subscribe {
        /// The subject filter.
        filter: String,
        /// Underlying transport message.
        message: String,
    },

    /// The connection dropped or the receive stream ended.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

/// Failure to send an outbound message.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The transport rejected the message.
    #[error("failed to publish to {topic}: {message}")]
    Rejected {
        /// Target topic.
        topic: String,
        /// Underlying transport message.
        message: String,
    },

    /// The underlying connection is gone.
    #[error("connection lost while publishing to {topic}")]
    ConnectionLost {
        /// Target topic.
        topic: String,
    },
}

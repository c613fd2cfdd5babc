//! Transport session abstraction.
//!
//! The supervisor only talks to these traits, so the reconnect state
//! machine can be driven by a fake transport in tests and by
//! [`NatsConnector`](crate::nats::NatsConnector) in production.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::{ConnectError, PublishError, TransportError};

/// A message delivered by a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Subject or topic the message was published on.
    pub topic: String,
    /// Raw payload.
    pub payload: Bytes,
}

impl InboundMessage {
    /// Build a message from a topic and payload.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Merged stream of everything subscribed so far. Ends on connection loss.
pub type MessageStream = BoxStream<'static, InboundMessage>;

/// One live broker connection.
#[async_trait]
pub trait Session: Send + Sync {
    /// Subscribe to a topic filter.
    async fn subscribe(&self, filter: &str) -> Result<(), TransportError>;

    /// Take the merged stream of all subscriptions made so far.
    ///
    /// Can be called once; later subscriptions are not added to a stream
    /// that was already handed out.
    async fn receive(&self) -> Result<MessageStream, TransportError>;

    /// Publish a payload.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError>;

    /// Flush and close the connection.
    async fn close(&self);
}

/// Factory for [`Session`]s.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Session type produced by this connector.
    type Session: Session + 'static;

    /// Open a new connection.
    async fn connect(&self) -> Result<Self::Session, ConnectError>;

    /// Human readable endpoint for logs.
    fn endpoint(&self) -> String;
}

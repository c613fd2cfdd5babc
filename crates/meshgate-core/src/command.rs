//! Outbound command gateway.
//!
//! Commands are published on `<namespace>/<node_id>/<kind>` only while the
//! supervisor is `Connected`. Nothing is queued: a command issued while
//! disconnected fails immediately with [`CommandError::NotConnected`] and
//! the caller decides whether to retry.

use std::sync::Arc;

use bytes::Bytes;
use meshgate_types::{Command, NodeId};

use crate::config::IdentityConfig;
use crate::error::PublishError;
use crate::supervisor::SessionHandle;

/// Reasons a command was not sent.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// No live session.
    #[error("not connected to the broker")]
    NotConnected,

    /// The target id cannot be used as a subject token.
    #[error("invalid node id: {0:?}")]
    InvalidNodeId(String),

    /// The transport refused the message.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// The payload could not be encoded.
    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Sends commands through the supervisor's live session.
#[derive(Debug, Clone)]
pub struct CommandGateway {
    handle: Arc<SessionHandle>,
    self_id: NodeId,
    namespace: String,
}

impl CommandGateway {
    /// Build a gateway publishing as the configured identity.
    pub fn new(handle: Arc<SessionHandle>, identity: &IdentityConfig) -> Self {
        Self {
            handle,
            self_id: NodeId::new(identity.self_id.clone()),
            namespace: identity.command_namespace.trim_end_matches('/').to_owned(),
        }
    }

    /// Subject a command for `node_id` is published on.
    pub fn topic(&self, node_id: &NodeId, command: &Command) -> String {
        format!("{}/{}/{}", self.namespace, node_id, command.topic_kind())
    }

    /// Publish `command` to `node_id`.
    pub async fn request(&self, node_id: &NodeId, command: &Command) -> Result<(), CommandError> {
        if !node_id.is_subject_safe() {
            return Err(CommandError::InvalidNodeId(node_id.to_string()));
        }

        let topic = self.topic(node_id, command);
        let payload = Bytes::from(serde_json::to_vec(&command.payload(&self.self_id, node_id))?);

        let session = self.handle.connected().await.ok_or(CommandError::NotConnected)?;
        session.publish(&topic, payload).await?;
        drop(session);

        tracing::info!(node_id = %node_id, cmd = command.name(), topic = %topic, "command published");
        Ok(())
    }
}

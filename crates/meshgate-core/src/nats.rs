//! NATS implementation of the session traits.
//!
//! `async-nats` normally reconnects on its own. The gateway wants a single
//! reconnect authority, so the client is built with a minimal reconnect
//! budget and every `Disconnected` event ends the session's receive stream;
//! the supervisor then tears the client down and starts over.

use std::sync::Arc;
use std::time::Duration;

use async_nats::connection::State;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::error::{ConnectError, PublishError, TransportError};
use crate::session::{Connector, InboundMessage, MessageStream, Session};

/// Upper bound for flushing pending publishes while closing.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Opens [`NatsSession`]s against one broker.
#[derive(Debug, Clone)]
pub struct NatsConnector {
    config: TransportConfig,
}

impl NatsConnector {
    /// Create a connector for the configured broker.
    pub const fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    fn options(&self, link_tx: watch::Sender<bool>) -> async_nats::ConnectOptions {
        let link_tx = Arc::new(link_tx);
        let mut options = async_nats::ConnectOptions::new()
            .name("meshgate")
            .connection_timeout(self.config.connect_timeout())
            .max_reconnects(Some(1))
            .event_callback(move |event| {
                let link_tx = Arc::clone(&link_tx);
                async move {
                    match event {
                        async_nats::Event::Disconnected => {
                            link_tx.send_replace(false);
                        }
                        async_nats::Event::Connected => {}
                        other => debug!(event = %other, "nats client event"),
                    }
                }
            });

        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }
        options
    }
}

#[async_trait]
impl Connector for NatsConnector {
    type Session = NatsSession;

    async fn connect(&self) -> Result<NatsSession, ConnectError> {
        let url = self.config.url();
        let (link_tx, link_rx) = watch::channel(true);
        info!(url = %url, "connecting to NATS server");

        let connect = self.options(link_tx).connect(url.as_str());
        let client = tokio::time::timeout(self.config.connect_timeout(), connect)
            .await
            .map_err(|_elapsed| ConnectError::Timeout {
                url: url.clone(),
                timeout_ms: self.config.connect_timeout_ms,
            })?
            .map_err(|e| ConnectError::Unreachable {
                url: url.clone(),
                message: e.to_string(),
            })?;

        info!(url = %url, "NATS connection established");
        Ok(NatsSession {
            client,
            subscribers: Mutex::new(Vec::new()),
            link: link_rx,
        })
    }

    fn endpoint(&self) -> String {
        self.config.url()
    }
}

/// One NATS connection plus the subscriptions made on it.
pub struct NatsSession {
    client: async_nats::Client,
    subscribers: Mutex<Vec<async_nats::Subscriber>>,
    link: watch::Receiver<bool>,
}

#[async_trait]
impl Session for NatsSession {
    async fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        debug!(filter = filter, "subscribing");
        let subscriber = self
            .client
            .subscribe(filter.to_owned())
            .await
            .map_err(|e| TransportError::Subscribe {
                filter: filter.to_owned(),
                message: e.to_string(),
            })?;
        self.subscribers.lock().await.push(subscriber);
        info!(filter = filter, "subscribed");
        Ok(())
    }

    async fn receive(&self) -> Result<MessageStream, TransportError> {
        let subscribers = std::mem::take(&mut *self.subscribers.lock().await);
        if subscribers.is_empty() {
            return Err(TransportError::ConnectionLost(
                "no active subscriptions".to_owned(),
            ));
        }

        let mut link = self.link.clone();
        let lost = async move {
            // A dropped sender also means the client is gone.
            let _ = link.wait_for(|up| !*up).await;
        };

        let merged = stream::select_all(subscribers.into_iter().map(|sub| {
            sub.map(|msg| InboundMessage {
                topic: msg.subject.to_string(),
                payload: msg.payload,
            })
        }));
        Ok(merged.take_until(lost).boxed())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        let link_up = *self.link.borrow();
        if !link_up || matches!(self.client.connection_state(), State::Disconnected) {
            return Err(PublishError::ConnectionLost {
                topic: topic.to_owned(),
            });
        }

        self.client
            .publish(topic.to_owned(), payload)
            .await
            .map_err(|e| PublishError::Rejected {
                topic: topic.to_owned(),
                message: e.to_string(),
            })?;
        self.client
            .flush()
            .await
            .map_err(|e| PublishError::Rejected {
                topic: topic.to_owned(),
                message: e.to_string(),
            })
    }

    async fn close(&self) {
        self.subscribers.lock().await.clear();
        match tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, self.client.flush()).await {
            Ok(Ok(())) => debug!("NATS session closed"),
            Ok(Err(e)) => debug!(error = %e, "flush on close failed"),
            Err(_elapsed) => warn!("flush on close timed out"),
        }
    }
}

impl std::fmt::Debug for NatsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsSession")
            .field("state", &self.client.connection_state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // Integration tests that require a live NATS server are marked #[ignore].
    #[tokio::test]
    #[ignore]
    async fn round_trip_through_live_server() {
        let connector = NatsConnector::new(TransportConfig::default());
        let session = connector.connect().await.unwrap();
        session.subscribe("msh.test.>").await.unwrap();
        let mut messages = session.receive().await.unwrap();

        session
            .publish("msh.test.node", Bytes::from_static(b"{}"))
            .await
            .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(2), messages.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.topic, "msh.test.node");
        assert_eq!(msg.payload, Bytes::from_static(b"{}"));
        session.close().await;
    }

    #[tokio::test]
    async fn unreachable_broker_is_a_connect_error() {
        let config = TransportConfig {
            host: "127.0.0.1".to_owned(),
            port: 1,
            connect_timeout_ms: 500,
            ..TransportConfig::default()
        };
        let result = NatsConnector::new(config).connect().await;
        assert!(result.is_err());
    }

    #[test]
    fn endpoint_is_nats_url() {
        let connector = NatsConnector::new(TransportConfig::default());
        assert_eq!(connector.endpoint(), "nats://127.0.0.1:4222");
    }
}

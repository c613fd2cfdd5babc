//! In-process transport used by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{ConnectError, PublishError, TransportError};
use crate::session::{Connector, InboundMessage, MessageStream, Session};

type Script = Option<mpsc::UnboundedReceiver<InboundMessage>>;

/// Connector that hands out scripted sessions; an exhausted script fails.
#[derive(Debug, Default)]
pub(crate) struct FakeConnector {
    script: Mutex<VecDeque<Script>>,
    attempts: Arc<Mutex<Vec<Instant>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicUsize>,
}

impl FakeConnector {
    /// Next attempt yields a session fed by `rx`; dropping the sender ends it.
    pub(crate) fn push_session(&self, rx: mpsc::UnboundedReceiver<InboundMessage>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Some(rx));
        }
    }

    /// Next attempt fails.
    pub(crate) fn push_failure(&self) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(None);
        }
    }

    pub(crate) fn attempts(&self) -> Arc<Mutex<Vec<Instant>>> {
        Arc::clone(&self.attempts)
    }

    pub(crate) fn subscriptions(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.subscriptions)
    }

    pub(crate) fn closed(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closed)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Session = FakeSession;

    async fn connect(&self) -> Result<FakeSession, ConnectError> {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.push(Instant::now());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front()).flatten();
        match next {
            Some(rx) => {
                let session = FakeSession::new(rx);
                Ok(FakeSession {
                    subscriptions: Arc::clone(&self.subscriptions),
                    closed: Arc::clone(&self.closed),
                    ..session
                })
            }
            None => Err(ConnectError::Unreachable {
                url: self.endpoint(),
                message: "scripted failure".to_owned(),
            }),
        }
    }

    fn endpoint(&self) -> String {
        "fake://broker".to_owned()
    }
}

/// Session backed by an unbounded channel that records what it publishes.
#[derive(Debug)]
pub(crate) struct FakeSession {
    rx: Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    pub(crate) published: Arc<Mutex<Vec<(String, Bytes)>>>,
    pub(crate) reject_publish: AtomicBool,
    closed: Arc<AtomicUsize>,
}

impl FakeSession {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<InboundMessage>) -> Self {
        Self {
            rx: Mutex::new(Some(rx)),
            subscriptions: Arc::default(),
            published: Arc::default(),
            reject_publish: AtomicBool::new(false),
            closed: Arc::default(),
        }
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.push(filter.to_owned());
        }
        Ok(())
    }

    async fn receive(&self) -> Result<MessageStream, TransportError> {
        let rx = self
            .rx
            .lock()
            .ok()
            .and_then(|mut rx| rx.take())
            .ok_or_else(|| TransportError::ConnectionLost("stream already taken".to_owned()))?;
        Ok(stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|m| (m, rx)) }).boxed())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        if self.reject_publish.load(Ordering::SeqCst) {
            return Err(PublishError::Rejected {
                topic: topic.to_owned(),
                message: "scripted rejection".to_owned(),
            });
        }
        if let Ok(mut published) = self.published.lock() {
            published.push((topic.to_owned(), payload));
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

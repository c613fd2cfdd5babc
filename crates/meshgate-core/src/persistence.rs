//! Persistence collaborator.
//!
//! The registry lives in memory; durable storage is an optional side
//! channel. The ingest pipeline never awaits the store: operations are
//! queued on a bounded channel and executed by a worker task, and store
//! failures are logged and swallowed. A full queue drops the operation.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use meshgate_types::NodeId;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Storage backend failure.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// The backend rejected or failed the operation.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored row could not be mapped back to a node.
    #[error("invalid stored row: {0}")]
    InvalidRow(String),
}

/// A node as remembered by the store, used to seed the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredNode {
    /// Node identity.
    pub id: NodeId,
    /// Last known display name.
    pub name: Option<String>,
    /// Last known latitude in degrees.
    pub latitude: Option<f64>,
    /// Last known longitude in degrees.
    pub longitude: Option<f64>,
    /// Last known altitude in metres.
    pub altitude: Option<f64>,
    /// First time the node was heard.
    pub first_seen: DateTime<Utc>,
    /// Last time the node was heard.
    pub last_seen: DateTime<Utc>,
}

/// One queued storage operation.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistOp {
    /// Insert or rename a node.
    UpsertIdentity {
        /// Node identity.
        node_id: NodeId,
        /// Current display name.
        name: String,
        /// When the change was observed.
        seen_at: DateTime<Utc>,
    },
    /// Record a new position.
    UpdatePosition {
        /// Node identity.
        node_id: NodeId,
        /// Latitude in degrees.
        latitude: f64,
        /// Longitude in degrees.
        longitude: f64,
        /// Altitude in metres, when reported.
        altitude: Option<f64>,
        /// When the change was observed.
        seen_at: DateTime<Utc>,
    },
    /// Append a raw message to the event history.
    AppendEvent {
        /// Originating node.
        node_id: NodeId,
        /// Event kind label.
        kind: String,
        /// Transport topic.
        topic: String,
        /// Raw payload as received.
        payload: Bytes,
        /// When the gateway received the message.
        received_at: DateTime<Utc>,
    },
}

impl PersistOp {
    /// Short label used in logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::UpsertIdentity { .. } => "upsert_identity",
            Self::UpdatePosition { .. } => "update_position",
            Self::AppendEvent { .. } => "append_event",
        }
    }
}

/// Durable node storage.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Insert a node or update its display name.
    async fn upsert_identity(
        &self,
        node_id: &NodeId,
        name: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;

    /// Store the latest position of a node.
    async fn update_position(
        &self,
        node_id: &NodeId,
        position: (f64, f64),
        altitude: Option<f64>,
        seen_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;

    /// Append one message to the history.
    async fn append_event(
        &self,
        node_id: &NodeId,
        kind: &str,
        topic: &str,
        payload: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;

    /// Load every stored node.
    async fn load_nodes(&self) -> Result<Vec<StoredNode>, PersistenceError>;
}

/// Store used when no database is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStore;

#[async_trait]
impl NodeStore for NoopStore {
    async fn upsert_identity(
        &self,
        _node_id: &NodeId,
        _name: &str,
        _seen_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn update_position(
        &self,
        _node_id: &NodeId,
        _position: (f64, f64),
        _altitude: Option<f64>,
        _seen_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn append_event(
        &self,
        _node_id: &NodeId,
        _kind: &str,
        _topic: &str,
        _payload: &[u8],
        _received_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn load_nodes(&self) -> Result<Vec<StoredNode>, PersistenceError> {
        Ok(Vec::new())
    }
}

/// Non-blocking front of the persistence worker.
#[derive(Debug, Clone)]
pub struct PersistenceSink {
    tx: mpsc::Sender<PersistOp>,
}

impl PersistenceSink {
    /// Create a sink and the receiving end of its queue.
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<PersistOp>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Spawn the worker that drains the queue into `store`.
    ///
    /// The worker stops when `cancel` fires (after executing whatever is
    /// already queued) or when every sink clone has been dropped.
    pub fn spawn(
        store: Arc<dyn NodeStore>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (sink, rx) = Self::channel(capacity);
        let handle = tokio::spawn(run_worker(store, rx, cancel));
        (sink, handle)
    }

    /// Queue an operation without waiting. Returns whether it was accepted.
    pub fn submit(&self, op: PersistOp) -> bool {
        match self.tx.try_send(op) {
            Ok(()) => true,
            Err(TrySendError::Full(op)) => {
                tracing::warn!(op = op.name(), "persistence queue full, dropping operation");
                false
            }
            Err(TrySendError::Closed(op)) => {
                tracing::debug!(op = op.name(), "persistence worker stopped, dropping operation");
                false
            }
        }
    }
}

async fn run_worker(
    store: Arc<dyn NodeStore>,
    mut rx: mpsc::Receiver<PersistOp>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            op = rx.recv() => match op {
                Some(op) => execute(store.as_ref(), op).await,
                None => break,
            },
        }
    }

    rx.close();
    while let Ok(op) = rx.try_recv() {
        execute(store.as_ref(), op).await;
    }
    tracing::debug!("persistence worker stopped");
}

async fn execute(store: &dyn NodeStore, op: PersistOp) {
    let name = op.name();
    let result = match op {
        PersistOp::UpsertIdentity {
            node_id,
            name,
            seen_at,
        } => store.upsert_identity(&node_id, &name, seen_at).await,
        PersistOp::UpdatePosition {
            node_id,
            latitude,
            longitude,
            altitude,
            seen_at,
        } => {
            store
                .update_position(&node_id, (latitude, longitude), altitude, seen_at)
                .await
        }
        PersistOp::AppendEvent {
            node_id,
            kind,
            topic,
            payload,
            received_at,
        } => {
            store
                .append_event(&node_id, &kind, &topic, &payload, received_at)
                .await
        }
    };

    if let Err(e) = result {
        tracing::warn!(op = name, error = %e, "persistence operation failed");
    }
}

/// In-memory store that records every call.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingStore {
    pub(crate) ops: std::sync::Mutex<Vec<PersistOp>>,
    pub(crate) fail: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl RecordingStore {
    pub(crate) fn ops(&self) -> Vec<PersistOp> {
        self.ops
            .lock()
            .map(|ops| ops.clone())
            .unwrap_or_default()
    }

    fn record(&self, op: PersistOp) -> Result<(), PersistenceError> {
        if self.fail.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(PersistenceError::Backend("unavailable".to_owned()));
        }
        if let Ok(mut ops) = self.ops.lock() {
            ops.push(op);
        }
        Ok(())
    }
}

#[cfg(test)]
#[async_trait]
impl NodeStore for RecordingStore {
    async fn upsert_identity(
        &self,
        node_id: &NodeId,
        name: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        self.record(PersistOp::UpsertIdentity {
            node_id: node_id.clone(),
            name: name.to_owned(),
            seen_at,
        })
    }

    async fn update_position(
        &self,
        node_id: &NodeId,
        position: (f64, f64),
        altitude: Option<f64>,
        seen_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        self.record(PersistOp::UpdatePosition {
            node_id: node_id.clone(),
            latitude: position.0,
            longitude: position.1,
            altitude,
            seen_at,
        })
    }

    async fn append_event(
        &self,
        node_id: &NodeId,
        kind: &str,
        topic: &str,
        payload: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        self.record(PersistOp::AppendEvent {
            node_id: node_id.clone(),
            kind: kind.to_owned(),
            topic: topic.to_owned(),
            payload: Bytes::copy_from_slice(payload),
            received_at,
        })
    }

    async fn load_nodes(&self) -> Result<Vec<StoredNode>, PersistenceError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;

    fn identity(id: &str) -> PersistOp {
        PersistOp::UpsertIdentity {
            node_id: NodeId::from(id),
            name: id.to_owned(),
            seen_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[tokio::test]
    async fn worker_forwards_operations_in_order() {
        let store = Arc::new(RecordingStore::default());
        let cancel = CancellationToken::new();
        let (sink, handle) = PersistenceSink::spawn(store.clone(), 8, cancel.clone());

        assert!(sink.submit(identity("!1")));
        assert!(sink.submit(identity("!2")));
        drop(sink);
        handle.await.unwrap();

        assert_eq!(store.ops(), vec![identity("!1"), identity("!2")]);
    }

    #[tokio::test]
    async fn store_failures_are_swallowed() {
        let store = Arc::new(RecordingStore::default());
        store.fail.store(true, Ordering::Relaxed);
        let (sink, handle) = PersistenceSink::spawn(store.clone(), 8, CancellationToken::new());

        assert!(sink.submit(identity("!1")));
        drop(sink);
        handle.await.unwrap();

        assert!(store.ops().is_empty());
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (sink, mut rx) = PersistenceSink::channel(1);
        assert!(sink.submit(identity("!1")));
        assert!(!sink.submit(identity("!2")));

        assert_eq!(rx.recv().await, Some(identity("!1")));
        assert!(sink.submit(identity("!3")));
    }

    #[tokio::test]
    async fn cancelled_worker_drains_queue_then_stops() {
        let store = Arc::new(RecordingStore::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (sink, handle) = PersistenceSink::spawn(store.clone(), 8, cancel);

        sink.submit(identity("!1"));
        handle.await.unwrap();

        assert!(!sink.submit(identity("!2")));
        assert!(store.ops().len() <= 1);
    }

    #[tokio::test]
    async fn noop_store_loads_nothing() {
        assert!(NoopStore.load_nodes().await.unwrap().is_empty());
    }
}

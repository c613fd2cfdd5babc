//! Session supervisor: the single reconnect authority.
//!
//! ```text
//! Disconnected --start--> Connecting --ok--> Connected
//!                             ^                  |
//!                             |             error / EOF
//!                           timer                |
//!                             |                  v
//!                             +------------- Backoff
//!
//! any state --cancel--> Stopped
//! ```
//!
//! Only one session is live at a time. The live session sits in a slot
//! guarded by an async `RwLock`: publishers hold the read side for the
//! whole publish, and the supervisor takes the write side to tear a session
//! down, so nothing is ever published through a session that is closing.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use meshgate_types::ConnectionState;
use tokio::sync::{RwLock, RwLockReadGuard, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::BackoffConfig;
use crate::error::{PublishError, TransportError};
use crate::ingest::IngestPipeline;
use crate::session::{Connector, MessageStream, Session};

/// Exponential reconnect delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    stable_after: Duration,
    current: Duration,
}

impl Backoff {
    /// Build a backoff from configuration.
    pub fn new(config: &BackoffConfig) -> Self {
        let initial = Duration::from_millis(config.initial_ms);
        Self {
            initial,
            max: Duration::from_millis(config.max_ms).max(initial),
            stable_after: Duration::from_millis(config.stable_after_ms),
            current: initial,
        }
    }

    /// Delay to wait after the next failure; doubles up to the ceiling.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Forget past failures.
    pub const fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Reset if a connection stayed up long enough to count as stable.
    pub fn record_uptime(&mut self, uptime: Duration) {
        if uptime >= self.stable_after {
            self.reset();
        }
    }
}

struct Slot {
    state: ConnectionState,
    session: Option<Arc<dyn Session>>,
}

/// Shared view of the supervisor's state and live session.
pub struct SessionHandle {
    slot: RwLock<Slot>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHandle {
    /// A handle in the `Disconnected` state with no session.
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            slot: RwLock::new(Slot {
                state: ConnectionState::Disconnected,
                session: None,
            }),
            state_tx,
        }
    }

    /// Latest published state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Borrow the live session if the supervisor is `Connected`.
    ///
    /// The returned guard blocks teardown until it is dropped.
    pub async fn connected(&self) -> Option<ConnectedSession<'_>> {
        let guard = self.slot.read().await;
        if guard.state.is_connected() && guard.session.is_some() {
            Some(ConnectedSession { guard })
        } else {
            None
        }
    }

    pub(crate) async fn set_state(&self, state: ConnectionState) {
        let mut slot = self.slot.write().await;
        slot.state = state;
        self.state_tx.send_replace(state);
    }

    pub(crate) async fn install(&self, session: Arc<dyn Session>) {
        let mut slot = self.slot.write().await;
        slot.session = Some(session);
        slot.state = ConnectionState::Connected;
        self.state_tx.send_replace(ConnectionState::Connected);
    }

    /// Detach the live session and move to `next`. Waits for in-flight
    /// publishes; the caller closes the returned session.
    pub(crate) async fn teardown(&self, next: ConnectionState) -> Option<Arc<dyn Session>> {
        let mut slot = self.slot.write().await;
        let session = slot.session.take();
        slot.state = next;
        self.state_tx.send_replace(next);
        session
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Read access to a connected session.
pub struct ConnectedSession<'a> {
    guard: RwLockReadGuard<'a, Slot>,
}

impl ConnectedSession<'_> {
    /// Publish through the live session.
    pub async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        match &self.guard.session {
            Some(session) => session.publish(topic, payload).await,
            None => Err(PublishError::ConnectionLost {
                topic: topic.to_owned(),
            }),
        }
    }
}

enum SessionEnd {
    Cancelled,
    Failed { uptime: Option<Duration> },
}

/// Drives connect, subscribe, receive and reconnect.
pub struct SessionSupervisor<C: Connector> {
    connector: C,
    topics: Vec<String>,
    backoff: Backoff,
    pipeline: IngestPipeline,
    handle: Arc<SessionHandle>,
}

impl<C: Connector> SessionSupervisor<C> {
    /// Wire a supervisor.
    pub fn new(
        connector: C,
        topics: Vec<String>,
        backoff: &BackoffConfig,
        pipeline: IngestPipeline,
        handle: Arc<SessionHandle>,
    ) -> Self {
        Self {
            connector,
            topics,
            backoff: Backoff::new(backoff),
            pipeline,
            handle,
        }
    }

    /// Shared state handle.
    pub fn handle(&self) -> Arc<SessionHandle> {
        Arc::clone(&self.handle)
    }

    /// Run until `cancel` fires. Ends in `Stopped`.
    pub async fn run(mut self, cancel: CancellationToken) {
        let endpoint = self.connector.endpoint();
        info!(endpoint = %endpoint, topics = ?self.topics, "session supervisor started");

        while !cancel.is_cancelled() {
            self.handle.set_state(ConnectionState::Connecting).await;

            let uptime = match self.run_session(&cancel).await {
                SessionEnd::Cancelled => break,
                SessionEnd::Failed { uptime } => uptime,
            };
            if let Some(uptime) = uptime {
                self.backoff.record_uptime(uptime);
            }

            let delay = self.backoff.next_delay();
            self.handle.set_state(ConnectionState::backoff(delay)).await;
            warn!(
                endpoint = %endpoint,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "reconnecting after backoff"
            );

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        if let Some(session) = self.handle.teardown(ConnectionState::Stopped).await {
            session.close().await;
        }
        info!(endpoint = %endpoint, "session supervisor stopped");
    }

    async fn run_session(&self, cancel: &CancellationToken) -> SessionEnd {
        let connected = tokio::select! {
            () = cancel.cancelled() => return SessionEnd::Cancelled,
            result = self.connector.connect() => result,
        };
        let session: Arc<dyn Session> = match connected {
            Ok(session) => Arc::new(session),
            Err(e) => {
                error!(error = %e, "broker connection failed");
                return SessionEnd::Failed { uptime: None };
            }
        };

        let mut messages = match self.open_stream(session.as_ref()).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "subscription failed");
                session.close().await;
                return SessionEnd::Failed { uptime: None };
            }
        };

        let connected_at = Instant::now();
        self.handle.install(Arc::clone(&session)).await;
        drop(session);
        info!(topics = ?self.topics, "connected and subscribed");

        let end = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break SessionEnd::Cancelled,
                next = messages.next() => match next {
                    Some(msg) => {
                        self.pipeline.ingest(&msg.topic, &msg.payload);
                    }
                    None => {
                        let e = TransportError::ConnectionLost("receive stream ended".to_owned());
                        error!(error = %e, "session ended");
                        break SessionEnd::Failed { uptime: Some(connected_at.elapsed()) };
                    }
                },
            }
        };

        drop(messages);
        let next = match end {
            SessionEnd::Cancelled => ConnectionState::Stopped,
            SessionEnd::Failed { .. } => ConnectionState::Disconnected,
        };
        if let Some(session) = self.handle.teardown(next).await {
            session.close().await;
        }
        end
    }

    async fn open_stream(&self, session: &dyn Session) -> Result<MessageStream, TransportError> {
        for filter in &self.topics {
            session.subscribe(filter).await?;
        }
        session.receive().await
    }
}

impl<C: Connector> std::fmt::Debug for SessionSupervisor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSupervisor")
            .field("endpoint", &self.connector.endpoint())
            .field("topics", &self.topics)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing
)]
mod tests {
    use meshgate_types::NodeId;
    use tokio::sync::mpsc;

    use super::*;
    use crate::decoder::Decoder;
    use crate::persistence::PersistenceSink;
    use crate::registry::Registry;
    use crate::session::InboundMessage;
    use crate::testing::FakeConnector;

    fn secs(list: &[u64]) -> Vec<Duration> {
        list.iter().copied().map(Duration::from_secs).collect()
    }

    fn supervisor(connector: FakeConnector) -> (SessionSupervisor<FakeConnector>, Arc<Registry>) {
        let registry = Arc::new(Registry::new());
        let (sink, _rx) = PersistenceSink::channel(16);
        let pipeline = IngestPipeline::new(Decoder::new("!meshgate"), Arc::clone(&registry), sink);
        let supervisor = SessionSupervisor::new(
            connector,
            vec!["msh.>".to_owned()],
            &BackoffConfig::default(),
            pipeline,
            Arc::new(SessionHandle::new()),
        );
        (supervisor, registry)
    }

    async fn sleep_secs(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[test]
    fn backoff_doubles_to_ceiling() {
        let mut backoff = Backoff::new(&BackoffConfig::default());
        let delays: Vec<Duration> = (0..7).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays, secs(&[3, 6, 12, 24, 48, 60, 60]));
    }

    #[test]
    fn stable_uptime_resets_backoff() {
        let mut backoff = Backoff::new(&BackoffConfig::default());
        backoff.next_delay();
        backoff.next_delay();

        backoff.record_uptime(Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(12));

        backoff.record_uptime(Duration::from_secs(30));
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connects_back_off_exponentially() {
        let connector = FakeConnector::default();
        let attempts = connector.attempts();
        let (supervisor, _) = supervisor(connector);
        let handle = supervisor.handle();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervisor.run(cancel.clone()));

        sleep_secs(100).await;
        assert_eq!(handle.state(), ConnectionState::backoff(Duration::from_secs(60)));

        let times = attempts.lock().unwrap().clone();
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps, secs(&[3, 6, 12, 24, 48]));

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(handle.state(), ConnectionState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn messages_reach_registry_and_loss_triggers_reconnect() {
        let connector = FakeConnector::default();
        let (first_tx, first_rx) = mpsc::unbounded_channel();
        let (_second_tx, second_rx) = mpsc::unbounded_channel();
        connector.push_session(first_rx);
        connector.push_session(second_rx);
        let subscriptions = connector.subscriptions();

        let (supervisor, registry) = supervisor(connector);
        let handle = supervisor.handle();
        let mut states = handle.subscribe_state();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervisor.run(cancel.clone()));

        states.wait_for(ConnectionState::is_connected).await.unwrap();
        assert_eq!(subscriptions.lock().unwrap().as_slice(), ["msh.>"]);

        first_tx
            .send(InboundMessage::new(
                "msh.json",
                r#"{"from":"!a1b2","type":"nodeinfo","payload":{"longname":"Alpha Beta"}}"#,
            ))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.get(&NodeId::from("!a1b2")).unwrap().name, "Alpha Beta");

        drop(first_tx);
        sleep_secs(1).await;
        assert_eq!(handle.state(), ConnectionState::backoff(Duration::from_secs(3)));
        assert!(handle.connected().await.is_none());

        sleep_secs(3).await;
        assert_eq!(handle.state(), ConnectionState::Connected);
        assert!(handle.connected().await.is_some());

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(handle.state(), ConnectionState::Stopped);
        assert!(handle.connected().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stable_session_resets_backoff() {
        let connector = FakeConnector::default();
        let (tx, rx) = mpsc::unbounded_channel();
        connector.push_failure();
        connector.push_session(rx);

        let (supervisor, _) = supervisor(connector);
        let handle = supervisor.handle();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervisor.run(cancel.clone()));

        // t=1: first attempt failed.
        sleep_secs(1).await;
        assert_eq!(handle.state(), ConnectionState::backoff(Duration::from_secs(3)));

        // t=4: second attempt connected at t=3.
        sleep_secs(3).await;
        assert_eq!(handle.state(), ConnectionState::Connected);

        // t=49: the session drops after 46s of uptime.
        sleep_secs(45).await;
        drop(tx);
        sleep_secs(1).await;
        assert_eq!(handle.state(), ConnectionState::backoff(Duration::from_secs(3)));

        // t=54: the attempt at t=52 failed and the delay doubles again.
        sleep_secs(4).await;
        assert_eq!(handle.state(), ConnectionState::backoff(Duration::from_secs(6)));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_connected_stops_and_closes() {
        let connector = FakeConnector::default();
        let (_tx, rx) = mpsc::unbounded_channel();
        connector.push_session(rx);
        let closed = connector.closed();

        let (supervisor, _) = supervisor(connector);
        let handle = supervisor.handle();
        let mut states = handle.subscribe_state();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervisor.run(cancel.clone()));

        states.wait_for(ConnectionState::is_connected).await.unwrap();
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(handle.state(), ConnectionState::Stopped);
        assert_eq!(closed.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}

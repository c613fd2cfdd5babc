//! Periodic registry change broadcaster.
//!
//! Samples [`Registry::version`] on a fixed tick and broadcasts a fresh
//! snapshot only when the version moved. Delivery goes through a tokio
//! `broadcast` channel, so sending never blocks and a slow subscriber
//! skips ahead to the newest snapshot instead of stalling the others.

use std::sync::Arc;
use std::time::Duration;

use meshgate_types::RegistrySnapshot;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::PublisherConfig;
use crate::registry::Registry;

/// Broadcasts registry snapshots when the registry changes.
#[derive(Debug)]
pub struct ChangePublisher {
    registry: Arc<Registry>,
    tx: broadcast::Sender<Arc<RegistrySnapshot>>,
    tick: Duration,
    last_sent: u64,
}

impl ChangePublisher {
    /// Create a publisher. Nothing is sent until [`ChangePublisher::run`]
    /// or [`ChangePublisher::tick_once`] is called.
    pub fn new(registry: Arc<Registry>, config: &PublisherConfig) -> Self {
        let (tx, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            registry,
            tx,
            tick: config.tick().max(Duration::from_millis(1)),
            last_sent: 0,
        }
    }

    /// Sender side, for handing out further subscriptions.
    pub fn sender(&self) -> broadcast::Sender<Arc<RegistrySnapshot>> {
        self.tx.clone()
    }

    /// Subscribe to future snapshots.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RegistrySnapshot>> {
        self.tx.subscribe()
    }

    /// Version of the last snapshot broadcast.
    pub const fn last_sent(&self) -> u64 {
        self.last_sent
    }

    /// Run one sampling step. Returns the snapshot if one was broadcast.
    pub fn tick_once(&mut self) -> Option<Arc<RegistrySnapshot>> {
        if self.registry.version() == self.last_sent {
            return None;
        }

        let snapshot = Arc::new(self.registry.snapshot());
        self.last_sent = snapshot.version;
        let receivers = self.tx.send(Arc::clone(&snapshot)).unwrap_or(0);
        tracing::debug!(
            version = snapshot.version,
            nodes = snapshot.len(),
            receivers,
            "broadcast registry snapshot"
        );
        Some(snapshot)
    }

    /// Tick until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(tick_ms = ?self.tick, "change publisher started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick_once();
                }
            }
        }
        tracing::info!(last_sent = self.last_sent, "change publisher stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use meshgate_types::event::field_names;
    use meshgate_types::{Event, EventKind, NodeId};

    use super::*;

    fn nodeinfo(id: &str, name: &str) -> Event {
        Event::new(NodeId::from(id), EventKind::NodeInfo, "msh.test", Utc::now())
            .with_field(field_names::LONG_NAME, name)
    }

    fn publisher() -> (ChangePublisher, Arc<Registry>) {
        let registry = Arc::new(Registry::new());
        let publisher = ChangePublisher::new(Arc::clone(&registry), &PublisherConfig::default());
        (publisher, registry)
    }

    #[test]
    fn idle_registry_emits_nothing() {
        let (mut publisher, _) = publisher();
        assert!(publisher.tick_once().is_none());
        assert!(publisher.tick_once().is_none());
    }

    #[test]
    fn at_most_one_emission_across_idle_ticks() {
        let (mut publisher, registry) = publisher();
        let mut rx = publisher.subscribe();

        registry.apply(&nodeinfo("!1", "One"));
        assert!(publisher.tick_once().is_some());
        assert!(publisher.tick_once().is_none());
        assert!(publisher.tick_once().is_none());

        let snapshot = rx.try_recv().unwrap();
        assert_eq!(snapshot.version, 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn merged_apply_triggers_fresh_emission() {
        let (mut publisher, registry) = publisher();
        registry.apply(&nodeinfo("!1", "One"));
        publisher.tick_once();

        // Non-merging apply leaves the version alone.
        registry.apply(&nodeinfo("!1", "One"));
        assert!(publisher.tick_once().is_none());

        registry.apply(&nodeinfo("!1", "Uno"));
        let snapshot = publisher.tick_once().unwrap();
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.get(&NodeId::from("!1")).unwrap().name, "Uno");
        assert_eq!(publisher.last_sent(), 2);
    }

    #[test]
    fn lagging_subscriber_skips_to_newest() {
        let registry = Arc::new(Registry::new());
        let config = PublisherConfig {
            tick_ms: 500,
            channel_capacity: 1,
        };
        let mut publisher = ChangePublisher::new(Arc::clone(&registry), &config);
        let mut rx = publisher.subscribe();

        for i in 0..3 {
            registry.apply(&nodeinfo("!1", &format!("name-{i}")));
            publisher.tick_once();
        }

        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Lagged(_))));
        assert_eq!(rx.try_recv().unwrap().version, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_delivers_changes() {
        let (publisher, registry) = publisher();
        let mut rx = publisher.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(publisher.run(cancel.clone()));

        registry.apply(&nodeinfo("!a1b2", "Alpha Beta"));
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.len(), 1);

        cancel.cancel();
        task.await.unwrap();
    }
}

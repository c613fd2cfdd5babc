//! Gateway binary for Meshgate.
//!
//! Wires the broker session, ingest pipeline, node registry, persistence
//! worker, change publisher and observer API together, then runs until
//! `Ctrl-C`.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `meshgate.yaml` (or `MESHGATE_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Open the node store (`PostgreSQL` when `DATABASE_URL` is set)
//! 4. Seed the registry from stored nodes
//! 5. Start the persistence worker
//! 6. Start the session supervisor on the NATS connector
//! 7. Start the change publisher
//! 8. Start the Observer API server
//! 9. Wait for `Ctrl-C`, cancel everything, join the tasks

mod error;

use std::path::PathBuf;
use std::sync::Arc;

use meshgate_core::config::LoggingConfig;
use meshgate_core::{
    ChangePublisher, CommandGateway, Decoder, GatewayConfig, IngestPipeline, NatsConnector,
    NodeStore, NoopStore, PersistenceSink, Registry, SessionHandle, SessionSupervisor,
};
use meshgate_db::{PgNodeStore, PostgresPool};
use meshgate_observer::{AppState, ServerConfig};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::GatewayError;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "meshgate.yaml";

/// Application entry point for the gateway.
///
/// # Errors
///
/// Returns an error if configuration, the database or the observer
/// listener cannot be set up. Broker outages are not errors: the
/// supervisor keeps retrying.
#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config = load_config()?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!(
        broker = %config.transport.url(),
        topics = ?config.transport.topics,
        self_id = config.gateway.self_id,
        observer_port = config.observer.port,
        "meshgate-gateway starting"
    );

    // 3. Open the node store.
    let (store, pool) = open_store(&config).await?;

    // 4. Seed the registry.
    let registry = Arc::new(Registry::new());
    let restored = registry.restore(store.load_nodes().await?);
    info!(restored, "Registry seeded from store");

    let cancel = CancellationToken::new();

    // 5. Persistence worker.
    let (sink, persistence_task) = PersistenceSink::spawn(
        Arc::clone(&store),
        config.persistence.queue_capacity,
        cancel.clone(),
    );

    // 6. Session supervisor.
    let pipeline = IngestPipeline::new(
        Decoder::new(config.gateway.self_id.as_str()),
        Arc::clone(&registry),
        sink,
    );
    let session = Arc::new(SessionHandle::new());
    let supervisor = SessionSupervisor::new(
        NatsConnector::new(config.transport.clone()),
        config.transport.topics.clone(),
        &config.backoff,
        pipeline,
        Arc::clone(&session),
    );
    let supervisor_task = tokio::spawn(supervisor.run(cancel.clone()));

    // 7. Change publisher.
    let publisher = ChangePublisher::new(Arc::clone(&registry), &config.publisher);
    let snapshots = publisher.sender();
    let publisher_task = tokio::spawn(publisher.run(cancel.clone()));

    // 8. Observer API.
    let commands = CommandGateway::new(Arc::clone(&session), &config.gateway);
    let app_state = Arc::new(AppState::new(
        Arc::clone(&registry),
        snapshots,
        Arc::clone(&session),
        commands,
    ));
    let observer_task = match meshgate_observer::spawn_observer(
        &ServerConfig::from(&config.observer),
        app_state,
        cancel.clone(),
    )
    .await
    {
        Ok(handle) => handle,
        Err(e) => {
            cancel.cancel();
            return Err(GatewayError::from(e).into());
        }
    };

    // 9. Run until interrupted.
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl-C, shutting down");
    }
    info!("Shutdown requested");
    cancel.cancel();

    join("observer", observer_task).await;
    join("supervisor", supervisor_task).await;
    join("publisher", publisher_task).await;
    join("persistence", persistence_task).await;

    if let Some(pool) = pool {
        pool.close().await;
    }

    info!(
        nodes = registry.len(),
        version = registry.version(),
        "meshgate-gateway shutdown complete"
    );
    Ok(())
}

/// Load configuration from `MESHGATE_CONFIG` or `meshgate.yaml`.
///
/// A missing file means defaults; environment overrides apply either way.
fn load_config() -> Result<GatewayConfig, GatewayError> {
    let path = std::env::var_os("MESHGATE_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);

    if path.exists() {
        Ok(GatewayConfig::from_file(&path)?)
    } else {
        Ok(GatewayConfig::from_env()?)
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.is_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Connect the configured store, or fall back to a no-op store.
async fn open_store(
    config: &GatewayConfig,
) -> Result<(Arc<dyn NodeStore>, Option<PostgresPool>), GatewayError> {
    let Some(url) = config.persistence.database_url.as_deref() else {
        info!("No database configured, node history will not be stored");
        return Ok((Arc::new(NoopStore), None));
    };

    let pool = PostgresPool::connect_url(url).await?;
    pool.run_migrations().await?;
    info!("PostgreSQL node store ready");
    Ok((Arc::new(PgNodeStore::new(&pool)), Some(pool)))
}

/// Await a background task and log how it ended.
async fn join(name: &'static str, handle: JoinHandle<()>) {
    match handle.await {
        Ok(()) => tracing::debug!(task = name, "task finished"),
        Err(e) => tracing::error!(task = name, error = %e, "task failed"),
    }
}

//! Node and event history storage.
//!
//! Identity and position writes are upserts, so they can arrive in any
//! order (the sink may drop one under load). Timestamps only move forward:
//! `first_seen` keeps the earliest value and `last_seen` the latest.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meshgate_core::{NodeStore, PersistenceError, StoredNode};
use meshgate_types::NodeId;
use sqlx::PgPool;

use crate::error::DbError;
use crate::postgres::PostgresPool;

/// A row from the `nodes` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NodeRow {
    /// Node identity.
    pub node_id: String,
    /// Last known display name.
    pub name: Option<String>,
    /// Last known latitude.
    pub latitude: Option<f64>,
    /// Last known longitude.
    pub longitude: Option<f64>,
    /// Last known altitude.
    pub altitude: Option<f64>,
    /// First time the node was heard.
    pub first_seen: DateTime<Utc>,
    /// Last time the node was heard.
    pub last_seen: DateTime<Utc>,
}

impl From<NodeRow> for StoredNode {
    fn from(row: NodeRow) -> Self {
        Self {
            id: NodeId::new(row.node_id),
            name: row.name,
            latitude: row.latitude,
            longitude: row.longitude,
            altitude: row.altitude,
            first_seen: row.first_seen,
            last_seen: row.last_seen,
        }
    }
}

/// [`NodeStore`] backed by `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PgNodeStore {
    pool: PgPool,
}

impl PgNodeStore {
    /// Create a store on an existing pool.
    pub fn new(pool: &PostgresPool) -> Self {
        Self {
            pool: pool.pool().clone(),
        }
    }

    async fn upsert_identity_row(
        &self,
        node_id: &NodeId,
        name: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO nodes (node_id, name, first_seen, last_seen) \
             VALUES ($1, $2, $3, $3) \
             ON CONFLICT (node_id) DO UPDATE SET \
                 name = EXCLUDED.name, \
                 first_seen = LEAST(nodes.first_seen, EXCLUDED.first_seen), \
                 last_seen = GREATEST(nodes.last_seen, EXCLUDED.last_seen)",
        )
        .bind(node_id.as_str())
        .bind(name)
        .bind(seen_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_position_row(
        &self,
        node_id: &NodeId,
        (latitude, longitude): (f64, f64),
        altitude: Option<f64>,
        seen_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO nodes (node_id, latitude, longitude, altitude, first_seen, last_seen) \
             VALUES ($1, $2, $3, $4, $5, $5) \
             ON CONFLICT (node_id) DO UPDATE SET \
                 latitude = EXCLUDED.latitude, \
                 longitude = EXCLUDED.longitude, \
                 altitude = COALESCE(EXCLUDED.altitude, nodes.altitude), \
                 last_seen = GREATEST(nodes.last_seen, EXCLUDED.last_seen)",
        )
        .bind(node_id.as_str())
        .bind(latitude)
        .bind(longitude)
        .bind(altitude)
        .bind(seen_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_event_row(
        &self,
        node_id: &NodeId,
        kind: &str,
        topic: &str,
        payload: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO events (node_id, kind, topic, payload, received_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(node_id.as_str())
        .bind(kind)
        .bind(topic)
        .bind(payload)
        .bind(received_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_rows(&self) -> Result<Vec<NodeRow>, DbError> {
        let rows = sqlx::query_as::<_, NodeRow>(
            "SELECT node_id, name, latitude, longitude, altitude, first_seen, last_seen \
             FROM nodes ORDER BY node_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl NodeStore for PgNodeStore {
    async fn upsert_identity(
        &self,
        node_id: &NodeId,
        name: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        Ok(self.upsert_identity_row(node_id, name, seen_at).await?)
    }

    async fn update_position(
        &self,
        node_id: &NodeId,
        position: (f64, f64),
        altitude: Option<f64>,
        seen_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        Ok(self
            .update_position_row(node_id, position, altitude, seen_at)
            .await?)
    }

    async fn append_event(
        &self,
        node_id: &NodeId,
        kind: &str,
        topic: &str,
        payload: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        Ok(self
            .append_event_row(node_id, kind, topic, payload, received_at)
            .await?)
    }

    async fn load_nodes(&self) -> Result<Vec<StoredNode>, PersistenceError> {
        let rows = self.load_rows().await?;
        tracing::info!(nodes = rows.len(), "loaded stored nodes");
        Ok(rows.into_iter().map(StoredNode::from).collect())
    }
}

//! SQL for dashboard snapshot/event persistence with retention caps.

use crate::database::Database;
use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Clone)]
pub struct DashboardRepo {
    db: Database,
}

impl DashboardRepo {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persists one dashboard snapshot and prunes the session down to the
    /// retention cap, oldest rows first.
    ///
    /// # Errors
    /// Returns an error when the insert or prune fails.
    pub async fn insert_snapshot(
        &self,
        session_id: Uuid,
        generated_at: DateTime<Utc>,
        payload: &serde_json::Value,
        retention: u32,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO dashboard_snapshots (session_id, generated_at, payload_json)
            VALUES ($1, $2, $3)
            ",
        )
        .bind(session_id)
        .bind(generated_at)
        .bind(payload)
        .execute(self.db.pool())
        .await?;

        sqlx::query(
            r"
            DELETE FROM dashboard_snapshots
            WHERE session_id = $1 AND id NOT IN (
                SELECT id FROM dashboard_snapshots
                WHERE session_id = $1
                ORDER BY generated_at DESC
                LIMIT $2
            )
            ",
        )
        .bind(session_id)
        .bind(i64::from(retention))
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Persists one timeline event and prunes to the retention cap.
    ///
    /// # Errors
    /// Returns an error when the insert or prune fails.
    pub async fn insert_event(
        &self,
        session_id: Uuid,
        ts: DateTime<Utc>,
        category: &str,
        message: &str,
        metadata: &serde_json::Value,
        retention: u32,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO dashboard_events (session_id, ts, category, message, metadata_json)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(session_id)
        .bind(ts)
        .bind(category)
        .bind(message)
        .bind(metadata)
        .execute(self.db.pool())
        .await?;

        sqlx::query(
            r"
            DELETE FROM dashboard_events
            WHERE session_id = $1 AND id NOT IN (
                SELECT id FROM dashboard_events
                WHERE session_id = $1
                ORDER BY ts DESC
                LIMIT $2
            )
            ",
        )
        .bind(session_id)
        .bind(i64::from(retention))
        .execute(self.db.pool())
        .await?;
        Ok(())
    }
}

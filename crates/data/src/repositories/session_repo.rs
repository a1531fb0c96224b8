//! SQL for the `sessions` table.

use crate::database::Database;
use crate::models::Session;
use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts or rewrites a session row.
    ///
    /// # Errors
    /// Returns an error when the upsert fails.
    pub async fn upsert(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO sessions
            (session_id, strategy, started_at, ended_at, last_heartbeat,
             health, lifecycle_stage, paused, metadata_json)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (session_id) DO UPDATE
            SET ended_at = EXCLUDED.ended_at,
                last_heartbeat = EXCLUDED.last_heartbeat,
                health = EXCLUDED.health,
                lifecycle_stage = EXCLUDED.lifecycle_stage,
                paused = EXCLUDED.paused,
                metadata_json = EXCLUDED.metadata_json
            ",
        )
        .bind(session.session_id)
        .bind(&session.strategy)
        .bind(session.started_at)
        .bind(session.ended_at)
        .bind(session.last_heartbeat)
        .bind(session.health.as_str())
        .bind(session.lifecycle_stage.as_str())
        .bind(session.paused)
        .bind(&session.metadata)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Touches the heartbeat column only.
    ///
    /// # Errors
    /// Returns an error when the update fails.
    pub async fn heartbeat(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE sessions SET last_heartbeat = $2 WHERE session_id = $1")
            .bind(session_id)
            .bind(at)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }
}

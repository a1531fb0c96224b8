//! SQL for the `strategy_state` table (orchestrator state blob).

use crate::database::Database;
use anyhow::Result;
use chrono::Utc;

pub struct StrategyStateRepo {
    db: Database,
}

impl StrategyStateRepo {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Saves the orchestrator's serialized state under its strategy name.
    ///
    /// # Errors
    /// Returns an error when the upsert fails.
    pub async fn save(&self, strategy_name: &str, state: &serde_json::Value) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO strategy_state (strategy_name, state_data_json, last_updated)
            VALUES ($1, $2, $3)
            ON CONFLICT (strategy_name) DO UPDATE
            SET state_data_json = EXCLUDED.state_data_json,
                last_updated = EXCLUDED.last_updated
            ",
        )
        .bind(strategy_name)
        .bind(state)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Loads the last saved state blob, if any.
    ///
    /// # Errors
    /// Returns an error on query failure.
    pub async fn load(&self, strategy_name: &str) -> Result<Option<serde_json::Value>> {
        let state: Option<serde_json::Value> = sqlx::query_scalar(
            "SELECT state_data_json FROM strategy_state WHERE strategy_name = $1",
        )
        .bind(strategy_name)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(state)
    }
}

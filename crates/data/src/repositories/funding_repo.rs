//! SQL for the `funding_accruals` table.

use crate::database::Database;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

pub struct FundingRepo {
    db: Database,
}

impl FundingRepo {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Records one funding payment credited or debited on a leg.
    ///
    /// # Errors
    /// Returns an error when the insert fails.
    pub async fn insert(
        &self,
        position_id: Uuid,
        dex: &str,
        timestamp: DateTime<Utc>,
        amount: Decimal,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO funding_accruals (position_id, dex, timestamp, amount)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(position_id)
        .bind(dex)
        .bind(timestamp)
        .bind(amount)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Sum of funding payments over the position's lifetime.
    ///
    /// # Errors
    /// Returns an error on query failure.
    pub async fn cumulative(&self, position_id: Uuid) -> Result<Decimal> {
        let total: Option<Decimal> = sqlx::query_scalar(
            r"
            SELECT COALESCE(SUM(amount), 0)
            FROM funding_accruals
            WHERE position_id = $1
            ",
        )
        .bind(position_id)
        .fetch_one(self.db.pool())
        .await?;
        Ok(total.unwrap_or(Decimal::ZERO))
    }

    /// Timestamp of the last accrual recorded for one leg, used as the
    /// trade-history scan checkpoint.
    ///
    /// # Errors
    /// Returns an error on query failure.
    pub async fn last_accrual_at(
        &self,
        position_id: Uuid,
        dex: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let last: Option<DateTime<Utc>> = sqlx::query_scalar(
            r"
            SELECT MAX(timestamp)
            FROM funding_accruals
            WHERE position_id = $1 AND dex = $2
            ",
        )
        .bind(position_id)
        .bind(dex)
        .fetch_one(self.db.pool())
        .await?;
        Ok(last)
    }
}

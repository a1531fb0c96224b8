//! The position store: exclusive owner of hedge records.
//!
//! All writes to a given position funnel through its per-position logical
//! lock; reads go straight to SQL. Closing is idempotent: closing an
//! already-closed hedge returns it unchanged with no side effects.

use crate::database::Database;
use crate::models::{FundingArbPosition, PositionStatus, TradeFill};
use crate::repositories::{FundingRepo, PositionRepo, TradeFillRepo};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub struct PositionStore {
    positions: PositionRepo,
    fills: TradeFillRepo,
    funding: FundingRepo,
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl PositionStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            positions: PositionRepo::new(db.clone()),
            fills: TradeFillRepo::new(db.clone()),
            funding: FundingRepo::new(db),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Per-position logical lock; all mutators hold it across their write.
    fn lock_for(&self, id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.locks.lock().entry(id).or_default())
    }

    fn drop_lock(&self, id: Uuid) {
        self.locks.lock().remove(&id);
    }

    /// Persists a new hedge.
    ///
    /// # Errors
    /// Returns an error when the insert fails.
    pub async fn create(&self, position: &FundingArbPosition) -> Result<()> {
        let lock = self.lock_for(position.id);
        let _guard = lock.lock().await;
        self.positions.insert(position).await
    }

    /// Rewrites a hedge's mutable state.
    ///
    /// # Errors
    /// Returns an error when the update fails.
    pub async fn update(&self, position: &FundingArbPosition) -> Result<()> {
        let lock = self.lock_for(position.id);
        let _guard = lock.lock().await;
        self.positions.update(position).await
    }

    /// Closes a hedge with its exit reason and realized PnL.
    ///
    /// Idempotent: an already-closed hedge is returned unchanged.
    ///
    /// # Errors
    /// Returns an error when the hedge does not exist or the write fails.
    pub async fn close(
        &self,
        id: Uuid,
        exit_reason: &str,
        realized_pnl: Decimal,
    ) -> Result<FundingArbPosition> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut position = self
            .positions
            .get(id)
            .await?
            .with_context(|| format!("position {id} not found"))?;

        if position.status == PositionStatus::Closed {
            tracing::debug!(position_id = %id, "close on already-closed position, no-op");
            return Ok(position);
        }

        position.status = PositionStatus::Closed;
        position.exit_reason = Some(exit_reason.to_string());
        position.pnl_usd = realized_pnl;
        position.closed_at = Some(Utc::now());
        self.positions.update(&position).await?;

        drop(_guard);
        self.drop_lock(id);
        Ok(position)
    }

    /// Fetches one hedge.
    ///
    /// # Errors
    /// Returns an error on query failure.
    pub async fn get(&self, id: Uuid) -> Result<Option<FundingArbPosition>> {
        self.positions.get(id).await
    }

    /// All open hedges.
    ///
    /// # Errors
    /// Returns an error on query failure.
    pub async fn open_positions(&self) -> Result<Vec<FundingArbPosition>> {
        self.positions.open_positions().await
    }

    /// The single open hedge on a triple, used by the opener to detect
    /// increment-existing scenarios.
    ///
    /// # Errors
    /// Returns an error on query failure.
    pub async fn find_open_position(
        &self,
        symbol: &str,
        long_dex: &str,
        short_dex: &str,
    ) -> Result<Option<FundingArbPosition>> {
        self.positions.find_open(symbol, long_dex, short_dex).await
    }

    /// Authoritative funding tally for a hedge.
    ///
    /// # Errors
    /// Returns an error on query failure.
    pub async fn cumulative_funding(&self, position_id: Uuid) -> Result<Decimal> {
        self.funding.cumulative(position_id).await
    }

    /// Records one funding payment.
    ///
    /// # Errors
    /// Returns an error when the insert fails.
    pub async fn record_funding(
        &self,
        position_id: Uuid,
        dex: &str,
        timestamp: DateTime<Utc>,
        amount: Decimal,
    ) -> Result<()> {
        self.funding.insert(position_id, dex, timestamp, amount).await
    }

    /// Checkpoint for the funding trade-history scan on one leg.
    ///
    /// # Errors
    /// Returns an error on query failure.
    pub async fn last_funding_accrual(
        &self,
        position_id: Uuid,
        dex: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        self.funding.last_accrual_at(position_id, dex).await
    }

    /// Records one consolidated trade fill.
    ///
    /// # Errors
    /// Returns an error when the insert fails.
    pub async fn record_fill(&self, fill: &TradeFill) -> Result<()> {
        self.fills.insert(fill).await
    }

    /// All fills for a hedge.
    ///
    /// # Errors
    /// Returns an error on query failure.
    pub async fn fills_for(&self, position_id: Uuid) -> Result<Vec<TradeFill>> {
        self.fills.for_position(position_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    fn store() -> PositionStore {
        // Lazy pool: no connection is made until a query runs, which these
        // tests never do.
        let pool = PgPoolOptions::new()
            .connect_lazy("postgresql://localhost/funding_arb_test")
            .expect("lazy pool construction is infallible for a valid url");
        PositionStore::new(Database::from_pool(pool))
    }

    #[tokio::test]
    async fn lock_is_shared_per_position() {
        let store = store();
        let id = Uuid::new_v4();
        let a = store.lock_for(id);
        let b = store.lock_for(id);
        assert!(Arc::ptr_eq(&a, &b));

        let other = store.lock_for(Uuid::new_v4());
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[tokio::test]
    async fn dropping_lock_releases_entry() {
        let store = store();
        let id = Uuid::new_v4();
        let a = store.lock_for(id);
        store.drop_lock(id);
        let b = store.lock_for(id);
        assert!(!Arc::ptr_eq(&a, &b));
    }
}

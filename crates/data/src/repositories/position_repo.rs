//! SQL for the `positions` table.
//!
//! Scalar columns mirror the table; per-leg records, the fills audit array,
//! and monitor-cache fields travel in `metadata_json` so the schema stays
//! stable as leg metadata grows.

use crate::database::Database;
use crate::models::{FillFingerprint, FundingArbPosition, LegMetadata, PositionStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PositionMetadata {
    #[serde(default)]
    legs: BTreeMap<String, LegMetadata>,
    #[serde(default)]
    fills: Vec<FillFingerprint>,
    #[serde(default)]
    current_divergence: Option<Decimal>,
    #[serde(default)]
    last_checked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
struct PositionRow {
    id: Uuid,
    symbol: String,
    long_dex: String,
    short_dex: String,
    size_usd: Decimal,
    entry_long_rate: Decimal,
    entry_short_rate: Decimal,
    entry_divergence: Decimal,
    opened_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    status: String,
    exit_reason: Option<String>,
    pnl_usd: Decimal,
    total_fees_paid: Decimal,
    metadata_json: serde_json::Value,
}

fn to_metadata(position: &FundingArbPosition) -> Result<serde_json::Value> {
    serde_json::to_value(PositionMetadata {
        legs: position.legs.clone(),
        fills: position.fills.clone(),
        current_divergence: position.current_divergence,
        last_checked_at: position.last_checked_at,
    })
    .context("serializing position metadata")
}

fn from_row(row: PositionRow) -> Result<FundingArbPosition> {
    let metadata: PositionMetadata =
        serde_json::from_value(row.metadata_json).context("deserializing position metadata")?;
    let status = PositionStatus::parse(&row.status)
        .with_context(|| format!("unknown position status '{}'", row.status))?;

    Ok(FundingArbPosition {
        id: row.id,
        symbol: row.symbol,
        long_dex: row.long_dex,
        short_dex: row.short_dex,
        size_usd: row.size_usd,
        entry_long_rate: row.entry_long_rate,
        entry_short_rate: row.entry_short_rate,
        entry_divergence: row.entry_divergence,
        opened_at: row.opened_at,
        closed_at: row.closed_at,
        status,
        exit_reason: row.exit_reason,
        pnl_usd: row.pnl_usd,
        total_fees_paid: row.total_fees_paid,
        current_divergence: metadata.current_divergence,
        last_checked_at: metadata.last_checked_at,
        legs: metadata.legs,
        fills: metadata.fills,
    })
}

const SELECT_COLUMNS: &str = r"
    SELECT id, symbol, long_dex, short_dex, size_usd,
           entry_long_rate, entry_short_rate, entry_divergence,
           opened_at, closed_at, status, exit_reason,
           pnl_usd, total_fees_paid, metadata_json
    FROM positions
";

pub struct PositionRepo {
    db: Database,
}

impl PositionRepo {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a new hedge row.
    ///
    /// # Errors
    /// Returns an error when the insert fails.
    pub async fn insert(&self, position: &FundingArbPosition) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO positions
            (id, symbol, long_dex, short_dex, size_usd,
             entry_long_rate, entry_short_rate, entry_divergence,
             opened_at, closed_at, status, exit_reason,
             pnl_usd, total_fees_paid, metadata_json)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ",
        )
        .bind(position.id)
        .bind(&position.symbol)
        .bind(&position.long_dex)
        .bind(&position.short_dex)
        .bind(position.size_usd)
        .bind(position.entry_long_rate)
        .bind(position.entry_short_rate)
        .bind(position.entry_divergence)
        .bind(position.opened_at)
        .bind(position.closed_at)
        .bind(position.status.as_str())
        .bind(&position.exit_reason)
        .bind(position.pnl_usd)
        .bind(position.total_fees_paid)
        .bind(to_metadata(position)?)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Rewrites all mutable columns of an existing hedge.
    ///
    /// # Errors
    /// Returns an error when the update fails.
    pub async fn update(&self, position: &FundingArbPosition) -> Result<()> {
        sqlx::query(
            r"
            UPDATE positions
            SET size_usd = $2, entry_long_rate = $3, entry_short_rate = $4,
                entry_divergence = $5, closed_at = $6, status = $7,
                exit_reason = $8, pnl_usd = $9, total_fees_paid = $10,
                metadata_json = $11
            WHERE id = $1
            ",
        )
        .bind(position.id)
        .bind(position.size_usd)
        .bind(position.entry_long_rate)
        .bind(position.entry_short_rate)
        .bind(position.entry_divergence)
        .bind(position.closed_at)
        .bind(position.status.as_str())
        .bind(&position.exit_reason)
        .bind(position.pnl_usd)
        .bind(position.total_fees_paid)
        .bind(to_metadata(position)?)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Fetches one hedge by id.
    ///
    /// # Errors
    /// Returns an error on query failure or corrupt metadata.
    pub async fn get(&self, id: Uuid) -> Result<Option<FundingArbPosition>> {
        let row = sqlx::query_as::<_, PositionRow>(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        row.map(from_row).transpose()
    }

    /// All open hedges, oldest first.
    ///
    /// # Errors
    /// Returns an error on query failure or corrupt metadata.
    pub async fn open_positions(&self) -> Result<Vec<FundingArbPosition>> {
        let rows = sqlx::query_as::<_, PositionRow>(&format!(
            "{SELECT_COLUMNS} WHERE status = 'open' ORDER BY opened_at ASC"
        ))
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(from_row).collect()
    }

    /// The single open hedge on a (symbol, long venue, short venue) triple.
    ///
    /// # Errors
    /// Returns an error on query failure or corrupt metadata.
    pub async fn find_open(
        &self,
        symbol: &str,
        long_dex: &str,
        short_dex: &str,
    ) -> Result<Option<FundingArbPosition>> {
        let row = sqlx::query_as::<_, PositionRow>(&format!(
            "{SELECT_COLUMNS} WHERE status = 'open' AND symbol = $1 AND long_dex = $2 AND short_dex = $3"
        ))
        .bind(symbol)
        .bind(long_dex)
        .bind(short_dex)
        .fetch_optional(self.db.pool())
        .await?;
        row.map(from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funding_arb_core::{ExecutionMode, Side};
    use rust_decimal_macros::dec;

    fn sample() -> FundingArbPosition {
        let mut legs = BTreeMap::new();
        legs.insert(
            "aster".to_string(),
            LegMetadata {
                side: Side::Long,
                entry_price: dec!(49995.5),
                quantity: dec!(0.02),
                order_id: Some("42".to_string()),
                fees_paid: dec!(0.19998),
                slippage_usd: dec!(0.01),
                execution_mode: ExecutionMode::LimitOnly,
                exposure_usd: dec!(999.91),
                last_updated: Utc::now(),
                contract_id: Some("BTCUSDT".to_string()),
                quantity_multiplier: Decimal::ONE,
                price_multiplier: Decimal::ONE,
                mark_price: Some(dec!(50001.123456)),
                unrealized_pnl: Some(dec!(0.11)),
                funding_accrued: Some(dec!(0.031)),
                margin_reserved: Some(dec!(100)),
                liquidation_price: Some(dec!(45100.5)),
            },
        );
        FundingArbPosition {
            id: Uuid::new_v4(),
            symbol: "BTC".to_string(),
            long_dex: "aster".to_string(),
            short_dex: "lighter".to_string(),
            size_usd: dec!(1000),
            entry_long_rate: dec!(-0.0001),
            entry_short_rate: dec!(0.0003),
            entry_divergence: dec!(0.0004),
            opened_at: Utc::now(),
            closed_at: None,
            status: PositionStatus::Open,
            exit_reason: None,
            pnl_usd: Decimal::ZERO,
            total_fees_paid: dec!(0.4),
            current_divergence: Some(dec!(0.00035)),
            last_checked_at: Some(Utc::now()),
            legs,
            fills: vec![FillFingerprint {
                timestamp: Utc::now(),
                size_usd: dec!(1000),
                long_rate: dec!(-0.0001),
                short_rate: dec!(0.0003),
                divergence: dec!(0.0004),
                long_order_id: Some("42".to_string()),
                short_order_id: Some("77".to_string()),
            }],
        }
    }

    #[test]
    fn metadata_round_trip_preserves_every_field() {
        // The persistence-layer round trip: scalar columns plus the
        // metadata blob must reconstruct the position value-for-value,
        // including leg Decimals.
        let position = sample();
        let metadata = to_metadata(&position).unwrap();
        let row = PositionRow {
            id: position.id,
            symbol: position.symbol.clone(),
            long_dex: position.long_dex.clone(),
            short_dex: position.short_dex.clone(),
            size_usd: position.size_usd,
            entry_long_rate: position.entry_long_rate,
            entry_short_rate: position.entry_short_rate,
            entry_divergence: position.entry_divergence,
            opened_at: position.opened_at,
            closed_at: position.closed_at,
            status: position.status.as_str().to_string(),
            exit_reason: position.exit_reason.clone(),
            pnl_usd: position.pnl_usd,
            total_fees_paid: position.total_fees_paid,
            metadata_json: metadata,
        };
        let restored = from_row(row).unwrap();
        assert_eq!(restored, position);
        assert_eq!(
            restored.long_leg().unwrap().mark_price,
            Some(dec!(50001.123456))
        );
    }

    #[test]
    fn unknown_status_is_rejected() {
        let position = sample();
        let row = PositionRow {
            id: position.id,
            symbol: position.symbol.clone(),
            long_dex: position.long_dex.clone(),
            short_dex: position.short_dex.clone(),
            size_usd: position.size_usd,
            entry_long_rate: position.entry_long_rate,
            entry_short_rate: position.entry_short_rate,
            entry_divergence: position.entry_divergence,
            opened_at: position.opened_at,
            closed_at: None,
            status: "liquidated?".to_string(),
            exit_reason: None,
            pnl_usd: Decimal::ZERO,
            total_fees_paid: Decimal::ZERO,
            metadata_json: serde_json::json!({}),
        };
        assert!(from_row(row).is_err());
    }

    #[test]
    fn empty_metadata_defaults_cleanly() {
        let position = sample();
        let row = PositionRow {
            id: position.id,
            symbol: position.symbol,
            long_dex: position.long_dex,
            short_dex: position.short_dex,
            size_usd: position.size_usd,
            entry_long_rate: position.entry_long_rate,
            entry_short_rate: position.entry_short_rate,
            entry_divergence: position.entry_divergence,
            opened_at: position.opened_at,
            closed_at: None,
            status: "open".to_string(),
            exit_reason: None,
            pnl_usd: Decimal::ZERO,
            total_fees_paid: Decimal::ZERO,
            metadata_json: serde_json::json!({}),
        };
        let restored = from_row(row).unwrap();
        assert!(restored.legs.is_empty());
        assert!(restored.fills.is_empty());
        assert!(restored.current_divergence.is_none());
    }
}

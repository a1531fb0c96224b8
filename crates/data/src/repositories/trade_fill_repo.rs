//! SQL for the `trade_fills` table.

use crate::database::Database;
use crate::models::{TradeFill, TradeType};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use funding_arb_core::OrderSide;
use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
struct TradeFillRow {
    id: Uuid,
    position_id: Uuid,
    account_id: Option<String>,
    trade_type: String,
    dex_id: String,
    symbol_id: String,
    order_id: String,
    trade_id: Option<String>,
    timestamp: DateTime<Utc>,
    side: String,
    total_quantity: Decimal,
    weighted_avg_price: Decimal,
    total_fee: Decimal,
    fee_currency: String,
    realized_pnl: Option<Decimal>,
    realized_funding: Option<Decimal>,
    fill_count: i32,
}

fn from_row(row: TradeFillRow) -> Result<TradeFill> {
    let trade_type = match row.trade_type.as_str() {
        "entry" => TradeType::Entry,
        "exit" => TradeType::Exit,
        other => anyhow::bail!("unknown trade type '{other}'"),
    };
    let side = match row.side.as_str() {
        "buy" => OrderSide::Buy,
        "sell" => OrderSide::Sell,
        other => anyhow::bail!("unknown side '{other}'"),
    };
    Ok(TradeFill {
        id: row.id,
        position_id: row.position_id,
        account_id: row.account_id,
        trade_type,
        dex_id: row.dex_id,
        symbol_id: row.symbol_id,
        order_id: row.order_id,
        trade_id: row.trade_id,
        timestamp: row.timestamp,
        side,
        total_quantity: row.total_quantity,
        weighted_avg_price: row.weighted_avg_price,
        total_fee: row.total_fee,
        fee_currency: row.fee_currency,
        realized_pnl: row.realized_pnl,
        realized_funding: row.realized_funding,
        fill_count: row.fill_count,
    })
}

pub struct TradeFillRepo {
    db: Database,
}

impl TradeFillRepo {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts one consolidated fill record.
    ///
    /// # Errors
    /// Returns an error when the insert fails.
    pub async fn insert(&self, fill: &TradeFill) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO trade_fills
            (id, position_id, account_id, trade_type, dex_id, symbol_id,
             order_id, trade_id, timestamp, side, total_quantity,
             weighted_avg_price, total_fee, fee_currency, realized_pnl,
             realized_funding, fill_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ",
        )
        .bind(fill.id)
        .bind(fill.position_id)
        .bind(&fill.account_id)
        .bind(fill.trade_type.as_str())
        .bind(&fill.dex_id)
        .bind(&fill.symbol_id)
        .bind(&fill.order_id)
        .bind(&fill.trade_id)
        .bind(fill.timestamp)
        .bind(fill.side.as_str())
        .bind(fill.total_quantity)
        .bind(fill.weighted_avg_price)
        .bind(fill.total_fee)
        .bind(&fill.fee_currency)
        .bind(fill.realized_pnl)
        .bind(fill.realized_funding)
        .bind(fill.fill_count)
        .execute(self.db.pool())
        .await
        .context("inserting trade fill")?;
        Ok(())
    }

    /// All fills recorded for a position, oldest first.
    ///
    /// # Errors
    /// Returns an error on query failure.
    pub async fn for_position(&self, position_id: Uuid) -> Result<Vec<TradeFill>> {
        let rows = sqlx::query_as::<_, TradeFillRow>(
            r"
            SELECT id, position_id, account_id, trade_type, dex_id, symbol_id,
                   order_id, trade_id, timestamp, side, total_quantity,
                   weighted_avg_price, total_fee, fee_currency, realized_pnl,
                   realized_funding, fill_count
            FROM trade_fills
            WHERE position_id = $1
            ORDER BY timestamp ASC
            ",
        )
        .bind(position_id)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(from_row).collect()
    }
}

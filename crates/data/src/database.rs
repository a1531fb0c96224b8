//! Postgres connection pool and schema bootstrap.

use anyhow::Result;
use funding_arb_core::EngineError;
use sqlx::{postgres::PgPoolOptions, PgPool};

/// Shared connection pool for all repositories.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connects to Postgres; fatal at startup when unreachable.
    ///
    /// # Errors
    /// Returns [`EngineError::DatabaseUnavailable`] when the pool cannot be
    /// established.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, EngineError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| EngineError::DatabaseUnavailable(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool (tests, shared composition roots).
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the schema when missing.
    ///
    /// # Errors
    /// Returns an error when any DDL statement fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        let statements = [
            r"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id UUID PRIMARY KEY,
                strategy TEXT NOT NULL,
                started_at TIMESTAMPTZ NOT NULL,
                ended_at TIMESTAMPTZ,
                last_heartbeat TIMESTAMPTZ NOT NULL,
                health TEXT NOT NULL,
                lifecycle_stage TEXT NOT NULL,
                paused BOOLEAN NOT NULL DEFAULT FALSE,
                metadata_json JSONB NOT NULL DEFAULT '{}'::jsonb
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS positions (
                id UUID PRIMARY KEY,
                symbol TEXT NOT NULL,
                long_dex TEXT NOT NULL,
                short_dex TEXT NOT NULL,
                size_usd NUMERIC NOT NULL,
                entry_long_rate NUMERIC NOT NULL,
                entry_short_rate NUMERIC NOT NULL,
                entry_divergence NUMERIC NOT NULL,
                opened_at TIMESTAMPTZ NOT NULL,
                closed_at TIMESTAMPTZ,
                status TEXT NOT NULL,
                exit_reason TEXT,
                pnl_usd NUMERIC NOT NULL DEFAULT 0,
                total_fees_paid NUMERIC NOT NULL DEFAULT 0,
                metadata_json JSONB NOT NULL DEFAULT '{}'::jsonb
            )
            ",
            r"
            CREATE INDEX IF NOT EXISTS idx_positions_open
            ON positions (status) WHERE status = 'open'
            ",
            r"
            CREATE TABLE IF NOT EXISTS trade_fills (
                id UUID PRIMARY KEY,
                position_id UUID NOT NULL REFERENCES positions (id),
                account_id TEXT,
                trade_type TEXT NOT NULL,
                dex_id TEXT NOT NULL,
                symbol_id TEXT NOT NULL,
                order_id TEXT NOT NULL,
                trade_id TEXT,
                timestamp TIMESTAMPTZ NOT NULL,
                side TEXT NOT NULL,
                total_quantity NUMERIC NOT NULL,
                weighted_avg_price NUMERIC NOT NULL,
                total_fee NUMERIC NOT NULL,
                fee_currency TEXT NOT NULL,
                realized_pnl NUMERIC,
                realized_funding NUMERIC,
                fill_count INTEGER NOT NULL DEFAULT 1
            )
            ",
            r"
            CREATE INDEX IF NOT EXISTS idx_trade_fills_position
            ON trade_fills (position_id)
            ",
            r"
            CREATE TABLE IF NOT EXISTS funding_accruals (
                id BIGSERIAL PRIMARY KEY,
                position_id UUID NOT NULL REFERENCES positions (id),
                dex TEXT NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                amount NUMERIC NOT NULL
            )
            ",
            r"
            CREATE INDEX IF NOT EXISTS idx_funding_accruals_position
            ON funding_accruals (position_id)
            ",
            r"
            CREATE TABLE IF NOT EXISTS strategy_state (
                strategy_name TEXT PRIMARY KEY,
                state_data_json JSONB NOT NULL,
                last_updated TIMESTAMPTZ NOT NULL
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS dashboard_snapshots (
                id BIGSERIAL PRIMARY KEY,
                session_id UUID NOT NULL,
                generated_at TIMESTAMPTZ NOT NULL,
                payload_json JSONB NOT NULL
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS dashboard_events (
                id BIGSERIAL PRIMARY KEY,
                session_id UUID NOT NULL,
                ts TIMESTAMPTZ NOT NULL,
                category TEXT NOT NULL,
                message TEXT NOT NULL,
                metadata_json JSONB NOT NULL DEFAULT '{}'::jsonb
            )
            ",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

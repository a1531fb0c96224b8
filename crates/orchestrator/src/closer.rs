//! Position closing pipeline.
//!
//! Claims the position in the shared closing set, flattens both legs
//! atomically (aggressive limits for normal exits, markets for critical
//! ones), computes realized PnL including cumulative funding, records the
//! exit fills, and marks the hedge closed.

use chrono::Utc;
use funding_arb_connector::VenueMap;
use funding_arb_core::{EngineError, ExecutionMode, Side};
use funding_arb_data::{FundingArbPosition, PositionStatus, PositionStore, TradeFill, TradeType};
use funding_arb_execution::{AtomicExecutor, ClosingGuard, ClosingSet, FillRecord, OrderSpec};
use funding_arb_monitor::RealTimeProfitMonitor;
use funding_arb_risk::ExitReason;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct PositionCloser {
    venues: Arc<VenueMap>,
    store: Arc<PositionStore>,
    executor: Arc<AtomicExecutor>,
    closing: Arc<ClosingSet>,
    order_timeout: Duration,
}

impl PositionCloser {
    #[must_use]
    pub fn new(
        venues: Arc<VenueMap>,
        store: Arc<PositionStore>,
        executor: Arc<AtomicExecutor>,
        closing: Arc<ClosingSet>,
        order_timeout: Duration,
    ) -> Self {
        Self { venues, store, executor, closing, order_timeout }
    }

    /// Closes a hedge, claiming it in the closing set first.
    ///
    /// Returns the closed position, or `None` when another component
    /// already holds the claim.
    ///
    /// # Errors
    /// Returns an error when execution or persistence fails; the claim is
    /// released either way.
    pub async fn close(
        &self,
        position: &FundingArbPosition,
        reason: &ExitReason,
        monitor: &Arc<RealTimeProfitMonitor>,
    ) -> Result<Option<FundingArbPosition>, EngineError> {
        let Some(guard) = self.closing.begin_close(position.id) else {
            tracing::debug!(position_id = %position.id, "close already in flight, skipping");
            return Ok(None);
        };
        self.close_with_guard(position, reason, guard, monitor).await.map(Some)
    }

    /// Closes a hedge whose claim the caller already holds (profit-monitor
    /// path and manual closes).
    ///
    /// # Errors
    /// Returns an error when execution or persistence fails.
    pub async fn close_with_guard(
        &self,
        position: &FundingArbPosition,
        reason: &ExitReason,
        guard: ClosingGuard,
        monitor: &Arc<RealTimeProfitMonitor>,
    ) -> Result<FundingArbPosition, EngineError> {
        debug_assert_eq!(guard.position_id(), position.id);

        // Idempotence: a hedge that already closed stays closed.
        if position.status == PositionStatus::Closed {
            return Ok(position.clone());
        }

        tracing::info!(
            position_id = %position.id,
            symbol = %position.symbol,
            reason = %reason,
            critical = reason.is_critical(),
            "closing hedge"
        );

        let mut pending = position.clone();
        pending.status = PositionStatus::PendingClose;
        pending.exit_reason = Some(reason.code());
        self.store.update(&pending).await.map_err(storage_error)?;

        // Critical exits cross the spread immediately; normal exits prefer
        // maker fills.
        let mode = if reason.is_critical() {
            ExecutionMode::MarketOnly
        } else {
            ExecutionMode::AggressiveLimit
        };

        let specs = self.close_specs(position, mode)?;
        let result = self.executor.execute_atomically(specs, false).await;

        if !result.all_filled {
            tracing::error!(
                position_id = %position.id,
                error = result.error_message.as_deref().unwrap_or("unknown"),
                "close execution incomplete, hedge remains pending"
            );
            return Err(EngineError::PartialFill(
                result.error_message.unwrap_or_else(|| "close incomplete".to_string()),
            ));
        }

        let funding = self
            .store
            .cumulative_funding(position.id)
            .await
            .unwrap_or(Decimal::ZERO);
        let realized = realized_pnl(position, &result.filled_orders, funding);

        self.record_exit_fills(position, &result.filled_orders).await;

        let closed = self
            .store
            .close(position.id, &reason.code(), realized)
            .await
            .map_err(storage_error)?;

        monitor.unregister_position(position.id);
        drop(guard);

        tracing::info!(
            position_id = %position.id,
            symbol = %position.symbol,
            realized_pnl = %realized,
            funding = %funding,
            "hedge closed"
        );
        Ok(closed)
    }

    fn close_specs(
        &self,
        position: &FundingArbPosition,
        mode: ExecutionMode,
    ) -> Result<Vec<OrderSpec>, EngineError> {
        let mut specs = Vec::with_capacity(position.legs.len());
        for (venue_name, leg) in &position.legs {
            if leg.quantity.is_zero() {
                continue;
            }
            let venue = self.venues.get(venue_name).ok_or_else(|| {
                EngineError::PreflightValidation(format!(
                    "venue '{venue_name}' has no trading client for close"
                ))
            })?;
            specs.push(OrderSpec {
                venue: Arc::clone(venue),
                symbol: position.symbol.clone(),
                side: leg.side.close_order_side(),
                size_usd: leg.exposure_usd,
                quantity: leg.quantity.abs(),
                execution_mode: mode,
                timeout: self.order_timeout,
                limit_price: None,
                limit_offset_pct: None,
                reduce_only: true,
            });
        }
        if specs.is_empty() {
            return Err(EngineError::PreflightValidation(
                "position has no legs with quantity to close".to_string(),
            ));
        }
        Ok(specs)
    }

    async fn record_exit_fills(&self, position: &FundingArbPosition, fills: &[FillRecord]) {
        for fill in fills {
            let Some(leg) = position.legs.get(&fill.venue) else { continue };
            let record = TradeFill {
                id: Uuid::new_v4(),
                position_id: position.id,
                account_id: None,
                trade_type: TradeType::Exit,
                dex_id: fill.venue.clone(),
                symbol_id: position.symbol.clone(),
                order_id: fill.order_id.clone().unwrap_or_default(),
                trade_id: None,
                timestamp: Utc::now(),
                side: leg.side.close_order_side(),
                total_quantity: fill.filled_quantity,
                weighted_avg_price: fill.fill_price,
                total_fee: fill.fee,
                fee_currency: "USD".to_string(),
                realized_pnl: Some(leg_price_pnl(leg.side, leg.entry_price, fill)),
                realized_funding: None,
                fill_count: 1,
            };
            if let Err(e) = self.store.record_fill(&record).await {
                tracing::warn!(error = %e, venue = %fill.venue, "exit fill record failed");
            }
        }
    }
}

fn leg_price_pnl(side: Side, entry_price: Decimal, fill: &FillRecord) -> Decimal {
    match side {
        Side::Long => (fill.fill_price - entry_price) * fill.filled_quantity,
        Side::Short => (entry_price - fill.fill_price) * fill.filled_quantity,
    }
}

/// Realized PnL of a full close: per-leg price PnL plus cumulative funding
/// minus all fees (entry fees already on the position, exit fees on the
/// fills).
fn realized_pnl(
    position: &FundingArbPosition,
    fills: &[FillRecord],
    cumulative_funding: Decimal,
) -> Decimal {
    let price_pnl: Decimal = fills
        .iter()
        .filter_map(|fill| {
            position
                .legs
                .get(&fill.venue)
                .map(|leg| leg_price_pnl(leg.side, leg.entry_price, fill))
        })
        .sum();
    let exit_fees: Decimal = fills.iter().map(|f| f.fee).sum();
    price_pnl + cumulative_funding - exit_fees - position.total_fees_paid
}

fn storage_error(err: anyhow::Error) -> EngineError {
    EngineError::DatabaseUnavailable(err.to_string())
}

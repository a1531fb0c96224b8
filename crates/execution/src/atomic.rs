//! Atomic multi-leg executor.
//!
//! All legs are submitted concurrently; fills are tracked through the
//! venue's private stream with trade-history polling as a fallback when the
//! stream is down. When any leg fails to fill inside its timeout and
//! rollback is requested, resting orders are canceled venue-side and every
//! filled leg is flattened with a reduce-only market order.

use crate::closing_set::ClosingSet;
use crate::price_provider::PriceProvider;
use chrono::Utc;
use funding_arb_connector::Venue;
use funding_arb_core::{Bbo, EngineError, ExecutionMode, OrderSide, OrderStatus, TimeInForce};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

// =============================================================================
// Configuration
// =============================================================================

/// Executor-wide settings; per-order details live on [`OrderSpec`].
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Abort opens when venue mids diverge beyond this fraction.
    pub max_entry_price_divergence_pct: Option<Decimal>,
    /// Estimate liquidation distance before opening.
    pub enable_liquidation_prevention: bool,
    /// Minimum `|entry − liq| / entry` required per leg.
    pub min_liquidation_distance_pct: Option<Decimal>,
    /// Offset used by `aggressive_limit` when the spec carries none.
    pub limit_order_offset_pct: Option<Decimal>,
    /// Order timeout when the spec carries none.
    pub default_timeout: Duration,
    /// Trade-history polling cadence while waiting for fills.
    pub history_poll_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_entry_price_divergence_pct: Some(dec!(0.005)),
            enable_liquidation_prevention: true,
            min_liquidation_distance_pct: Some(dec!(0.05)),
            limit_order_offset_pct: Some(dec!(0.0005)),
            default_timeout: Duration::from_secs(30),
            history_poll_interval: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Order specs and results
// =============================================================================

/// One leg of an atomic execution.
#[derive(Clone)]
pub struct OrderSpec {
    pub venue: Arc<Venue>,
    /// Normalized symbol.
    pub symbol: String,
    pub side: OrderSide,
    /// Target notional in USD (informational; quantity is authoritative).
    pub size_usd: Decimal,
    /// Target quantity in venue-native units.
    pub quantity: Decimal,
    pub execution_mode: ExecutionMode,
    pub timeout: Duration,
    /// Pre-aligned limit price; derived from BBO when absent.
    pub limit_price: Option<Decimal>,
    pub limit_offset_pct: Option<Decimal>,
    pub reduce_only: bool,
}

impl std::fmt::Debug for OrderSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderSpec")
            .field("venue", &self.venue.name)
            .field("symbol", &self.symbol)
            .field("side", &self.side)
            .field("quantity", &self.quantity)
            .field("mode", &self.execution_mode)
            .finish()
    }
}

/// Fill outcome of one leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillRecord {
    pub venue: String,
    pub order_id: Option<String>,
    pub fill_price: Decimal,
    pub filled_quantity: Decimal,
    pub requested_quantity: Decimal,
    /// Quantity filled passively (resting limit).
    pub maker_qty: Decimal,
    /// Quantity filled aggressively (market / crossing remainder).
    pub taker_qty: Decimal,
    pub slippage_usd: Decimal,
    pub fee: Decimal,
    pub execution_mode_used: ExecutionMode,
}

impl FillRecord {
    /// True when the leg filled its full requested quantity.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.filled_quantity >= self.requested_quantity && !self.requested_quantity.is_zero()
    }
}

/// Result of one atomic execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicExecutionResult {
    pub all_filled: bool,
    pub filled_orders: Vec<FillRecord>,
    pub total_slippage_usd: Decimal,
    pub residual_imbalance_usd: Decimal,
    pub rollback_performed: bool,
    pub rollback_cost_usd: Decimal,
    pub error_message: Option<String>,
}

#[derive(Debug, Default)]
struct WaitOutcome {
    filled: Decimal,
    avg_price: Option<Decimal>,
    fee: Decimal,
    terminal: bool,
}

struct LegOutcome {
    record: FillRecord,
    error: Option<String>,
}

// =============================================================================
// Executor
// =============================================================================

pub struct AtomicExecutor {
    price_provider: Arc<PriceProvider>,
    closing: Arc<ClosingSet>,
    config: ExecutorConfig,
}

impl AtomicExecutor {
    #[must_use]
    pub fn new(
        price_provider: Arc<PriceProvider>,
        closing: Arc<ClosingSet>,
        config: ExecutorConfig,
    ) -> Self {
        Self { price_provider, closing, config }
    }

    /// The shared closing set both the risk controller and the profit
    /// monitor coordinate through.
    #[must_use]
    pub fn closing_set(&self) -> &Arc<ClosingSet> {
        &self.closing
    }

    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Pre-flight validation for an open: positive BBO on both venues,
    /// bounded inter-venue price divergence, and sufficient estimated
    /// liquidation distance at the normalized leverage.
    ///
    /// # Errors
    /// Returns [`EngineError::PreflightValidation`] naming the failed check.
    pub async fn preflight_hedge(
        &self,
        long: &OrderSpec,
        short: &OrderSpec,
        leverage: u32,
    ) -> Result<(), EngineError> {
        let min_notional = long.size_usd.min(short.size_usd);
        if min_notional < dec!(5) {
            return Err(EngineError::PreflightValidation(format!(
                "leg notional {min_notional} below the $5 execution floor"
            )));
        }

        let (long_bbo, short_bbo) = tokio::join!(
            self.price_provider.get_bbo(&long.venue, &long.symbol),
            self.price_provider.get_bbo(&short.venue, &short.symbol),
        );
        let long_bbo = long_bbo?;
        let short_bbo = short_bbo?;

        let long_mid = mid_of(&long_bbo)?;
        let short_mid = mid_of(&short_bbo)?;

        if let Some(max_divergence) = self.config.max_entry_price_divergence_pct {
            let divergence = (long_mid - short_mid).abs() / long_mid.min(short_mid);
            if divergence > max_divergence {
                return Err(EngineError::PreflightValidation(format!(
                    "entry price divergence {divergence:.6} exceeds {max_divergence:.6}"
                )));
            }
        }

        if self.config.enable_liquidation_prevention {
            if let Some(min_distance) = self.config.min_liquidation_distance_pct {
                if leverage == 0 {
                    return Err(EngineError::PreflightValidation(
                        "leverage of zero cannot be margined".to_string(),
                    ));
                }
                // Isolated linear perp: liquidation sits ~1/leverage away
                // from entry before maintenance margin.
                let distance = Decimal::ONE / Decimal::from(leverage);
                if distance < min_distance {
                    return Err(EngineError::PreflightValidation(format!(
                        "estimated liquidation distance {distance:.4} below minimum {min_distance:.4} at {leverage}x"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Submits all legs concurrently and reconciles the outcome.
    ///
    /// With `rollback_on_partial`, any incomplete leg triggers venue-side
    /// cancels (done per leg at timeout) and reduce-only market flattening
    /// of every filled leg.
    pub async fn execute_atomically(
        &self,
        orders: Vec<OrderSpec>,
        rollback_on_partial: bool,
    ) -> AtomicExecutionResult {
        if orders.is_empty() {
            return AtomicExecutionResult {
                all_filled: false,
                filled_orders: Vec::new(),
                total_slippage_usd: Decimal::ZERO,
                residual_imbalance_usd: Decimal::ZERO,
                rollback_performed: false,
                rollback_cost_usd: Decimal::ZERO,
                error_message: Some("no orders supplied".to_string()),
            };
        }

        tracing::info!(
            legs = orders.len(),
            symbols = ?orders.iter().map(|o| o.symbol.as_str()).collect::<Vec<_>>(),
            "submitting atomic execution"
        );

        let outcomes = join_all(orders.iter().map(|spec| self.execute_leg(spec))).await;

        let all_filled = outcomes.iter().all(|o| o.record.is_complete() && o.error.is_none());
        let total_slippage: Decimal = outcomes.iter().map(|o| o.record.slippage_usd).sum();
        let residual = residual_imbalance_usd(&orders, &outcomes);

        if all_filled {
            return AtomicExecutionResult {
                all_filled: true,
                filled_orders: outcomes.into_iter().map(|o| o.record).collect(),
                total_slippage_usd: total_slippage,
                residual_imbalance_usd: residual,
                rollback_performed: false,
                rollback_cost_usd: Decimal::ZERO,
                error_message: None,
            };
        }

        let error_message = outcomes
            .iter()
            .filter_map(|o| {
                if o.record.is_complete() && o.error.is_none() {
                    None
                } else {
                    Some(format!(
                        "{}: filled {}/{}{}",
                        o.record.venue,
                        o.record.filled_quantity,
                        o.record.requested_quantity,
                        o.error.as_deref().map(|e| format!(" ({e})")).unwrap_or_default()
                    ))
                }
            })
            .collect::<Vec<_>>()
            .join("; ");

        tracing::error!(error = %error_message, "atomic execution incomplete");

        let mut rollback_performed = false;
        let mut rollback_cost = Decimal::ZERO;
        if rollback_on_partial {
            for (spec, outcome) in orders.iter().zip(&outcomes) {
                if outcome.record.filled_quantity > Decimal::ZERO {
                    rollback_performed = true;
                    rollback_cost += self.rollback_leg(spec, &outcome.record).await;
                }
            }
        }

        AtomicExecutionResult {
            all_filled: false,
            filled_orders: outcomes.into_iter().map(|o| o.record).collect(),
            total_slippage_usd: total_slippage,
            residual_imbalance_usd: residual,
            rollback_performed,
            rollback_cost_usd: rollback_cost,
            error_message: Some(error_message),
        }
    }

    async fn execute_leg(&self, spec: &OrderSpec) -> LegOutcome {
        let timeout = if spec.timeout.is_zero() { self.config.default_timeout } else { spec.timeout };
        match spec.execution_mode {
            ExecutionMode::LimitOnly => self.run_limit_leg(spec, timeout, false).await,
            ExecutionMode::AggressiveLimit => self.run_limit_leg(spec, timeout, true).await,
            ExecutionMode::MarketOnly => self.run_market_leg(spec, timeout).await,
            ExecutionMode::Mixed => self.run_mixed_leg(spec, timeout).await,
        }
    }

    /// Reference price for slippage accounting: mid at submission.
    async fn reference_mid(&self, spec: &OrderSpec) -> Option<Decimal> {
        let bbo = self.price_provider.get_bbo(&spec.venue, &spec.symbol).await.ok()?;
        mid_of(&bbo).ok()
    }

    async fn limit_price_for(&self, spec: &OrderSpec, aggressive: bool) -> Result<Decimal, EngineError> {
        if let Some(price) = spec.limit_price {
            return Ok(price);
        }
        let bbo = self.price_provider.get_bbo(&spec.venue, &spec.symbol).await?;
        let price = if aggressive {
            let offset = spec
                .limit_offset_pct
                .or(self.config.limit_order_offset_pct)
                .unwrap_or(dec!(0.0005));
            // Cross the spread so the order is fillable at current BBO but
            // still rests as a limit if the book moves toward us.
            match spec.side {
                OrderSide::Buy => bbo.ask * (Decimal::ONE + offset),
                OrderSide::Sell => bbo.bid * (Decimal::ONE - offset),
            }
        } else {
            match spec.side {
                OrderSide::Buy => bbo.bid,
                OrderSide::Sell => bbo.ask,
            }
        };
        Ok(price)
    }

    async fn run_limit_leg(&self, spec: &OrderSpec, timeout: Duration, aggressive: bool) -> LegOutcome {
        let mode_used = if aggressive { ExecutionMode::AggressiveLimit } else { ExecutionMode::LimitOnly };
        let reference = self.reference_mid(spec).await;

        let price = match self.limit_price_for(spec, aggressive).await {
            Ok(price) => price,
            Err(e) => return failed_leg(spec, mode_used, e.to_string()),
        };

        // Subscribe before placing so the fill event cannot be missed.
        let updates = spec.venue.stream.subscribe_order_updates();
        let order_id = match spec
            .venue
            .client
            .place_limit_order(&spec.symbol, spec.side, spec.quantity, price, spec.reduce_only, TimeInForce::Gtc)
            .await
        {
            Ok(id) => id,
            Err(e) => return failed_leg(spec, mode_used, e.to_string()),
        };

        let mut wait = self
            .wait_for_terminal(spec, &order_id, spec.quantity, Instant::now() + timeout, updates)
            .await;

        let mut error = None;
        if !wait.terminal || wait.filled < spec.quantity {
            // Cancel venue-side, then reconcile what actually filled.
            if let Err(e) = spec.venue.client.cancel_order(&spec.symbol, &order_id).await {
                tracing::warn!(error = %e, order_id = %order_id, "cancel after timeout failed");
            }
            if let Some(history) = self.poll_history(spec, &order_id).await {
                merge_history(&mut wait, history);
            }
            if wait.filled < spec.quantity {
                error = Some("unfilled at timeout".to_string());
            }
        }

        let fill_price = wait.avg_price.unwrap_or(price);
        LegOutcome {
            record: FillRecord {
                venue: spec.venue.name.clone(),
                order_id: Some(order_id),
                fill_price,
                filled_quantity: wait.filled,
                requested_quantity: spec.quantity,
                maker_qty: wait.filled,
                taker_qty: Decimal::ZERO,
                slippage_usd: slippage(reference, fill_price, wait.filled),
                fee: wait.fee,
                execution_mode_used: mode_used,
            },
            error,
        }
    }

    async fn run_market_leg(&self, spec: &OrderSpec, timeout: Duration) -> LegOutcome {
        let reference = self.reference_mid(spec).await;
        let updates = spec.venue.stream.subscribe_order_updates();

        let order_id = match spec
            .venue
            .client
            .place_market_order(&spec.symbol, spec.side, spec.quantity, spec.reduce_only)
            .await
        {
            Ok(id) => id,
            Err(e) => return failed_leg(spec, ExecutionMode::MarketOnly, e.to_string()),
        };

        let wait_deadline = Instant::now() + timeout.min(Duration::from_secs(10));
        let mut wait = self
            .wait_for_terminal(spec, &order_id, spec.quantity, wait_deadline, updates)
            .await;

        if wait.filled < spec.quantity {
            if let Some(history) = self.poll_history(spec, &order_id).await {
                merge_history(&mut wait, history);
            }
        }

        let fill_price = wait.avg_price.or(reference).unwrap_or(Decimal::ZERO);
        let error = (wait.filled < spec.quantity).then(|| "market order not fully filled".to_string());
        LegOutcome {
            record: FillRecord {
                venue: spec.venue.name.clone(),
                order_id: Some(order_id),
                fill_price,
                filled_quantity: wait.filled,
                requested_quantity: spec.quantity,
                maker_qty: Decimal::ZERO,
                taker_qty: wait.filled,
                slippage_usd: slippage(reference, fill_price, wait.filled),
                fee: wait.fee,
                execution_mode_used: ExecutionMode::MarketOnly,
            },
            error,
        }
    }

    async fn run_mixed_leg(&self, spec: &OrderSpec, timeout: Duration) -> LegOutcome {
        // Limit phase first.
        let limit_outcome = self.run_limit_leg(spec, timeout, false).await;
        if limit_outcome.record.is_complete() {
            let mut record = limit_outcome.record;
            record.execution_mode_used = ExecutionMode::Mixed;
            return LegOutcome { record, error: None };
        }

        // Market-fill the remainder.
        let remainder = spec.quantity - limit_outcome.record.filled_quantity;
        let market_spec = OrderSpec { quantity: remainder, ..spec.clone() };
        let market_outcome = self.run_market_leg(&market_spec, timeout).await;

        let maker_qty = limit_outcome.record.filled_quantity;
        let taker_qty = market_outcome.record.filled_quantity;
        let total = maker_qty + taker_qty;
        let fill_price = if total.is_zero() {
            limit_outcome.record.fill_price
        } else {
            (limit_outcome.record.fill_price * maker_qty
                + market_outcome.record.fill_price * taker_qty)
                / total
        };

        LegOutcome {
            record: FillRecord {
                venue: spec.venue.name.clone(),
                order_id: market_outcome.record.order_id.or(limit_outcome.record.order_id),
                fill_price,
                filled_quantity: total,
                requested_quantity: spec.quantity,
                maker_qty,
                taker_qty,
                slippage_usd: limit_outcome.record.slippage_usd + market_outcome.record.slippage_usd,
                fee: limit_outcome.record.fee + market_outcome.record.fee,
                execution_mode_used: ExecutionMode::Mixed,
            },
            error: (total < spec.quantity).then(|| "mixed execution incomplete".to_string()),
        }
    }

    async fn wait_for_terminal(
        &self,
        spec: &OrderSpec,
        order_id: &str,
        target: Decimal,
        deadline: Instant,
        mut updates: broadcast::Receiver<funding_arb_core::OrderUpdate>,
    ) -> WaitOutcome {
        let mut out = WaitOutcome::default();

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let poll_in = self.config.history_poll_interval.min(deadline - now);

            tokio::select! {
                update = updates.recv() => match update {
                    Ok(update) if update.order_id == order_id => {
                        out.filled = out.filled.max(update.filled_quantity);
                        if update.avg_fill_price.is_some() {
                            out.avg_price = update.avg_fill_price;
                        }
                        out.fee += update.fee;
                        if update.status.is_terminal() {
                            out.terminal = update.status == OrderStatus::Filled
                                || out.filled >= target;
                            return out;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "order update stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        // Private stream gone; fall back to history polling
                        // until the stream resumes or the deadline passes.
                        tokio::time::sleep(poll_in).await;
                        if let Some(history) = self.poll_history(spec, order_id).await {
                            merge_history(&mut out, history);
                            if out.filled >= target {
                                out.terminal = true;
                                return out;
                            }
                        }
                    }
                },
                () = tokio::time::sleep(poll_in) => {
                    if let Some(history) = self.poll_history(spec, order_id).await {
                        merge_history(&mut out, history);
                        if out.filled >= target {
                            out.terminal = true;
                            return out;
                        }
                    }
                }
            }
        }
        out
    }

    async fn poll_history(&self, spec: &OrderSpec, order_id: &str) -> Option<WaitOutcome> {
        let now = Utc::now();
        let trades = spec
            .venue
            .client
            .user_trade_history(&spec.symbol, now - chrono::Duration::hours(1), now, Some(order_id))
            .await
            .ok()?;
        if trades.is_empty() {
            return None;
        }

        let mut filled = Decimal::ZERO;
        let mut notional = Decimal::ZERO;
        let mut fee = Decimal::ZERO;
        for trade in &trades {
            filled += trade.quantity;
            notional += trade.quantity * trade.price;
            fee += trade.fee;
        }
        Some(WaitOutcome {
            filled,
            avg_price: (!filled.is_zero()).then(|| notional / filled),
            fee,
            terminal: false,
        })
    }

    /// Flattens a filled leg with a reduce-only market order; returns the
    /// realized rollback cost (adverse move plus fees).
    async fn rollback_leg(&self, spec: &OrderSpec, record: &FillRecord) -> Decimal {
        let quantity = record.filled_quantity;
        tracing::warn!(
            venue = %spec.venue.name,
            symbol = %spec.symbol,
            quantity = %quantity,
            "rolling back filled leg"
        );

        let updates = spec.venue.stream.subscribe_order_updates();
        match spec
            .venue
            .client
            .place_market_order(&spec.symbol, spec.side.opposite(), quantity, true)
            .await
        {
            Ok(order_id) => {
                let wait = self
                    .wait_for_terminal(
                        spec,
                        &order_id,
                        quantity,
                        Instant::now() + Duration::from_secs(10),
                        updates,
                    )
                    .await;
                let exit_price = wait.avg_price.unwrap_or(record.fill_price);
                let adverse = match spec.side {
                    OrderSide::Buy => record.fill_price - exit_price,
                    OrderSide::Sell => exit_price - record.fill_price,
                };
                (adverse * quantity).max(Decimal::ZERO) + wait.fee
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    venue = %spec.venue.name,
                    "rollback order failed; leg remains exposed"
                );
                Decimal::ZERO
            }
        }
    }
}

fn mid_of(bbo: &Bbo) -> Result<Decimal, EngineError> {
    bbo.mid().ok_or_else(|| {
        EngineError::PreflightValidation(format!(
            "non-positive BBO for {}: bid={}, ask={}",
            bbo.symbol, bbo.bid, bbo.ask
        ))
    })
}

fn slippage(reference: Option<Decimal>, fill_price: Decimal, quantity: Decimal) -> Decimal {
    match reference {
        Some(reference) if !quantity.is_zero() => (fill_price - reference).abs() * quantity,
        _ => Decimal::ZERO,
    }
}

fn merge_history(out: &mut WaitOutcome, history: WaitOutcome) {
    if history.filled > out.filled {
        out.filled = history.filled;
        out.avg_price = history.avg_price.or(out.avg_price);
        out.fee = history.fee;
    }
}

fn failed_leg(spec: &OrderSpec, mode: ExecutionMode, error: String) -> LegOutcome {
    LegOutcome {
        record: FillRecord {
            venue: spec.venue.name.clone(),
            order_id: None,
            fill_price: Decimal::ZERO,
            filled_quantity: Decimal::ZERO,
            requested_quantity: spec.quantity,
            maker_qty: Decimal::ZERO,
            taker_qty: Decimal::ZERO,
            slippage_usd: Decimal::ZERO,
            fee: Decimal::ZERO,
            execution_mode_used: mode,
        },
        error: Some(error),
    }
}

fn residual_imbalance_usd(orders: &[OrderSpec], outcomes: &[LegOutcome]) -> Decimal {
    let signed: Decimal = orders
        .iter()
        .zip(outcomes)
        .map(|(spec, outcome)| {
            let notional = outcome.record.filled_quantity * outcome.record.fill_price;
            match spec.side {
                OrderSide::Buy => notional,
                OrderSide::Sell => -notional,
            }
        })
        .sum();
    signed.abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use funding_arb_connector::{
        BboSubscription, MarketStream, OrderBookSnapshot, SubscriptionId,
    };
    use funding_arb_core::{
        ContractAttributes, ExchangePositionSnapshot, FeeStructure, LeverageInfo,
        LiquidationEvent, OrderUpdate, TradeData, VenueClient,
    };
    use parking_lot::Mutex;

    // ==================== Mock venue ====================

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum FillBehavior {
        /// Emits a full fill right after placement.
        FillImmediately,
        /// Never emits any update.
        NeverFill,
    }

    #[derive(Debug, Clone)]
    struct PlacedOrder {
        order_id: String,
        side: OrderSide,
        quantity: Decimal,
        price: Option<Decimal>,
        reduce_only: bool,
        is_market: bool,
    }

    struct MockVenueState {
        behavior: FillBehavior,
        placed: Mutex<Vec<PlacedOrder>>,
        canceled: Mutex<Vec<String>>,
        next_id: Mutex<u64>,
        fill_price: Decimal,
        bbo: Bbo,
        updates: broadcast::Sender<OrderUpdate>,
    }

    struct MockClient {
        name: String,
        state: Arc<MockVenueState>,
    }

    struct MockStream {
        state: Arc<MockVenueState>,
        bbo_fanout: funding_arb_connector::BboBroadcaster,
        liquidations: broadcast::Sender<LiquidationEvent>,
    }

    impl MockVenueState {
        fn new(behavior: FillBehavior, fill_price: Decimal) -> Arc<Self> {
            let (updates, _) = broadcast::channel(64);
            Arc::new(Self {
                behavior,
                placed: Mutex::new(Vec::new()),
                canceled: Mutex::new(Vec::new()),
                next_id: Mutex::new(0),
                fill_price,
                bbo: Bbo {
                    symbol: "BTCUSDT".to_string(),
                    bid: fill_price - dec!(5),
                    ask: fill_price + dec!(5),
                    timestamp: Utc::now(),
                    sequence: None,
                },
                updates,
            })
        }

        fn place(&self, order: PlacedOrder) -> String {
            let order_id = order.order_id.clone();
            self.placed.lock().push(order);
            if self.behavior == FillBehavior::FillImmediately {
                let update = OrderUpdate {
                    venue: "mock".to_string(),
                    symbol: "BTCUSDT".to_string(),
                    order_id: order_id.clone(),
                    side: OrderSide::Buy,
                    status: OrderStatus::Filled,
                    filled_quantity: self.placed.lock().last().unwrap().quantity,
                    avg_fill_price: Some(self.fill_price),
                    fee: dec!(0.05),
                    fee_currency: Some("USDT".to_string()),
                    is_liquidation: false,
                    timestamp: Utc::now(),
                };
                let tx = self.updates.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    let _ = tx.send(update);
                });
            }
            order_id
        }

        fn next_order_id(&self) -> String {
            let mut id = self.next_id.lock();
            *id += 1;
            format!("order-{}", *id)
        }
    }

    #[async_trait]
    impl VenueClient for MockClient {
        fn name(&self) -> &str {
            &self.name
        }
        fn normalize_symbol(&self, venue_symbol: &str) -> String {
            funding_arb_core::symbol::normalize(venue_symbol)
        }
        fn venue_symbol(&self, symbol: &str) -> String {
            format!("{}USDT", symbol.to_ascii_uppercase())
        }
        fn fee_structure(&self) -> FeeStructure {
            FeeStructure {
                maker_fee: dec!(0.0002),
                taker_fee: dec!(0.0005),
                funding_interval_secs: 28_800,
            }
        }
        async fn contract_attributes(&self, symbol: &str) -> Result<ContractAttributes, EngineError> {
            Ok(ContractAttributes {
                contract_id: self.venue_symbol(symbol),
                tick_size: dec!(0.1),
                step_size: dec!(0.001),
                quantity_multiplier: Decimal::ONE,
                price_multiplier: Decimal::ONE,
                min_quantity: dec!(0.001),
                max_leverage: 20,
            })
        }
        async fn leverage_info(&self, _symbol: &str) -> Result<LeverageInfo, EngineError> {
            Ok(LeverageInfo { current_leverage: 10, max_leverage: 20 })
        }
        async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> Result<(), EngineError> {
            Ok(())
        }
        async fn fetch_bbo(&self, _symbol: &str) -> Result<Bbo, EngineError> {
            Ok(self.state.bbo.clone())
        }
        async fn place_limit_order(
            &self,
            _symbol: &str,
            side: OrderSide,
            quantity: Decimal,
            price: Decimal,
            reduce_only: bool,
            _tif: TimeInForce,
        ) -> Result<String, EngineError> {
            let order_id = self.state.next_order_id();
            Ok(self.state.place(PlacedOrder {
                order_id,
                side,
                quantity,
                price: Some(price),
                reduce_only,
                is_market: false,
            }))
        }
        async fn place_market_order(
            &self,
            _symbol: &str,
            side: OrderSide,
            quantity: Decimal,
            reduce_only: bool,
        ) -> Result<String, EngineError> {
            let order_id = self.state.next_order_id();
            Ok(self.state.place(PlacedOrder {
                order_id,
                side,
                quantity,
                price: None,
                reduce_only,
                is_market: true,
            }))
        }
        async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<(), EngineError> {
            self.state.canceled.lock().push(order_id.to_string());
            Ok(())
        }
        async fn position_snapshot(
            &self,
            _symbol: &str,
        ) -> Result<Option<ExchangePositionSnapshot>, EngineError> {
            Ok(None)
        }
        async fn user_trade_history(
            &self,
            _symbol: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _order_id: Option<&str>,
        ) -> Result<Vec<TradeData>, EngineError> {
            Ok(Vec::new())
        }
        fn round_to_step(&self, _symbol: &str, quantity: Decimal) -> Decimal {
            quantity
        }
    }

    #[async_trait]
    impl MarketStream for MockStream {
        async fn connect(&self) -> Result<(), EngineError> {
            Ok(())
        }
        async fn disconnect(&self) {}
        fn is_running(&self) -> bool {
            true
        }
        async fn ensure_market_feed(&self, _symbol: &str) -> Result<(), EngineError> {
            Ok(())
        }
        fn current_symbol(&self) -> Option<String> {
            Some("BTC".to_string())
        }
        fn subscribe_bbo(&self) -> BboSubscription {
            self.bbo_fanout.subscribe()
        }
        fn unsubscribe_bbo(&self, id: SubscriptionId) {
            self.bbo_fanout.unsubscribe(id);
        }
        fn latest_bbo(&self) -> Option<Bbo> {
            Some(self.state.bbo.clone())
        }
        fn order_book_snapshot(&self, _levels: usize) -> Option<OrderBookSnapshot> {
            None
        }
        fn subscribe_order_updates(&self) -> broadcast::Receiver<OrderUpdate> {
            self.state.updates.subscribe()
        }
        fn subscribe_liquidations(&self) -> broadcast::Receiver<LiquidationEvent> {
            self.liquidations.subscribe()
        }
    }

    fn mock_venue(name: &str, behavior: FillBehavior, fill_price: Decimal) -> (Arc<Venue>, Arc<MockVenueState>) {
        let state = MockVenueState::new(behavior, fill_price);
        let client = Arc::new(MockClient { name: name.to_string(), state: Arc::clone(&state) });
        let (liquidations, _) = broadcast::channel(8);
        let stream = Arc::new(MockStream {
            state: Arc::clone(&state),
            bbo_fanout: funding_arb_connector::BboBroadcaster::default(),
            liquidations,
        });
        (Arc::new(Venue::new(client, stream)), state)
    }

    fn executor() -> AtomicExecutor {
        AtomicExecutor::new(
            Arc::new(PriceProvider::default()),
            ClosingSet::new(),
            ExecutorConfig {
                history_poll_interval: Duration::from_millis(50),
                ..ExecutorConfig::default()
            },
        )
    }

    fn spec(venue: &Arc<Venue>, side: OrderSide, quantity: Decimal, mode: ExecutionMode) -> OrderSpec {
        OrderSpec {
            venue: Arc::clone(venue),
            symbol: "BTC".to_string(),
            side,
            size_usd: dec!(1000),
            quantity,
            execution_mode: mode,
            timeout: Duration::from_millis(300),
            limit_price: None,
            limit_offset_pct: None,
            reduce_only: false,
        }
    }

    // ==================== Tests ====================

    #[tokio::test]
    async fn both_legs_fill_cleanly() {
        let (long_venue, _) = mock_venue("mock-a", FillBehavior::FillImmediately, dec!(49995));
        let (short_venue, _) = mock_venue("mock-b", FillBehavior::FillImmediately, dec!(50005));
        let executor = executor();

        let result = executor
            .execute_atomically(
                vec![
                    spec(&long_venue, OrderSide::Buy, dec!(0.02), ExecutionMode::LimitOnly),
                    spec(&short_venue, OrderSide::Sell, dec!(0.02), ExecutionMode::LimitOnly),
                ],
                true,
            )
            .await;

        assert!(result.all_filled, "error: {:?}", result.error_message);
        assert!(!result.rollback_performed);
        assert_eq!(result.filled_orders.len(), 2);
        assert_eq!(result.filled_orders[0].filled_quantity, dec!(0.02));
        assert_eq!(result.filled_orders[0].execution_mode_used, ExecutionMode::LimitOnly);
    }

    #[tokio::test]
    async fn partial_fill_triggers_rollback() {
        // S2: leg 1 fills fully, leg 2 never fills. The executor must
        // cancel leg 2 venue-side and flatten leg 1 with a reduce-only
        // market order of the filled quantity.
        let (long_venue, long_state) = mock_venue("mock-a", FillBehavior::FillImmediately, dec!(49995));
        let (short_venue, short_state) = mock_venue("mock-b", FillBehavior::NeverFill, dec!(50005));
        let executor = executor();

        let result = executor
            .execute_atomically(
                vec![
                    spec(&long_venue, OrderSide::Buy, dec!(0.02), ExecutionMode::LimitOnly),
                    spec(&short_venue, OrderSide::Sell, dec!(0.02), ExecutionMode::LimitOnly),
                ],
                true,
            )
            .await;

        assert!(!result.all_filled);
        assert!(result.rollback_performed);
        assert!(result.error_message.is_some());

        // Leg 2 canceled venue-side.
        assert_eq!(short_state.canceled.lock().len(), 1);

        // Leg 1 flattened: a reduce-only market sell of the filled size.
        let placed = long_state.placed.lock();
        let rollback = placed.iter().find(|o| o.is_market).expect("rollback order placed");
        assert_eq!(rollback.side, OrderSide::Sell);
        assert_eq!(rollback.quantity, dec!(0.02));
        assert!(rollback.reduce_only);
    }

    #[tokio::test]
    async fn rollback_skipped_when_disabled() {
        let (long_venue, long_state) = mock_venue("mock-a", FillBehavior::FillImmediately, dec!(49995));
        let (short_venue, _) = mock_venue("mock-b", FillBehavior::NeverFill, dec!(50005));
        let executor = executor();

        let result = executor
            .execute_atomically(
                vec![
                    spec(&long_venue, OrderSide::Buy, dec!(0.02), ExecutionMode::LimitOnly),
                    spec(&short_venue, OrderSide::Sell, dec!(0.02), ExecutionMode::LimitOnly),
                ],
                false,
            )
            .await;

        assert!(!result.all_filled);
        assert!(!result.rollback_performed);
        assert!(long_state.placed.lock().iter().all(|o| !o.is_market));
    }

    #[tokio::test]
    async fn market_mode_is_taker() {
        let (venue, _) = mock_venue("mock-a", FillBehavior::FillImmediately, dec!(50000));
        let executor = executor();

        let result = executor
            .execute_atomically(
                vec![spec(&venue, OrderSide::Buy, dec!(0.01), ExecutionMode::MarketOnly)],
                false,
            )
            .await;

        assert!(result.all_filled);
        let record = &result.filled_orders[0];
        assert_eq!(record.taker_qty, dec!(0.01));
        assert_eq!(record.maker_qty, Decimal::ZERO);
    }

    #[tokio::test]
    async fn preflight_rejects_price_divergence() {
        // Mids 2% apart against a 0.5% limit.
        let (long_venue, _) = mock_venue("mock-a", FillBehavior::FillImmediately, dec!(49000));
        let (short_venue, _) = mock_venue("mock-b", FillBehavior::FillImmediately, dec!(50000));
        let executor = executor();

        let err = executor
            .preflight_hedge(
                &spec(&long_venue, OrderSide::Buy, dec!(0.02), ExecutionMode::LimitOnly),
                &spec(&short_venue, OrderSide::Sell, dec!(0.02), ExecutionMode::LimitOnly),
                10,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PreflightValidation(_)));
    }

    #[tokio::test]
    async fn preflight_rejects_thin_liquidation_distance() {
        let (long_venue, _) = mock_venue("mock-a", FillBehavior::FillImmediately, dec!(50000));
        let (short_venue, _) = mock_venue("mock-b", FillBehavior::FillImmediately, dec!(50000));
        let executor = executor();

        // 1/50 = 2% distance against the default 5% minimum.
        let err = executor
            .preflight_hedge(
                &spec(&long_venue, OrderSide::Buy, dec!(0.02), ExecutionMode::LimitOnly),
                &spec(&short_venue, OrderSide::Sell, dec!(0.02), ExecutionMode::LimitOnly),
                50,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PreflightValidation(_)));
    }

    #[tokio::test]
    async fn preflight_refuses_sub_minimum_notional() {
        let (long_venue, long_state) = mock_venue("mock-a", FillBehavior::FillImmediately, dec!(50000));
        let (short_venue, _) = mock_venue("mock-b", FillBehavior::FillImmediately, dec!(50000));
        let executor = executor();

        let mut long = spec(&long_venue, OrderSide::Buy, dec!(0.0001), ExecutionMode::LimitOnly);
        long.size_usd = dec!(4);
        let short = spec(&short_venue, OrderSide::Sell, dec!(0.0001), ExecutionMode::LimitOnly);

        let err = executor.preflight_hedge(&long, &short, 10).await.unwrap_err();
        assert!(matches!(err, EngineError::PreflightValidation(_)));
        // Refused before any order went out.
        assert!(long_state.placed.lock().is_empty());
    }

    #[tokio::test]
    async fn empty_order_list_is_an_error() {
        let executor = executor();
        let result = executor.execute_atomically(Vec::new(), true).await;
        assert!(!result.all_filled);
        assert!(result.error_message.is_some());
    }
}

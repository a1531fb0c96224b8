//! Position opening pipeline.
//!
//! contract prep → leverage normalization → price alignment → quantity
//! harmonization → atomic execution → persistence (create or additive
//! merge) → profit-monitor registration.

use chrono::Utc;
use funding_arb_connector::{Venue, VenueMap};
use funding_arb_core::{
    ContractAttributes, EngineError, ExecutionMode, OrderSide, Side,
};
use funding_arb_data::{
    FillFingerprint, FundingArbPosition, LegMetadata, MergeFill, PositionStore, PositionStatus,
    TradeFill, TradeType,
};
use funding_arb_execution::{
    harmonize_quantities, AlignedPrices, AlignmentStrategy, AtomicExecutor, BreakEvenAligner,
    FillRecord, LegSizing, OrderSpec, PriceProvider,
};
use funding_arb_monitor::RealTimeProfitMonitor;
use funding_arb_scanner::{CooldownManager, FeeCalculator, SizedOpportunity};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Smallest hedge notional the opener will execute.
const MIN_VIABLE_SIZE_USD: Decimal = dec!(5);

#[derive(Debug, Clone)]
pub struct OpenSettings {
    pub enable_break_even_alignment: bool,
    pub max_spread_threshold_pct: Option<Decimal>,
    pub limit_order_offset_pct: Option<Decimal>,
    pub order_timeout: Duration,
}

impl Default for OpenSettings {
    fn default() -> Self {
        Self {
            enable_break_even_alignment: true,
            max_spread_threshold_pct: Some(dec!(0.003)),
            limit_order_offset_pct: Some(dec!(0.0005)),
            order_timeout: Duration::from_secs(30),
        }
    }
}

pub struct PositionOpener {
    venues: Arc<VenueMap>,
    store: Arc<PositionStore>,
    executor: Arc<AtomicExecutor>,
    price_provider: Arc<PriceProvider>,
    fees: Arc<FeeCalculator>,
    cooldowns: Arc<CooldownManager>,
    settings: OpenSettings,
}

impl PositionOpener {
    #[must_use]
    pub fn new(
        venues: Arc<VenueMap>,
        store: Arc<PositionStore>,
        executor: Arc<AtomicExecutor>,
        price_provider: Arc<PriceProvider>,
        fees: Arc<FeeCalculator>,
        cooldowns: Arc<CooldownManager>,
        settings: OpenSettings,
    ) -> Self {
        Self { venues, store, executor, price_provider, fees, cooldowns, settings }
    }

    /// Runs the full open pipeline for one sized candidate.
    ///
    /// # Errors
    /// Returns [`EngineError::PreflightValidation`] for validation aborts
    /// (the symbol should cool down), [`EngineError::PartialFill`] when
    /// execution rolled back, and transport errors otherwise.
    pub async fn open(
        &self,
        sized: &SizedOpportunity,
        monitor: &Arc<RealTimeProfitMonitor>,
    ) -> Result<FundingArbPosition, EngineError> {
        let opportunity = &sized.opportunity;
        let symbol = opportunity.symbol.as_str();

        if sized.size_usd < MIN_VIABLE_SIZE_USD {
            return Err(EngineError::PreflightValidation(format!(
                "position size {} below minimum {MIN_VIABLE_SIZE_USD}",
                sized.size_usd
            )));
        }

        let long_venue = self.venue(&opportunity.long_dex)?;
        let short_venue = self.venue(&opportunity.short_dex)?;

        tracing::info!(
            symbol,
            long = %long_venue.name,
            short = %short_venue.name,
            size_usd = %sized.size_usd,
            divergence = %opportunity.divergence,
            "opening hedge"
        );

        // Contract prep: point both market feeds at the symbol and resolve
        // metadata once; it is cached into the legs for cold-start closes.
        long_venue.stream.ensure_market_feed(symbol).await?;
        short_venue.stream.ensure_market_feed(symbol).await?;
        let long_attrs = long_venue.client.contract_attributes(symbol).await?;
        let short_attrs = short_venue.client.contract_attributes(symbol).await?;

        // Leverage normalization: both legs margined identically.
        self.normalize_leverage(&long_venue, &short_venue, symbol, sized.leverage).await?;

        // Pricing.
        let long_bbo = self.price_provider.get_bbo(&long_venue, symbol).await?;
        let short_bbo = self.price_provider.get_bbo(&short_venue, symbol).await?;
        let aligned = self.align_prices(symbol, &long_bbo, &short_bbo);

        // Quantities.
        let harmonized = harmonize_quantities(
            &LegSizing {
                raw_quantity: sized.size_usd / aligned.long_price,
                step_size: long_attrs.step_size,
                quantity_multiplier: long_attrs.quantity_multiplier,
                min_quantity: long_attrs.min_quantity,
            },
            &LegSizing {
                raw_quantity: sized.size_usd / aligned.short_price,
                step_size: short_attrs.step_size,
                quantity_multiplier: short_attrs.quantity_multiplier,
                min_quantity: short_attrs.min_quantity,
            },
        )
        .ok_or_else(|| {
            EngineError::PreflightValidation(format!(
                "{symbol}: no executable quantity after rounding"
            ))
        })?;

        let long_spec = OrderSpec {
            venue: Arc::clone(&long_venue),
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            size_usd: harmonized.long_quantity * aligned.long_price,
            quantity: harmonized.long_quantity,
            execution_mode: ExecutionMode::LimitOnly,
            timeout: self.settings.order_timeout,
            limit_price: Some(aligned.long_price),
            limit_offset_pct: self.settings.limit_order_offset_pct,
            reduce_only: false,
        };
        let short_spec = OrderSpec {
            venue: Arc::clone(&short_venue),
            symbol: symbol.to_string(),
            side: OrderSide::Sell,
            size_usd: harmonized.short_quantity * aligned.short_price,
            quantity: harmonized.short_quantity,
            execution_mode: ExecutionMode::LimitOnly,
            timeout: self.settings.order_timeout,
            limit_price: Some(aligned.short_price),
            limit_offset_pct: self.settings.limit_order_offset_pct,
            reduce_only: false,
        };

        self.executor.preflight_hedge(&long_spec, &short_spec, sized.leverage).await?;

        let result = self
            .executor
            .execute_atomically(vec![long_spec, short_spec], true)
            .await;

        if !result.all_filled {
            if result.rollback_performed {
                tracing::warn!(
                    symbol,
                    cost = %result.rollback_cost_usd,
                    "emergency rollback performed"
                );
            }
            return Err(EngineError::PartialFill(
                result.error_message.unwrap_or_else(|| "execution incomplete".to_string()),
            ));
        }

        let long_fill = result.filled_orders[0].clone();
        let short_fill = result.filled_orders[1].clone();
        let long_exposure = long_fill.filled_quantity * long_fill.fill_price;
        let short_exposure = short_fill.filled_quantity * short_fill.fill_price;
        let effective_size = long_exposure.min(short_exposure);

        if result.residual_imbalance_usd > dec!(0.01) {
            tracing::warn!(
                symbol,
                residual = %result.residual_imbalance_usd,
                "residual exposure imbalance after execution"
            );
        }

        let entry_fees = self.fees.total_cost(
            &opportunity.long_dex,
            &opportunity.short_dex,
            effective_size,
            true,
        );

        // Increment-existing: an open hedge on the same triple absorbs the
        // fill instead of creating a sibling.
        let position = match self
            .store
            .find_open_position(symbol, &opportunity.long_dex, &opportunity.short_dex)
            .await
            .map_err(storage_error)?
        {
            Some(mut existing) => {
                let merge = MergeFill {
                    size_usd: effective_size,
                    long_rate: opportunity.long_rate,
                    short_rate: opportunity.short_rate,
                    divergence: opportunity.divergence,
                    long_quantity: long_fill.filled_quantity,
                    short_quantity: short_fill.filled_quantity,
                    long_price: long_fill.fill_price,
                    short_price: short_fill.fill_price,
                    long_fees: long_fill.fee,
                    short_fees: short_fill.fee,
                    long_slippage: long_fill.slippage_usd,
                    short_slippage: short_fill.slippage_usd,
                    long_order_id: long_fill.order_id.clone(),
                    short_order_id: short_fill.order_id.clone(),
                    timestamp: Utc::now(),
                };
                existing.merge_additional_fill(&merge);
                self.store.update(&existing).await.map_err(storage_error)?;
                tracing::info!(
                    symbol,
                    position_id = %existing.id,
                    new_size = %existing.size_usd,
                    "merged additive fill into open hedge"
                );
                existing
            }
            None => {
                let position = self.build_position(
                    sized,
                    effective_size,
                    entry_fees,
                    &long_fill,
                    &short_fill,
                    &long_attrs,
                    &short_attrs,
                );
                self.store.create(&position).await.map_err(storage_error)?;
                position
            }
        };

        self.record_entry_fills(&position, &long_fill, &short_fill).await;
        monitor.register_position(&position);

        tracing::info!(
            symbol,
            position_id = %position.id,
            size_usd = %position.size_usd,
            entry_divergence = %position.entry_divergence,
            "hedge open"
        );
        Ok(position)
    }

    fn venue(&self, name: &str) -> Result<Arc<Venue>, EngineError> {
        self.venues.get(name).cloned().ok_or_else(|| {
            EngineError::PreflightValidation(format!("venue '{name}' has no trading client"))
        })
    }

    async fn normalize_leverage(
        &self,
        long_venue: &Arc<Venue>,
        short_venue: &Arc<Venue>,
        symbol: &str,
        leverage: u32,
    ) -> Result<(), EngineError> {
        for venue in [long_venue, short_venue] {
            venue
                .client
                .set_leverage(symbol, leverage)
                .await
                .map_err(|e| {
                    EngineError::PreflightValidation(format!(
                        "{}: leverage {leverage}x rejected: {e}",
                        venue.name
                    ))
                })?;
        }
        tracing::debug!(symbol, leverage, "leverage normalized on both venues");
        Ok(())
    }

    fn align_prices(
        &self,
        symbol: &str,
        long_bbo: &funding_arb_core::Bbo,
        short_bbo: &funding_arb_core::Bbo,
    ) -> AlignedPrices {
        if !self.settings.enable_break_even_alignment {
            return AlignedPrices {
                long_price: long_bbo.ask,
                short_price: short_bbo.bid,
                spread_pct: Decimal::ZERO,
                strategy_used: AlignmentStrategy::BboFallback,
            };
        }

        let aligned = BreakEvenAligner::calculate_aligned_prices(
            long_bbo.bid,
            long_bbo.ask,
            short_bbo.bid,
            short_bbo.ask,
            self.settings.limit_order_offset_pct,
            self.settings.max_spread_threshold_pct,
        );
        tracing::info!(
            symbol,
            strategy = aligned.strategy_used.as_str(),
            spread_pct = %aligned.spread_pct,
            long_price = %aligned.long_price,
            short_price = %aligned.short_price,
            "entry price alignment"
        );
        if aligned.strategy_used == AlignmentStrategy::BboFallback {
            // A spread this wide rarely recovers inside one cycle.
            self.cooldowns.mark(symbol, Utc::now());
        }
        aligned
    }

    #[allow(clippy::too_many_arguments)]
    fn build_position(
        &self,
        sized: &SizedOpportunity,
        effective_size: Decimal,
        entry_fees: Decimal,
        long_fill: &FillRecord,
        short_fill: &FillRecord,
        long_attrs: &ContractAttributes,
        short_attrs: &ContractAttributes,
    ) -> FundingArbPosition {
        let opportunity = &sized.opportunity;
        let now = Utc::now();

        let leg = |side: Side, fill: &FillRecord, attrs: &ContractAttributes| LegMetadata {
            side,
            entry_price: fill.fill_price,
            quantity: fill.filled_quantity,
            order_id: fill.order_id.clone(),
            fees_paid: fill.fee,
            slippage_usd: fill.slippage_usd,
            execution_mode: fill.execution_mode_used,
            exposure_usd: fill.filled_quantity * fill.fill_price,
            last_updated: now,
            contract_id: Some(attrs.contract_id.clone()),
            quantity_multiplier: attrs.quantity_multiplier,
            price_multiplier: attrs.price_multiplier,
            mark_price: None,
            unrealized_pnl: None,
            funding_accrued: None,
            margin_reserved: None,
            liquidation_price: None,
        };

        let mut legs = BTreeMap::new();
        legs.insert(opportunity.long_dex.clone(), leg(Side::Long, long_fill, long_attrs));
        legs.insert(opportunity.short_dex.clone(), leg(Side::Short, short_fill, short_attrs));

        FundingArbPosition {
            id: Uuid::new_v4(),
            symbol: opportunity.symbol.clone(),
            long_dex: opportunity.long_dex.clone(),
            short_dex: opportunity.short_dex.clone(),
            size_usd: effective_size,
            entry_long_rate: opportunity.long_rate,
            entry_short_rate: opportunity.short_rate,
            entry_divergence: opportunity.divergence,
            opened_at: now,
            closed_at: None,
            status: PositionStatus::Open,
            exit_reason: None,
            pnl_usd: Decimal::ZERO,
            total_fees_paid: entry_fees,
            current_divergence: Some(opportunity.divergence),
            last_checked_at: None,
            legs,
            fills: vec![FillFingerprint {
                timestamp: now,
                size_usd: effective_size,
                long_rate: opportunity.long_rate,
                short_rate: opportunity.short_rate,
                divergence: opportunity.divergence,
                long_order_id: long_fill.order_id.clone(),
                short_order_id: short_fill.order_id.clone(),
            }],
        }
    }

    async fn record_entry_fills(
        &self,
        position: &FundingArbPosition,
        long_fill: &FillRecord,
        short_fill: &FillRecord,
    ) {
        let records = [
            (long_fill, &position.long_dex, OrderSide::Buy),
            (short_fill, &position.short_dex, OrderSide::Sell),
        ];
        for (fill, dex, side) in records {
            let record = TradeFill {
                id: Uuid::new_v4(),
                position_id: position.id,
                account_id: None,
                trade_type: TradeType::Entry,
                dex_id: dex.clone(),
                symbol_id: position.symbol.clone(),
                order_id: fill.order_id.clone().unwrap_or_default(),
                trade_id: None,
                timestamp: Utc::now(),
                side,
                total_quantity: fill.filled_quantity,
                weighted_avg_price: fill.fill_price,
                total_fee: fill.fee,
                fee_currency: "USD".to_string(),
                realized_pnl: None,
                realized_funding: None,
                fill_count: 1,
            };
            if let Err(e) = self.store.record_fill(&record).await {
                tracing::warn!(error = %e, dex = %dex, "entry fill record failed");
            }
        }
    }
}

fn storage_error(err: anyhow::Error) -> EngineError {
    EngineError::DatabaseUnavailable(err.to_string())
}

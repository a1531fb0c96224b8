//! Persistent domain models: hedges, legs, fills, sessions.

use chrono::{DateTime, Utc};
use funding_arb_core::{ExecutionMode, OrderSide, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// =============================================================================
// Position status
// =============================================================================

/// Lifecycle state of a hedge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    /// Both legs open, being monitored.
    Open,
    /// Close in flight.
    PendingClose,
    /// Fully closed with realized PnL.
    Closed,
}

impl PositionStatus {
    /// Returns the display string (also the database value).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::PendingClose => "pending_close",
            Self::Closed => "closed",
        }
    }

    /// Parses the database value.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "open" => Self::Open,
            "pending_close" => Self::PendingClose,
            "closed" => Self::Closed,
            _ => return None,
        })
    }
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Leg metadata
// =============================================================================

/// Per-venue record of one leg of a hedge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegMetadata {
    /// Economic side of this leg.
    pub side: Side,
    /// Size-weighted average entry price.
    pub entry_price: Decimal,
    /// Filled quantity in venue-native units (always positive).
    pub quantity: Decimal,
    /// Venue order id of the most recent fill.
    pub order_id: Option<String>,
    /// Cumulative fees paid on this leg.
    pub fees_paid: Decimal,
    /// Cumulative slippage attributed to this leg.
    pub slippage_usd: Decimal,
    /// Execution mode actually used for the latest fill.
    pub execution_mode: ExecutionMode,
    /// USD exposure of the leg.
    pub exposure_usd: Decimal,
    /// Last snapshot refresh.
    pub last_updated: DateTime<Utc>,
    /// Cached venue-native contract identifier.
    pub contract_id: Option<String>,
    /// Cached contract-units → tokens multiplier.
    pub quantity_multiplier: Decimal,
    /// Cached price multiplier.
    pub price_multiplier: Decimal,
    /// Cached mark price from the monitor loop.
    pub mark_price: Option<Decimal>,
    /// Cached unrealized PnL from the monitor loop.
    pub unrealized_pnl: Option<Decimal>,
    /// Cached funding accrued from the monitor loop.
    pub funding_accrued: Option<Decimal>,
    /// Margin reserved on the venue.
    pub margin_reserved: Option<Decimal>,
    /// Estimated liquidation price.
    pub liquidation_price: Option<Decimal>,
}

impl LegMetadata {
    /// Converts the leg quantity to actual underlying tokens.
    #[must_use]
    pub fn actual_tokens(&self) -> Decimal {
        self.quantity.abs() * self.quantity_multiplier
    }
}

/// Fingerprint of one fill appended to the position's audit array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillFingerprint {
    pub timestamp: DateTime<Utc>,
    pub size_usd: Decimal,
    pub long_rate: Decimal,
    pub short_rate: Decimal,
    pub divergence: Decimal,
    pub long_order_id: Option<String>,
    pub short_order_id: Option<String>,
}

// =============================================================================
// Position
// =============================================================================

/// An additional fill merged into an existing open hedge.
#[derive(Debug, Clone)]
pub struct MergeFill {
    pub size_usd: Decimal,
    pub long_rate: Decimal,
    pub short_rate: Decimal,
    pub divergence: Decimal,
    /// Added quantity per venue (long venue, short venue).
    pub long_quantity: Decimal,
    pub short_quantity: Decimal,
    /// Fill prices per leg.
    pub long_price: Decimal,
    pub short_price: Decimal,
    /// Added fees/slippage/exposure per leg.
    pub long_fees: Decimal,
    pub short_fees: Decimal,
    pub long_slippage: Decimal,
    pub short_slippage: Decimal,
    pub long_order_id: Option<String>,
    pub short_order_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A hedge between two venues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingArbPosition {
    pub id: Uuid,
    /// Normalized symbol.
    pub symbol: String,
    /// Venue holding the long leg.
    pub long_dex: String,
    /// Venue holding the short leg.
    pub short_dex: String,
    /// Hedge notional in USD.
    pub size_usd: Decimal,
    /// Funding rate on the long venue at entry.
    pub entry_long_rate: Decimal,
    /// Funding rate on the short venue at entry.
    pub entry_short_rate: Decimal,
    /// `short_rate - long_rate` at entry.
    pub entry_divergence: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub status: PositionStatus,
    pub exit_reason: Option<String>,
    /// Cumulative realized PnL.
    pub pnl_usd: Decimal,
    /// Cumulative fees across both legs.
    pub total_fees_paid: Decimal,
    /// Divergence at the last risk check.
    pub current_divergence: Option<Decimal>,
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Per-venue leg records keyed by venue name.
    pub legs: BTreeMap<String, LegMetadata>,
    /// Audit trail of additive fills.
    pub fills: Vec<FillFingerprint>,
}

impl FundingArbPosition {
    /// Age in fractional hours.
    #[must_use]
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.opened_at).num_seconds() as f64 / 3600.0
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Leg record on the long venue.
    #[must_use]
    pub fn long_leg(&self) -> Option<&LegMetadata> {
        self.legs.get(&self.long_dex)
    }

    /// Leg record on the short venue.
    #[must_use]
    pub fn short_leg(&self) -> Option<&LegMetadata> {
        self.legs.get(&self.short_dex)
    }

    /// Checks the open-position invariant: both legs present, nonzero,
    /// opposite economic direction.
    #[must_use]
    pub fn legs_consistent(&self) -> bool {
        match (self.long_leg(), self.short_leg()) {
            (Some(long), Some(short)) => {
                long.side == Side::Long
                    && short.side == Side::Short
                    && !long.quantity.is_zero()
                    && !short.quantity.is_zero()
            }
            _ => false,
        }
    }

    /// Relative token imbalance between the legs: `(max - min) / max`.
    ///
    /// Quantities are converted to actual tokens through each leg's
    /// multiplier first, so differently-denominated venues compare fairly.
    #[must_use]
    pub fn token_imbalance_ratio(&self) -> Option<Decimal> {
        let long = self.long_leg()?.actual_tokens();
        let short = self.short_leg()?.actual_tokens();
        let max = long.max(short);
        if max.is_zero() {
            return None;
        }
        Some((max - long.min(short)) / max)
    }

    /// Merges an additive fill into this open hedge.
    ///
    /// Entry rates and divergence become notional-weighted averages; leg
    /// quantities, fees, slippage, and exposure are additive; leg entry
    /// prices become quantity-weighted VWAPs. A fingerprint is appended to
    /// the audit array.
    pub fn merge_additional_fill(&mut self, fill: &MergeFill) {
        let old_size = self.size_usd;
        let new_size = old_size + fill.size_usd;
        if new_size <= Decimal::ZERO {
            return;
        }

        self.entry_long_rate =
            (self.entry_long_rate * old_size + fill.long_rate * fill.size_usd) / new_size;
        self.entry_short_rate =
            (self.entry_short_rate * old_size + fill.short_rate * fill.size_usd) / new_size;
        self.entry_divergence =
            (self.entry_divergence * old_size + fill.divergence * fill.size_usd) / new_size;
        self.size_usd = new_size;
        self.total_fees_paid += fill.long_fees + fill.short_fees;

        let long_dex = self.long_dex.clone();
        let short_dex = self.short_dex.clone();
        Self::merge_leg(
            self.legs.get_mut(&long_dex),
            fill.long_quantity,
            fill.long_price,
            fill.long_fees,
            fill.long_slippage,
            fill.long_order_id.clone(),
            fill.timestamp,
        );
        Self::merge_leg(
            self.legs.get_mut(&short_dex),
            fill.short_quantity,
            fill.short_price,
            fill.short_fees,
            fill.short_slippage,
            fill.short_order_id.clone(),
            fill.timestamp,
        );

        self.fills.push(FillFingerprint {
            timestamp: fill.timestamp,
            size_usd: fill.size_usd,
            long_rate: fill.long_rate,
            short_rate: fill.short_rate,
            divergence: fill.divergence,
            long_order_id: fill.long_order_id.clone(),
            short_order_id: fill.short_order_id.clone(),
        });
    }

    fn merge_leg(
        leg: Option<&mut LegMetadata>,
        add_quantity: Decimal,
        fill_price: Decimal,
        add_fees: Decimal,
        add_slippage: Decimal,
        order_id: Option<String>,
        timestamp: DateTime<Utc>,
    ) {
        let Some(leg) = leg else { return };
        let old_quantity = leg.quantity;
        let new_quantity = old_quantity + add_quantity;
        if new_quantity > Decimal::ZERO {
            leg.entry_price =
                (leg.entry_price * old_quantity + fill_price * add_quantity) / new_quantity;
        }
        leg.quantity = new_quantity;
        leg.fees_paid += add_fees;
        leg.slippage_usd += add_slippage;
        leg.exposure_usd += add_quantity.abs() * fill_price;
        if order_id.is_some() {
            leg.order_id = order_id;
        }
        leg.last_updated = timestamp;
    }
}

// =============================================================================
// Trade fills
// =============================================================================

/// Whether a fill opened or closed a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeType {
    Entry,
    Exit,
}

impl TradeType {
    /// Returns the display string (also the database value).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Exit => "exit",
        }
    }
}

/// A consolidated fill record persisted per leg execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeFill {
    pub id: Uuid,
    pub position_id: Uuid,
    pub account_id: Option<String>,
    pub trade_type: TradeType,
    /// Venue name.
    pub dex_id: String,
    /// Normalized symbol.
    pub symbol_id: String,
    pub order_id: String,
    pub trade_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub side: OrderSide,
    pub total_quantity: Decimal,
    pub weighted_avg_price: Decimal,
    pub total_fee: Decimal,
    pub fee_currency: String,
    pub realized_pnl: Option<Decimal>,
    pub realized_funding: Option<Decimal>,
    /// Number of venue trades consolidated into this record.
    pub fill_count: i32,
}

// =============================================================================
// Sessions
// =============================================================================

/// Coarse process health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionHealth {
    Starting,
    Running,
    Degraded,
    Stopped,
}

impl SessionHealth {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Degraded => "degraded",
            Self::Stopped => "stopped",
        }
    }
}

/// Where the orchestrator currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    Initializing,
    Idle,
    Scanning,
    Executing,
    Monitoring,
    Closing,
    Complete,
    Error,
}

impl LifecycleStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Executing => "executing",
            Self::Monitoring => "monitoring",
            Self::Closing => "closing",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

/// One process lifetime of the strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub strategy: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_heartbeat: DateTime<Utc>,
    pub health: SessionHealth,
    pub lifecycle_stage: LifecycleStage,
    pub paused: bool,
    pub metadata: serde_json::Value,
}

impl Session {
    /// Starts a fresh session in the `Starting`/`Initializing` state.
    #[must_use]
    pub fn start(strategy: &str, now: DateTime<Utc>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            strategy: strategy.to_string(),
            started_at: now,
            ended_at: None,
            last_heartbeat: now,
            health: SessionHealth::Starting,
            lifecycle_stage: LifecycleStage::Initializing,
            paused: false,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn leg(side: Side, price: Decimal, quantity: Decimal, multiplier: Decimal) -> LegMetadata {
        LegMetadata {
            side,
            entry_price: price,
            quantity,
            order_id: Some("1".to_string()),
            fees_paid: dec!(0.2),
            slippage_usd: dec!(0.05),
            execution_mode: ExecutionMode::LimitOnly,
            exposure_usd: price * quantity,
            last_updated: Utc::now(),
            contract_id: Some("BTCUSDT".to_string()),
            quantity_multiplier: multiplier,
            price_multiplier: Decimal::ONE,
            mark_price: None,
            unrealized_pnl: None,
            funding_accrued: None,
            margin_reserved: None,
            liquidation_price: None,
        }
    }

    fn position() -> FundingArbPosition {
        let mut legs = BTreeMap::new();
        legs.insert("aster".to_string(), leg(Side::Long, dec!(50000), dec!(0.02), Decimal::ONE));
        legs.insert("lighter".to_string(), leg(Side::Short, dec!(50010), dec!(0.02), Decimal::ONE));
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
            current_divergence: None,
            last_checked_at: None,
            legs,
            fills: Vec::new(),
        }
    }

    #[test]
    fn legs_consistency_invariant() {
        let p = position();
        assert!(p.legs_consistent());

        let mut broken = position();
        broken.legs.remove("lighter");
        assert!(!broken.legs_consistent());

        let mut zeroed = position();
        zeroed.legs.get_mut("aster").unwrap().quantity = Decimal::ZERO;
        assert!(!zeroed.legs_consistent());
    }

    #[test]
    fn token_imbalance_uses_multipliers() {
        let mut p = position();
        // Short venue quotes in 1000-lot contracts: 0.00002 contracts ×
        // 1000 tokens each equals the long leg's 0.02 tokens.
        let short = p.legs.get_mut("lighter").unwrap();
        short.quantity = dec!(0.00002);
        short.quantity_multiplier = dec!(1000);
        assert_eq!(p.token_imbalance_ratio(), Some(Decimal::ZERO));

        let short = p.legs.get_mut("lighter").unwrap();
        short.quantity = dec!(0.00001);
        assert_eq!(p.token_imbalance_ratio(), Some(dec!(0.5)));
    }

    #[test]
    fn merge_recomputes_weighted_rates_and_vwap() {
        let mut p = position();
        let fill = MergeFill {
            size_usd: dec!(1000),
            long_rate: dec!(-0.0003),
            short_rate: dec!(0.0005),
            divergence: dec!(0.0008),
            long_quantity: dec!(0.02),
            short_quantity: dec!(0.02),
            long_price: dec!(51000),
            short_price: dec!(51010),
            long_fees: dec!(0.2),
            short_fees: dec!(0.2),
            long_slippage: dec!(0.01),
            short_slippage: dec!(0.01),
            long_order_id: Some("2".to_string()),
            short_order_id: Some("3".to_string()),
            timestamp: Utc::now(),
        };
        p.merge_additional_fill(&fill);

        assert_eq!(p.size_usd, dec!(2000));
        // Weighted: (0.0004*1000 + 0.0008*1000)/2000 = 0.0006
        assert_eq!(p.entry_divergence, dec!(0.0006));
        assert_eq!(p.entry_long_rate, dec!(-0.0002));
        assert_eq!(p.entry_short_rate, dec!(0.0004));
        // Leg VWAP: (50000*0.02 + 51000*0.02) / 0.04 = 50500
        assert_eq!(p.long_leg().unwrap().entry_price, dec!(50500));
        assert_eq!(p.long_leg().unwrap().quantity, dec!(0.04));
        assert_eq!(p.total_fees_paid, dec!(0.8));
        assert_eq!(p.fills.len(), 1);
        assert_eq!(p.fills[0].long_order_id.as_deref(), Some("2"));
    }

    #[test]
    fn merge_weighted_rate_invariant_holds() {
        // weighted_rate × total = Σ(rate_i × size_i)
        let mut p = position();
        let fill = MergeFill {
            size_usd: dec!(500),
            long_rate: dec!(-0.0004),
            short_rate: dec!(0.0002),
            divergence: dec!(0.0006),
            long_quantity: dec!(0.01),
            short_quantity: dec!(0.01),
            long_price: dec!(50200),
            short_price: dec!(50210),
            long_fees: Decimal::ZERO,
            short_fees: Decimal::ZERO,
            long_slippage: Decimal::ZERO,
            short_slippage: Decimal::ZERO,
            long_order_id: None,
            short_order_id: None,
            timestamp: Utc::now(),
        };
        p.merge_additional_fill(&fill);

        let lhs = p.entry_divergence * p.size_usd;
        let rhs = dec!(0.0004) * dec!(1000) + dec!(0.0006) * dec!(500);
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn position_serde_round_trip_preserves_decimals() {
        let p = position();
        let json = serde_json::to_string(&p).unwrap();
        let back: FundingArbPosition = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
        assert_eq!(back.long_leg().unwrap().entry_price, dec!(50000));
    }

    #[test]
    fn session_starts_initializing() {
        let s = Session::start("funding_arbitrage", Utc::now());
        assert_eq!(s.health, SessionHealth::Starting);
        assert_eq!(s.lifecycle_stage, LifecycleStage::Initializing);
        assert!(!s.paused);
    }
}

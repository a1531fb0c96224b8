//! Shared market-data and order types.
//!
//! These are the structures passed between venue connectors, the executor,
//! the risk controller, and the profit monitor. Prices and quantities are
//! `Decimal` end to end; floats never cross a component boundary.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Side
// =============================================================================

/// Direction of one leg of a hedge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Long leg: buys the perpetual, profits when price rises.
    Long,
    /// Short leg: sells the perpetual, profits when price falls.
    Short,
}

impl Side {
    /// Returns the opposite side.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// Returns the order side used when *opening* this leg.
    #[must_use]
    pub fn open_order_side(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }

    /// Returns the order side used when *closing* this leg.
    #[must_use]
    pub fn close_order_side(self) -> OrderSide {
        self.open_order_side().opposite()
    }

    /// Returns the display string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Buy/sell direction of a single order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

impl OrderSide {
    /// Returns the opposite direction.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Returns the display string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// BBO
// =============================================================================

/// Best bid/offer for one symbol on one venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bbo {
    /// Symbol in the venue's native format (e.g. `BTCUSDT`).
    pub symbol: String,
    /// Best bid price.
    pub bid: Decimal,
    /// Best ask price.
    pub ask: Decimal,
    /// Wall-clock time the quote was observed.
    pub timestamp: DateTime<Utc>,
    /// Monotonic stream sequence, where the venue provides one.
    pub sequence: Option<u64>,
}

impl Bbo {
    /// Returns the mid price, or `None` when either side is non-positive.
    #[must_use]
    pub fn mid(&self) -> Option<Decimal> {
        if self.bid <= Decimal::ZERO || self.ask <= Decimal::ZERO {
            return None;
        }
        Some((self.bid + self.ask) / Decimal::TWO)
    }

    /// Returns true when both sides carry a positive price.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.bid > Decimal::ZERO && self.ask > Decimal::ZERO
    }

    /// Age of the quote relative to `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }
}

// =============================================================================
// Contract metadata
// =============================================================================

/// Venue-native contract attributes, fetched once and cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractAttributes {
    /// Venue-native contract identifier.
    pub contract_id: String,
    /// Minimum price increment.
    pub tick_size: Decimal,
    /// Minimum quantity increment.
    pub step_size: Decimal,
    /// Contract-units → underlying-tokens multiplier.
    pub quantity_multiplier: Decimal,
    /// Price scaling multiplier (1 for most venues).
    pub price_multiplier: Decimal,
    /// Minimum order quantity in venue-native units.
    pub min_quantity: Decimal,
    /// Maximum leverage the venue allows for this symbol.
    pub max_leverage: u32,
}

/// Current and maximum leverage for a symbol on one venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeverageInfo {
    /// Leverage currently configured on the account.
    pub current_leverage: u32,
    /// Maximum leverage the venue allows.
    pub max_leverage: u32,
}

/// Maker/taker fee rates plus the venue's funding cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeStructure {
    /// Maker fee as a fraction (0.0002 = 2 bps).
    pub maker_fee: Decimal,
    /// Taker fee as a fraction.
    pub taker_fee: Decimal,
    /// Seconds between funding settlements on this venue.
    pub funding_interval_secs: u64,
}

// =============================================================================
// Position snapshot
// =============================================================================

/// Live read of one leg's state from a venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangePositionSnapshot {
    /// Symbol in the venue's native format.
    pub symbol: String,
    /// Economic side of the position.
    pub side: Side,
    /// Signed quantity in venue-native units (negative for shorts).
    pub quantity: Decimal,
    /// Average entry price.
    pub entry_price: Decimal,
    /// Venue mark price.
    pub mark_price: Decimal,
    /// Unrealized PnL in USD.
    pub unrealized_pnl: Decimal,
    /// Realized PnL in USD.
    pub realized_pnl: Decimal,
    /// Funding accrued since entry, where the venue reports it.
    pub funding_accrued: Option<Decimal>,
    /// Current leverage.
    pub leverage: u32,
    /// Margin reserved for the position in USD.
    pub margin_reserved: Decimal,
    /// Estimated liquidation price, if the venue reports one.
    pub liquidation_price: Option<Decimal>,
}

impl ExchangePositionSnapshot {
    /// Absolute quantity regardless of sign convention.
    #[must_use]
    pub fn abs_quantity(&self) -> Decimal {
        self.quantity.abs()
    }

    /// Returns true when the venue reports no remaining position.
    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }
}

// =============================================================================
// Order lifecycle
// =============================================================================

/// Execution mode requested for one leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Post at the aligned limit price; cancel at timeout.
    LimitOnly,
    /// Immediate-or-cancel market order.
    MarketOnly,
    /// Limit order offset across the spread so it fills at current BBO.
    AggressiveLimit,
    /// Limit first; market-fill the residual on timeout.
    Mixed,
}

impl ExecutionMode {
    /// Returns the display string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LimitOnly => "limit_only",
            Self::MarketOnly => "market_only",
            Self::AggressiveLimit => "aggressive_limit",
            Self::Mixed => "mixed",
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Time-in-force for limit orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Good till cancel.
    Gtc,
    /// Immediate or cancel.
    Ioc,
    /// Post-only; rejected if it would cross.
    PostOnly,
}

/// Venue order status as reported on the private stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Accepted, resting.
    New,
    /// Partially filled, still resting.
    PartiallyFilled,
    /// Fully filled.
    Filled,
    /// Canceled by us or the venue.
    Canceled,
    /// Rejected at submission.
    Rejected,
    /// Expired (IOC remainder etc.).
    Expired,
}

impl OrderStatus {
    /// Returns true for statuses that can never fill further.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Rejected | Self::Expired)
    }
}

/// Order-status transition delivered on a venue's private stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    /// Venue name.
    pub venue: String,
    /// Symbol in the venue's native format.
    pub symbol: String,
    /// Venue order id.
    pub order_id: String,
    /// Direction of the order.
    pub side: OrderSide,
    /// Current status.
    pub status: OrderStatus,
    /// Cumulative filled quantity.
    pub filled_quantity: Decimal,
    /// Average fill price over the fills so far.
    pub avg_fill_price: Option<Decimal>,
    /// Fee charged for the latest fill.
    pub fee: Decimal,
    /// Currency of the fee.
    pub fee_currency: Option<String>,
    /// True when the venue flagged the update as a forced liquidation.
    pub is_liquidation: bool,
    /// Wall-clock event time.
    pub timestamp: DateTime<Utc>,
}

/// Forced-liquidation event from a venue's force-order stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationEvent {
    /// Venue name.
    pub venue: String,
    /// Symbol in the venue's native format.
    pub symbol: String,
    /// Side that was liquidated.
    pub side: OrderSide,
    /// Liquidated quantity.
    pub quantity: Decimal,
    /// Liquidation price.
    pub price: Decimal,
    /// Wall-clock event time.
    pub timestamp: DateTime<Utc>,
}

/// Single trade from a venue's user trade history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeData {
    /// Venue order id this trade belongs to.
    pub order_id: String,
    /// Venue trade id.
    pub trade_id: String,
    /// Symbol in the venue's native format.
    pub symbol: String,
    /// Direction of the trade.
    pub side: OrderSide,
    /// Traded quantity.
    pub quantity: Decimal,
    /// Trade price.
    pub price: Decimal,
    /// Fee charged.
    pub fee: Decimal,
    /// Fee currency.
    pub fee_currency: String,
    /// Realized PnL attributed to the trade, if reported.
    pub realized_pnl: Option<Decimal>,
    /// Funding payment attributed to the trade window, if reported.
    pub realized_funding: Option<Decimal>,
    /// Wall-clock execution time.
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Opportunities
// =============================================================================

/// Candidate hedge returned by the external opportunity store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpportunityData {
    /// Normalized symbol (e.g. `BTC`).
    pub symbol: String,
    /// Venue to take the long leg on.
    pub long_dex: String,
    /// Venue to take the short leg on.
    pub short_dex: String,
    /// Funding rate on the long venue, per that venue's interval.
    pub long_rate: Decimal,
    /// Funding rate on the short venue, per that venue's interval.
    pub short_rate: Decimal,
    /// `short_rate - long_rate`, interval-normalized.
    pub divergence: Decimal,
    /// Fee-adjusted net profit over the configured horizon, as a fraction.
    pub net_profit_percent: Decimal,
    /// Open interest on the long venue in USD.
    pub open_interest_long_usd: Decimal,
    /// Open interest on the short venue in USD.
    pub open_interest_short_usd: Decimal,
}

/// Filter passed to the opportunity store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpportunityFilter {
    /// Minimum fee-adjusted net profit, as a fraction.
    pub min_profit_percent: Option<Decimal>,
    /// Maximum open interest on the required leg in USD.
    pub max_oi_usd: Option<Decimal>,
    /// Only venues with a wired trading client.
    pub whitelist_dexes: Option<Vec<String>>,
    /// Venue that must appear on one side.
    pub required_dex: Option<String>,
    /// Restrict to a single symbol.
    pub symbol: Option<String>,
    /// Maximum number of candidates to return.
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn side_opposite_and_order_sides() {
        assert_eq!(Side::Long.opposite(), Side::Short);
        assert_eq!(Side::Long.open_order_side(), OrderSide::Buy);
        assert_eq!(Side::Long.close_order_side(), OrderSide::Sell);
        assert_eq!(Side::Short.open_order_side(), OrderSide::Sell);
        assert_eq!(Side::Short.close_order_side(), OrderSide::Buy);
    }

    #[test]
    fn bbo_mid_and_validity() {
        let bbo = Bbo {
            symbol: "BTCUSDT".to_string(),
            bid: dec!(49990),
            ask: dec!(50010),
            timestamp: Utc::now(),
            sequence: Some(7),
        };
        assert!(bbo.is_valid());
        assert_eq!(bbo.mid(), Some(dec!(50000)));

        let broken = Bbo { bid: Decimal::ZERO, ..bbo };
        assert!(!broken.is_valid());
        assert_eq!(broken.mid(), None);
    }

    #[test]
    fn snapshot_flat_detection() {
        let snap = ExchangePositionSnapshot {
            symbol: "BTCUSDT".to_string(),
            side: Side::Short,
            quantity: dec!(-0.02),
            entry_price: dec!(50005),
            mark_price: dec!(50000),
            unrealized_pnl: dec!(0.1),
            realized_pnl: Decimal::ZERO,
            funding_accrued: Some(dec!(0.05)),
            leverage: 10,
            margin_reserved: dec!(100),
            liquidation_price: Some(dec!(54500)),
        };
        assert!(!snap.is_flat());
        assert_eq!(snap.abs_quantity(), dec!(0.02));
    }

    #[test]
    fn order_status_terminality() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
    }

    #[test]
    fn execution_mode_round_trips_through_serde() {
        let mode = ExecutionMode::AggressiveLimit;
        let json = serde_json::to_string(&mode).unwrap();
        assert_eq!(json, "\"aggressive_limit\"");
        let back: ExecutionMode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mode);
    }
}

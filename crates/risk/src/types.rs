//! Exit reasons, rate inputs, and the risk-manager trait.

use chrono::{DateTime, Utc};
use funding_arb_data::FundingArbPosition;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Why a hedge should (or should not) close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Funding divergence dropped below the flip margin.
    DivergenceFlipped,
    /// Most of the entry edge is gone.
    SevereErosion,
    /// Edge eroded below the configured ratio.
    ProfitErosion,
    /// Position exceeded its maximum age.
    TimeLimit,
    /// Not exiting: this triple is still the top-ranked opportunity.
    HoldTopOpportunity,
    /// One leg's venue snapshot shows zero quantity.
    LegLiquidated,
    /// Both legs are gone venue-side.
    AllLegsClosed,
    /// Leg token amounts diverged beyond the imbalance threshold.
    SevereImbalance,
    /// A venue's force-order stream reported a liquidation on our side.
    Liquidation {
        /// Venue that reported the event.
        venue: String,
    },
    /// Profit monitor captured a basis-spread profit.
    ImmediateProfit,
    /// Operator-requested close through the control API.
    Manual,
}

impl ExitReason {
    /// Stable code recorded on the position and in logs.
    #[must_use]
    pub fn code(&self) -> String {
        match self {
            Self::DivergenceFlipped => "DIVERGENCE_FLIPPED".to_string(),
            Self::SevereErosion => "SEVERE_EROSION".to_string(),
            Self::ProfitErosion => "PROFIT_EROSION".to_string(),
            Self::TimeLimit => "TIME_LIMIT".to_string(),
            Self::HoldTopOpportunity => "HOLD_TOP_OPPORTUNITY".to_string(),
            Self::LegLiquidated => "LEG_LIQUIDATED".to_string(),
            Self::AllLegsClosed => "ALL_LEGS_CLOSED".to_string(),
            Self::SevereImbalance => "SEVERE_IMBALANCE".to_string(),
            Self::Liquidation { venue } => format!("LIQUIDATION_{}", venue.to_ascii_uppercase()),
            Self::ImmediateProfit => "IMMEDIATE_PROFIT".to_string(),
            Self::Manual => "MANUAL".to_string(),
        }
    }

    /// Critical reasons bypass the minimum-hold and hold-top-opportunity
    /// guards and close with market orders.
    #[must_use]
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::LegLiquidated
                | Self::AllLegsClosed
                | Self::SevereImbalance
                | Self::Liquidation { .. }
        )
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The scanner's current best candidate, passed in so the erosion check can
/// hold a position that is still the top-ranked opportunity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopOpportunity {
    pub symbol: String,
    pub long_dex: String,
    pub short_dex: String,
    /// Fee-adjusted net profit of the candidate, as a fraction.
    pub net_profit_percent: Decimal,
}

impl TopOpportunity {
    /// True when this candidate is the same triple as the position.
    #[must_use]
    pub fn matches(&self, position: &FundingArbPosition) -> bool {
        self.symbol.eq_ignore_ascii_case(&position.symbol)
            && self.long_dex.eq_ignore_ascii_case(&position.long_dex)
            && self.short_dex.eq_ignore_ascii_case(&position.short_dex)
    }
}

/// Latest funding rates for a position's triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentRates {
    /// `short_rate - long_rate`, interval-normalized.
    pub divergence: Decimal,
    pub long_rate: Decimal,
    pub short_rate: Decimal,
    pub long_oi_usd: Option<Decimal>,
    pub short_oi_usd: Option<Decimal>,
    /// The scanner's top candidate, if one exists this cycle.
    pub top_opportunity: Option<TopOpportunity>,
    /// Minimum net profit a candidate needs to justify holding.
    pub min_profit: Decimal,
}

impl CurrentRates {
    /// Plain rates with no hold context; convenient in tests.
    #[must_use]
    pub fn simple(divergence: Decimal, long_rate: Decimal, short_rate: Decimal) -> Self {
        Self {
            divergence,
            long_rate,
            short_rate,
            long_oi_usd: None,
            short_oi_usd: None,
            top_opportunity: None,
            min_profit: Decimal::ZERO,
        }
    }
}

/// Outcome of one risk evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitDecision {
    pub should_exit: bool,
    /// Exit reason, or a hold annotation when `should_exit` is false.
    pub reason: Option<ExitReason>,
}

impl ExitDecision {
    #[must_use]
    pub fn hold() -> Self {
        Self { should_exit: false, reason: None }
    }

    #[must_use]
    pub fn hold_because(reason: ExitReason) -> Self {
        Self { should_exit: false, reason: Some(reason) }
    }

    #[must_use]
    pub fn exit(reason: ExitReason) -> Self {
        Self { should_exit: true, reason: Some(reason) }
    }
}

/// A pluggable exit-rule strategy.
///
/// Implementations must be pure over their inputs: repeated calls with the
/// same `(position, rates, now)` return the same decision.
pub trait RiskManager: Send + Sync {
    /// Evaluates whether the position should close.
    fn should_exit(
        &self,
        position: &FundingArbPosition,
        rates: &CurrentRates,
        now: DateTime<Utc>,
    ) -> ExitDecision;

    /// Strategy name for logs.
    fn name(&self) -> &str;
}

//! Immediate-profit evaluation.
//!
//! Pure over its inputs so the decision can be exercised without sockets.
//! Exit-price convention: the long leg sells to the bid, the short leg buys
//! from the ask. Funding accrued is a primary profit source for this
//! strategy and is added to both legs' price PnL. Closing fees are
//! estimated at maker rates because closes go out as aggressive limits.

use funding_arb_core::{Bbo, ExchangePositionSnapshot};
use funding_arb_data::FundingArbPosition;
use rust_decimal::Decimal;

/// Outcome of one profit evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfitEvaluation {
    pub long_pnl: Decimal,
    pub short_pnl: Decimal,
    pub estimated_closing_fees: Decimal,
    pub net_profit: Decimal,
    pub threshold: Decimal,
    pub should_close: bool,
}

/// Per-leg price PnL at exit prices.
///
/// Falls back to the snapshot's own unrealized PnL when the fresh quote is
/// missing or one-sided.
#[must_use]
pub fn exit_price_pnl(
    snapshot: &ExchangePositionSnapshot,
    bbo: Option<&Bbo>,
    is_long: bool,
) -> Decimal {
    let quantity = snapshot.abs_quantity();
    if let Some(bbo) = bbo {
        if bbo.is_valid() && snapshot.entry_price > Decimal::ZERO && !quantity.is_zero() {
            return if is_long {
                // Selling into the bid.
                (bbo.bid - snapshot.entry_price) * quantity
            } else {
                // Buying back from the ask.
                (snapshot.entry_price - bbo.ask) * quantity
            };
        }
    }
    snapshot.unrealized_pnl
}

/// Maker-rate closing fee estimate for both legs.
#[must_use]
pub fn estimate_closing_fees(
    long_snapshot: &ExchangePositionSnapshot,
    short_snapshot: &ExchangePositionSnapshot,
    long_maker_fee: Decimal,
    short_maker_fee: Decimal,
) -> Decimal {
    let leg = |snapshot: &ExchangePositionSnapshot, fee: Decimal| {
        if snapshot.mark_price > Decimal::ZERO {
            snapshot.mark_price * snapshot.abs_quantity() * fee
        } else {
            Decimal::ZERO
        }
    };
    leg(long_snapshot, long_maker_fee) + leg(short_snapshot, short_maker_fee)
}

/// Full evaluation: can this hedge close at a profit right now?
///
/// `min_profit_pct` is the threshold as a fraction of position notional
/// (default 0.2%). Positions with a nonpositive notional never close here.
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn evaluate_immediate_profit(
    position: &FundingArbPosition,
    long_snapshot: &ExchangePositionSnapshot,
    short_snapshot: &ExchangePositionSnapshot,
    long_bbo: Option<&Bbo>,
    short_bbo: Option<&Bbo>,
    long_maker_fee: Decimal,
    short_maker_fee: Decimal,
    min_profit_pct: Decimal,
) -> ProfitEvaluation {
    let long_funding = long_snapshot.funding_accrued.unwrap_or(Decimal::ZERO);
    let short_funding = short_snapshot.funding_accrued.unwrap_or(Decimal::ZERO);

    let long_pnl = exit_price_pnl(long_snapshot, long_bbo, true) + long_funding;
    let short_pnl = exit_price_pnl(short_snapshot, short_bbo, false) + short_funding;

    let estimated_closing_fees =
        estimate_closing_fees(long_snapshot, short_snapshot, long_maker_fee, short_maker_fee);
    let net_profit = long_pnl + short_pnl - estimated_closing_fees;

    let threshold = position.size_usd * min_profit_pct;
    let should_close = position.size_usd > Decimal::ZERO && net_profit > threshold;

    ProfitEvaluation {
        long_pnl,
        short_pnl,
        estimated_closing_fees,
        net_profit,
        threshold,
        should_close,
    }
}

//! Parallel detectors that pre-empt the waterfall.
//!
//! These fire on venue snapshots and liquidation events rather than funding
//! rates. Their reasons are critical: they bypass the minimum-hold and
//! hold-top-opportunity guards.

use crate::types::ExitReason;
use funding_arb_core::{symbol, ExchangePositionSnapshot, LiquidationEvent, OrderSide, Side};
use funding_arb_data::FundingArbPosition;
use rust_decimal::Decimal;

/// Detects one or both legs missing venue-side.
///
/// A leg whose snapshot is absent or zero-quantity while the other is still
/// open means the venue force-closed it; both gone means the hedge is gone.
#[must_use]
pub fn detect_leg_liquidation(
    long_snapshot: Option<&ExchangePositionSnapshot>,
    short_snapshot: Option<&ExchangePositionSnapshot>,
) -> Option<ExitReason> {
    let long_open = long_snapshot.is_some_and(|s| !s.is_flat());
    let short_open = short_snapshot.is_some_and(|s| !s.is_flat());

    match (long_open, short_open) {
        (false, false) => Some(ExitReason::AllLegsClosed),
        (true, false) | (false, true) => Some(ExitReason::LegLiquidated),
        (true, true) => None,
    }
}

/// Detects a hedge that is no longer delta-neutral.
///
/// Both legs are converted to actual tokens through their multipliers; a
/// relative gap above the threshold means one leg was liquidated or filled
/// differently.
#[must_use]
pub fn detect_severe_imbalance(
    position: &FundingArbPosition,
    threshold: Decimal,
) -> Option<ExitReason> {
    let ratio = position.token_imbalance_ratio()?;
    if ratio > threshold {
        tracing::warn!(
            symbol = %position.symbol,
            imbalance = %ratio,
            "severe leg imbalance detected"
        );
        Some(ExitReason::SevereImbalance)
    } else {
        None
    }
}

/// Matches a venue liquidation event against the position.
///
/// The event must touch one of the hedge's venues, the same underlying, and
/// the side we hold there: a forced sell closes longs, a forced buy closes
/// shorts.
#[must_use]
pub fn detect_external_liquidation(
    position: &FundingArbPosition,
    event: &LiquidationEvent,
) -> Option<ExitReason> {
    if !symbol::same_underlying(&event.symbol, &position.symbol) {
        return None;
    }

    let our_side = if event.venue.eq_ignore_ascii_case(&position.long_dex) {
        Side::Long
    } else if event.venue.eq_ignore_ascii_case(&position.short_dex) {
        Side::Short
    } else {
        return None;
    };

    let closes_our_side = match (our_side, event.side) {
        (Side::Long, OrderSide::Sell) | (Side::Short, OrderSide::Buy) => true,
        _ => false,
    };

    closes_our_side.then(|| ExitReason::Liquidation { venue: event.venue.clone() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn snapshot(quantity: Decimal) -> ExchangePositionSnapshot {
        ExchangePositionSnapshot {
            symbol: "BTCUSDT".to_string(),
            side: if quantity >= Decimal::ZERO { Side::Long } else { Side::Short },
            quantity,
            entry_price: dec!(50000),
            mark_price: dec!(50000),
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            funding_accrued: None,
            leverage: 10,
            margin_reserved: dec!(100),
            liquidation_price: None,
        }
    }

    #[test]
    fn one_missing_leg_is_a_liquidation() {
        let long = snapshot(dec!(0.02));
        assert_eq!(
            detect_leg_liquidation(Some(&long), None),
            Some(ExitReason::LegLiquidated)
        );
        assert_eq!(
            detect_leg_liquidation(Some(&long), Some(&snapshot(Decimal::ZERO))),
            Some(ExitReason::LegLiquidated)
        );
    }

    #[test]
    fn both_missing_legs_means_all_closed() {
        assert_eq!(detect_leg_liquidation(None, None), Some(ExitReason::AllLegsClosed));
    }

    #[test]
    fn intact_hedge_detects_nothing() {
        let long = snapshot(dec!(0.02));
        let short = snapshot(dec!(-0.02));
        assert_eq!(detect_leg_liquidation(Some(&long), Some(&short)), None);
    }

    #[test]
    fn imbalance_over_five_percent_fires() {
        let mut position = crate::combined::tests::sample_position(dec!(0.0004));
        position.legs.get_mut("lighter").unwrap().quantity = dec!(0.018);
        // (0.02 - 0.018) / 0.02 = 10%
        assert_eq!(
            detect_severe_imbalance(&position, crate::severe_imbalance_threshold()),
            Some(ExitReason::SevereImbalance)
        );

        position.legs.get_mut("lighter").unwrap().quantity = dec!(0.0199);
        assert_eq!(detect_severe_imbalance(&position, crate::severe_imbalance_threshold()), None);
    }

    #[test]
    fn external_liquidation_matches_venue_symbol_and_side() {
        let position = crate::combined::tests::sample_position(dec!(0.0004));
        let event = LiquidationEvent {
            venue: "aster".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Sell,
            quantity: dec!(0.02),
            price: dec!(48000),
            timestamp: Utc::now(),
        };
        let reason = detect_external_liquidation(&position, &event).unwrap();
        assert_eq!(reason.code(), "LIQUIDATION_ASTER");
        assert!(reason.is_critical());

        // A forced buy on the long venue is someone else's short; ignore.
        let mut wrong_side = event.clone();
        wrong_side.side = OrderSide::Buy;
        assert!(detect_external_liquidation(&position, &wrong_side).is_none());

        // Different underlying; ignore.
        let mut wrong_symbol = event.clone();
        wrong_symbol.symbol = "ETHUSDT".to_string();
        assert!(detect_external_liquidation(&position, &wrong_symbol).is_none());

        // Venue not part of the hedge; ignore.
        let mut wrong_venue = event;
        wrong_venue.venue = "backpack".to_string();
        assert!(detect_external_liquidation(&position, &wrong_venue).is_none());
    }
}

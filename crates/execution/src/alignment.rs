//! Break-even entry price alignment.
//!
//! Given both venues' BBO, produce limit prices with `long < short` so the
//! hedge opens at nonnegative theoretical price PnL, staying as close to
//! each venue's touch as the offset allows. When the venues' mid prices
//! have drifted apart beyond the spread threshold, alignment gives up and
//! falls back to raw BBO pricing.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Which pricing path produced the result; recorded per leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentStrategy {
    /// Prices aligned around the cross-venue mid.
    BreakEven,
    /// Spread too wide; raw touch prices used.
    BboFallback,
}

impl AlignmentStrategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BreakEven => "break_even",
            Self::BboFallback => "bbo_fallback",
        }
    }
}

/// Result of the alignment computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedPrices {
    /// Limit price for the long (buy) leg.
    pub long_price: Decimal,
    /// Limit price for the short (sell) leg.
    pub short_price: Decimal,
    /// Absolute inter-venue mid gap relative to the lower mid.
    pub spread_pct: Decimal,
    pub strategy_used: AlignmentStrategy,
}

/// Default half-spread applied around the reference mid.
const DEFAULT_OFFSET_PCT: Decimal = dec!(0.0005);

pub struct BreakEvenAligner;

impl BreakEvenAligner {
    /// Computes aligned limit prices for both legs.
    ///
    /// `limit_offset_pct` is the half-distance each leg keeps from the
    /// shared reference mid; `max_spread_threshold_pct` bounds the
    /// inter-venue price gap beyond which raw BBO is used instead.
    #[must_use]
    pub fn calculate_aligned_prices(
        long_bid: Decimal,
        long_ask: Decimal,
        short_bid: Decimal,
        short_ask: Decimal,
        limit_offset_pct: Option<Decimal>,
        max_spread_threshold_pct: Option<Decimal>,
    ) -> AlignedPrices {
        let long_mid = (long_bid + long_ask) / dec!(2);
        let short_mid = (short_bid + short_ask) / dec!(2);
        let low_mid = long_mid.min(short_mid);

        let spread_pct = if low_mid > Decimal::ZERO {
            (long_mid - short_mid).abs() / low_mid
        } else {
            Decimal::ZERO
        };

        if let Some(threshold) = max_spread_threshold_pct {
            if spread_pct > threshold {
                // Venue prices disagree too much for a shared reference;
                // take liquidity at the touch instead.
                return AlignedPrices {
                    long_price: long_ask,
                    short_price: short_bid,
                    spread_pct,
                    strategy_used: AlignmentStrategy::BboFallback,
                };
            }
        }

        let offset = limit_offset_pct.unwrap_or(DEFAULT_OFFSET_PCT).max(dec!(0.00005));
        let reference = (long_mid + short_mid) / dec!(2);
        let long_price = reference * (Decimal::ONE - offset);
        let short_price = reference * (Decimal::ONE + offset);

        AlignedPrices {
            long_price,
            short_price,
            spread_pct,
            strategy_used: AlignmentStrategy::BreakEven,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_prices_keep_long_below_short() {
        let aligned = BreakEvenAligner::calculate_aligned_prices(
            dec!(49990),
            dec!(49995),
            dec!(50005),
            dec!(50010),
            Some(dec!(0.0005)),
            Some(dec!(0.01)),
        );
        assert_eq!(aligned.strategy_used, AlignmentStrategy::BreakEven);
        assert!(aligned.long_price < aligned.short_price);
        // Reference mid is 50000; offset 5 bps each way.
        assert_eq!(aligned.long_price, dec!(49975.0000));
        assert_eq!(aligned.short_price, dec!(50025.0000));
    }

    #[test]
    fn wide_spread_falls_back_to_bbo() {
        // Venue mids 2% apart with a 0.3% threshold.
        let aligned = BreakEvenAligner::calculate_aligned_prices(
            dec!(49000),
            dec!(49010),
            dec!(50000),
            dec!(50010),
            Some(dec!(0.0005)),
            Some(dec!(0.003)),
        );
        assert_eq!(aligned.strategy_used, AlignmentStrategy::BboFallback);
        assert_eq!(aligned.long_price, dec!(49010));
        assert_eq!(aligned.short_price, dec!(50000));
        assert!(aligned.spread_pct > dec!(0.003));
    }

    #[test]
    fn no_threshold_always_aligns() {
        let aligned = BreakEvenAligner::calculate_aligned_prices(
            dec!(49000),
            dec!(49010),
            dec!(50000),
            dec!(50010),
            None,
            None,
        );
        assert_eq!(aligned.strategy_used, AlignmentStrategy::BreakEven);
        assert!(aligned.long_price < aligned.short_price);
    }

    #[test]
    fn spread_pct_is_relative_to_lower_mid() {
        let aligned = BreakEvenAligner::calculate_aligned_prices(
            dec!(100),
            dec!(100),
            dec!(102),
            dec!(102),
            None,
            None,
        );
        assert_eq!(aligned.spread_pct, dec!(0.02));
    }
}

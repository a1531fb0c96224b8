//! Per-venue fee table.
//!
//! Shared by the opener (entry fee estimate), the profit monitor (closing
//! fee estimate), and the analyzer (fee-adjusted ranking). Venues without a
//! wired fee structure fall back to typical DEX rates.

use funding_arb_core::FeeStructure;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

/// Fallback maker rate: 2 bps.
const FALLBACK_MAKER: Decimal = dec!(0.0002);
/// Fallback taker rate: 5 bps.
const FALLBACK_TAKER: Decimal = dec!(0.0005);

#[derive(Debug, Clone, Default)]
pub struct FeeCalculator {
    venues: HashMap<String, FeeStructure>,
}

impl FeeCalculator {
    #[must_use]
    pub fn new(venues: HashMap<String, FeeStructure>) -> Self {
        Self { venues }
    }

    /// Registers or replaces one venue's fee structure.
    pub fn set_venue(&mut self, venue: &str, fees: FeeStructure) {
        self.venues.insert(venue.to_ascii_lowercase(), fees);
    }

    /// One side's rate on one venue.
    #[must_use]
    pub fn rate(&self, venue: &str, is_maker: bool) -> Decimal {
        match self.venues.get(&venue.to_ascii_lowercase()) {
            Some(fees) => {
                if is_maker {
                    fees.maker_fee
                } else {
                    fees.taker_fee
                }
            }
            None => {
                if is_maker {
                    FALLBACK_MAKER
                } else {
                    FALLBACK_TAKER
                }
            }
        }
    }

    /// Funding interval for a venue, defaulting to 8 hours.
    #[must_use]
    pub fn funding_interval_secs(&self, venue: &str) -> u64 {
        self.venues
            .get(&venue.to_ascii_lowercase())
            .map_or(8 * 60 * 60, |f| f.funding_interval_secs)
    }

    /// Summed one-way fee fraction across both legs of a hedge.
    #[must_use]
    pub fn hedge_fee_pct(&self, long_venue: &str, short_venue: &str, is_maker: bool) -> Decimal {
        self.rate(long_venue, is_maker) + self.rate(short_venue, is_maker)
    }

    /// USD cost of executing both legs once at the given notional.
    #[must_use]
    pub fn total_cost(
        &self,
        long_venue: &str,
        short_venue: &str,
        notional_usd: Decimal,
        is_maker: bool,
    ) -> Decimal {
        self.hedge_fee_pct(long_venue, short_venue, is_maker) * notional_usd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculator() -> FeeCalculator {
        let mut calc = FeeCalculator::default();
        calc.set_venue(
            "aster",
            FeeStructure {
                maker_fee: dec!(0.0002),
                taker_fee: dec!(0.0004),
                funding_interval_secs: 28_800,
            },
        );
        calc.set_venue(
            "lighter",
            FeeStructure {
                maker_fee: Decimal::ZERO,
                taker_fee: dec!(0.0003),
                funding_interval_secs: 3_600,
            },
        );
        calc
    }

    #[test]
    fn known_venues_use_their_rates() {
        let calc = calculator();
        assert_eq!(calc.rate("aster", true), dec!(0.0002));
        assert_eq!(calc.rate("Aster", false), dec!(0.0004));
        assert_eq!(calc.rate("lighter", true), Decimal::ZERO);
    }

    #[test]
    fn unknown_venue_falls_back() {
        let calc = calculator();
        assert_eq!(calc.rate("backpack", true), dec!(0.0002));
        assert_eq!(calc.rate("backpack", false), dec!(0.0005));
    }

    #[test]
    fn hedge_cost_sums_both_legs() {
        let calc = calculator();
        assert_eq!(calc.hedge_fee_pct("aster", "lighter", true), dec!(0.0002));
        assert_eq!(
            calc.total_cost("aster", "lighter", dec!(1000), true),
            dec!(0.2)
        );
        assert_eq!(
            calc.total_cost("aster", "lighter", dec!(1000), false),
            dec!(0.7)
        );
    }

    #[test]
    fn funding_interval_defaults_to_eight_hours() {
        let calc = calculator();
        assert_eq!(calc.funding_interval_secs("lighter"), 3_600);
        assert_eq!(calc.funding_interval_secs("unknown"), 28_800);
    }
}

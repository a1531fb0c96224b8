//! Cross-venue quantity harmonization.
//!
//! Venues denominate the same market in different contract units. To keep
//! the hedge delta-neutral, both legs are converted to actual underlying
//! tokens, clamped to the smaller side, and converted back through each
//! venue's multiplier and step size.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-leg inputs to harmonization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegSizing {
    /// Desired quantity in venue-native units, already price-derived.
    pub raw_quantity: Decimal,
    /// Venue quantity step.
    pub step_size: Decimal,
    /// Contract-units → tokens multiplier.
    pub quantity_multiplier: Decimal,
    /// Venue minimum order quantity.
    pub min_quantity: Decimal,
}

/// Output of harmonization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarmonizedQuantities {
    /// Final quantity for the long venue, in its native units.
    pub long_quantity: Decimal,
    /// Final quantity for the short venue, in its native units.
    pub short_quantity: Decimal,
    /// Residual token imbalance after rounding.
    pub residual_tokens: Decimal,
}

fn round_down_to_step(quantity: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO || quantity <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (quantity / step).floor() * step
}

/// Harmonizes both legs to a common actual-token amount.
///
/// Returns `None` when either final quantity rounds to zero or falls below
/// the venue minimum; the caller aborts the open.
#[must_use]
pub fn harmonize_quantities(long: &LegSizing, short: &LegSizing) -> Option<HarmonizedQuantities> {
    let rounded_long = round_down_to_step(long.raw_quantity, long.step_size);
    let rounded_short = round_down_to_step(short.raw_quantity, short.step_size);

    let actual_long = rounded_long * long.quantity_multiplier;
    let actual_short = rounded_short * short.quantity_multiplier;
    let common = actual_long.min(actual_short);
    if common <= Decimal::ZERO {
        return None;
    }

    let final_long = round_down_to_step(common / long.quantity_multiplier, long.step_size);
    let final_short = round_down_to_step(common / short.quantity_multiplier, short.step_size);

    if final_long <= Decimal::ZERO || final_long < long.min_quantity {
        return None;
    }
    if final_short <= Decimal::ZERO || final_short < short.min_quantity {
        return None;
    }

    let residual_tokens = (final_long * long.quantity_multiplier
        - final_short * short.quantity_multiplier)
        .abs();

    Some(HarmonizedQuantities {
        long_quantity: final_long,
        short_quantity: final_short,
        residual_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn leg(raw: Decimal, step: Decimal, multiplier: Decimal, min: Decimal) -> LegSizing {
        LegSizing {
            raw_quantity: raw,
            step_size: step,
            quantity_multiplier: multiplier,
            min_quantity: min,
        }
    }

    #[test]
    fn equal_multipliers_clamp_to_smaller_side() {
        let long = leg(dec!(0.0239), dec!(0.001), Decimal::ONE, dec!(0.001));
        let short = leg(dec!(0.0201), dec!(0.001), Decimal::ONE, dec!(0.001));
        let h = harmonize_quantities(&long, &short).unwrap();
        assert_eq!(h.long_quantity, dec!(0.020));
        assert_eq!(h.short_quantity, dec!(0.020));
        assert_eq!(h.residual_tokens, Decimal::ZERO);
    }

    #[test]
    fn thousand_lot_venue_harmonizes_to_common_tokens() {
        // Short venue prices a 1000-token lot as one contract.
        let long = leg(dec!(20), dec!(1), Decimal::ONE, dec!(1));
        let short = leg(dec!(0.021), dec!(0.001), dec!(1000), dec!(0.001));
        let h = harmonize_quantities(&long, &short).unwrap();
        // common = min(20 × 1, 0.021 × 1000 = 21) = 20 tokens
        assert_eq!(h.long_quantity, dec!(20));
        assert_eq!(h.short_quantity, dec!(0.020));
        assert_eq!(h.residual_tokens, Decimal::ZERO);
    }

    #[test]
    fn rounding_residual_is_reported() {
        let long = leg(dec!(7), dec!(1), Decimal::ONE, dec!(1));
        let short = leg(dec!(0.0075), dec!(0.002), dec!(1000), dec!(0.002));
        // rounded_short = 0.006 → actual 6; common = 6; final_long = 6,
        // final_short = 0.006 → 6 tokens each, no residual.
        let h = harmonize_quantities(&long, &short).unwrap();
        assert_eq!(h.long_quantity, dec!(6));
        assert_eq!(h.short_quantity, dec!(0.006));
        assert_eq!(h.residual_tokens, Decimal::ZERO);

        // Step mismatch that cannot rebalance cleanly leaves a residual.
        let long = leg(dec!(7), dec!(2), Decimal::ONE, dec!(2));
        let short = leg(dec!(0.007), dec!(0.001), dec!(1000), dec!(0.001));
        let h = harmonize_quantities(&long, &short).unwrap();
        // rounded_long = 6 → common = min(6, 7) = 6; final_long = 6,
        // final_short = 0.006 → balanced again.
        assert_eq!(h.long_quantity, dec!(6));
        assert_eq!(h.residual_tokens, Decimal::ZERO);
    }

    #[test]
    fn zero_or_below_minimum_aborts() {
        let long = leg(dec!(0.0005), dec!(0.001), Decimal::ONE, dec!(0.001));
        let short = leg(dec!(0.02), dec!(0.001), Decimal::ONE, dec!(0.001));
        assert!(harmonize_quantities(&long, &short).is_none());

        let long = leg(dec!(0.005), dec!(0.001), Decimal::ONE, dec!(0.01));
        let short = leg(dec!(0.02), dec!(0.001), Decimal::ONE, dec!(0.001));
        assert!(harmonize_quantities(&long, &short).is_none());
    }
}

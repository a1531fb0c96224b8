//! Fee-adjusted funding profitability.
//!
//! Venues settle funding on different cadences, so rates are normalized to
//! a per-second basis before comparison. Profitability over a horizon is
//! the captured divergence minus round-trip fees.

use rust_decimal::Decimal;

/// Default profitability horizon: 24 hours.
pub const DEFAULT_TIME_HORIZON_SECS: u64 = 86_400;

pub struct FundingAnalyzer;

impl FundingAnalyzer {
    /// Normalizes a per-interval funding rate to per-second.
    #[must_use]
    pub fn normalize_funding_rate(rate: Decimal, interval_secs: u64) -> Decimal {
        if interval_secs == 0 {
            return Decimal::ZERO;
        }
        rate / Decimal::from(interval_secs)
    }

    /// Net profitability of a hedge over the horizon, as a fraction of
    /// notional.
    ///
    /// `gross = |short_per_s − long_per_s| × horizon`, fees are the summed
    /// entry and exit percentages. Negative results mean fees exceed the
    /// captured divergence.
    #[must_use]
    pub fn calculate_profitability(
        long_rate_per_sec: Decimal,
        short_rate_per_sec: Decimal,
        entry_fee_pct: Decimal,
        exit_fee_pct: Decimal,
        time_horizon_secs: u64,
    ) -> Decimal {
        let divergence_per_sec = (short_rate_per_sec - long_rate_per_sec).abs();
        let gross = divergence_per_sec * Decimal::from(time_horizon_secs);
        gross - entry_fee_pct - exit_fee_pct
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const EIGHT_HOURS: u64 = 8 * 60 * 60;

    #[test]
    fn normalizes_eight_hour_interval() {
        let normalized = FundingAnalyzer::normalize_funding_rate(dec!(0.0001), EIGHT_HOURS);
        assert_eq!(normalized, dec!(0.0001) / Decimal::from(EIGHT_HOURS));
    }

    #[test]
    fn normalizes_one_hour_interval() {
        let normalized = FundingAnalyzer::normalize_funding_rate(dec!(0.0001), 3600);
        assert_eq!(normalized, dec!(0.0001) / dec!(3600));
    }

    #[test]
    fn zero_and_negative_rates_pass_through() {
        assert_eq!(FundingAnalyzer::normalize_funding_rate(Decimal::ZERO, 3600), Decimal::ZERO);
        let negative = FundingAnalyzer::normalize_funding_rate(dec!(-0.0002), EIGHT_HOURS);
        assert!(negative < Decimal::ZERO);
    }

    #[test]
    fn zero_interval_yields_zero() {
        assert_eq!(FundingAnalyzer::normalize_funding_rate(dec!(0.01), 0), Decimal::ZERO);
    }

    #[test]
    fn opposite_sign_rates_sum_into_gross() {
        // Long pays you (-0.01% per 8h), short pays you (+0.02% per 8h).
        let long = FundingAnalyzer::normalize_funding_rate(dec!(-0.0001), EIGHT_HOURS);
        let short = FundingAnalyzer::normalize_funding_rate(dec!(0.0002), EIGHT_HOURS);

        let net = FundingAnalyzer::calculate_profitability(
            long,
            short,
            dec!(0.0005),
            dec!(0.0005),
            DEFAULT_TIME_HORIZON_SECS,
        );

        let expected_gross =
            (short - long).abs() * Decimal::from(DEFAULT_TIME_HORIZON_SECS);
        assert_eq!(net, expected_gross - dec!(0.001));
    }

    #[test]
    fn same_sign_rates_net_out() {
        let long = FundingAnalyzer::normalize_funding_rate(dec!(0.0001), 3600);
        let short = FundingAnalyzer::normalize_funding_rate(dec!(0.0003), 3600);

        let net = FundingAnalyzer::calculate_profitability(
            long,
            short,
            dec!(0.0005),
            dec!(0.0005),
            DEFAULT_TIME_HORIZON_SECS,
        );

        let divergence = (short - long).abs();
        assert_eq!(
            net,
            divergence * Decimal::from(DEFAULT_TIME_HORIZON_SECS) - dec!(0.001)
        );
    }

    #[test]
    fn fees_can_make_profitability_negative() {
        // Tiny divergence against 10 bps of round-trip fees.
        let long = FundingAnalyzer::normalize_funding_rate(dec!(0.00001), EIGHT_HOURS);
        let short = FundingAnalyzer::normalize_funding_rate(dec!(0.000011), EIGHT_HOURS);

        let net = FundingAnalyzer::calculate_profitability(
            long,
            short,
            dec!(0.0005),
            dec!(0.0005),
            DEFAULT_TIME_HORIZON_SECS,
        );
        assert!(net < Decimal::ZERO);
    }
}

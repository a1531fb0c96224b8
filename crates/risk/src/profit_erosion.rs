//! Profit-erosion exit rule.
//!
//! Erosion ratio = current divergence / entry divergence. Below the
//! configured ratio the remaining edge no longer justifies the carry.

use crate::types::{CurrentRates, ExitDecision, ExitReason, RiskManager};
use chrono::{DateTime, Utc};
use funding_arb_data::FundingArbPosition;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Computes the erosion ratio; a nonpositive entry divergence counts as
/// fully eroded.
#[must_use]
pub fn erosion_ratio(position: &FundingArbPosition, current_divergence: Decimal) -> f64 {
    if position.entry_divergence > Decimal::ZERO {
        (current_divergence / position.entry_divergence)
            .to_f64()
            .unwrap_or(0.0)
    } else {
        0.0
    }
}

pub struct ProfitErosionRiskManager {
    min_erosion_ratio: f64,
}

impl ProfitErosionRiskManager {
    #[must_use]
    pub fn new(min_erosion_ratio: f64) -> Self {
        Self { min_erosion_ratio }
    }
}

impl RiskManager for ProfitErosionRiskManager {
    fn should_exit(
        &self,
        position: &FundingArbPosition,
        rates: &CurrentRates,
        _now: DateTime<Utc>,
    ) -> ExitDecision {
        if erosion_ratio(position, rates.divergence) < self.min_erosion_ratio {
            ExitDecision::exit(ExitReason::ProfitErosion)
        } else {
            ExitDecision::hold()
        }
    }

    fn name(&self) -> &str {
        "profit_erosion"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn ratio_below_threshold_exits() {
        let manager = ProfitErosionRiskManager::new(0.5);
        let position = crate::combined::tests::sample_position(dec!(0.04));
        // 0.015 / 0.04 = 0.375 < 0.5
        let decision = manager.should_exit(
            &position,
            &CurrentRates::simple(dec!(0.015), dec!(-0.01), dec!(0.005)),
            Utc::now(),
        );
        assert!(decision.should_exit);
        assert_eq!(decision.reason, Some(ExitReason::ProfitErosion));
    }

    #[test]
    fn ratio_above_threshold_holds() {
        let manager = ProfitErosionRiskManager::new(0.5);
        let position = crate::combined::tests::sample_position(dec!(0.04));
        let decision = manager.should_exit(
            &position,
            &CurrentRates::simple(dec!(0.03), dec!(-0.01), dec!(0.02)),
            Utc::now(),
        );
        assert!(!decision.should_exit);
    }

    #[test]
    fn nonpositive_entry_divergence_counts_as_eroded() {
        let position = crate::combined::tests::sample_position(Decimal::ZERO);
        assert_eq!(erosion_ratio(&position, dec!(0.01)), 0.0);
    }
}

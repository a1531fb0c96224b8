//! Divergence-flip exit rule.
//!
//! The hedge earns the funding differential; once the differential drops
//! below the flip margin the position is paying instead of earning and must
//! close.

use crate::types::{CurrentRates, ExitDecision, ExitReason, RiskManager};
use chrono::{DateTime, Utc};
use funding_arb_data::FundingArbPosition;
use rust_decimal::Decimal;

pub struct DivergenceFlipRiskManager {
    flip_margin: Decimal,
}

impl DivergenceFlipRiskManager {
    #[must_use]
    pub fn new(flip_margin: Decimal) -> Self {
        Self { flip_margin }
    }
}

impl RiskManager for DivergenceFlipRiskManager {
    fn should_exit(
        &self,
        _position: &FundingArbPosition,
        rates: &CurrentRates,
        _now: DateTime<Utc>,
    ) -> ExitDecision {
        if rates.divergence < self.flip_margin {
            ExitDecision::exit(ExitReason::DivergenceFlipped)
        } else {
            ExitDecision::hold()
        }
    }

    fn name(&self) -> &str {
        "divergence_flip"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CurrentRates;
    use rust_decimal_macros::dec;

    fn position() -> FundingArbPosition {
        crate::combined::tests::sample_position(dec!(0.0004))
    }

    #[test]
    fn negative_divergence_triggers_exit() {
        let manager = DivergenceFlipRiskManager::new(Decimal::ZERO);
        let decision = manager.should_exit(
            &position(),
            &CurrentRates::simple(dec!(-0.001), dec!(-0.01), dec!(0.009)),
            Utc::now(),
        );
        assert!(decision.should_exit);
        assert_eq!(decision.reason, Some(ExitReason::DivergenceFlipped));
    }

    #[test]
    fn zero_divergence_flips_only_with_positive_margin() {
        let rates = CurrentRates::simple(Decimal::ZERO, dec!(-0.0001), dec!(0.0001));

        let no_margin = DivergenceFlipRiskManager::new(Decimal::ZERO);
        assert!(!no_margin.should_exit(&position(), &rates, Utc::now()).should_exit);

        let with_margin = DivergenceFlipRiskManager::new(dec!(0.00001));
        assert!(with_margin.should_exit(&position(), &rates, Utc::now()).should_exit);
    }

    #[test]
    fn healthy_divergence_holds() {
        let manager = DivergenceFlipRiskManager::new(Decimal::ZERO);
        let decision = manager.should_exit(
            &position(),
            &CurrentRates::simple(dec!(0.0004), dec!(-0.0001), dec!(0.0003)),
            Utc::now(),
        );
        assert!(!decision.should_exit);
        assert!(decision.reason.is_none());
    }
}

//! Combined waterfall risk manager, the production default.
//!
//! Evaluation order, returning on the first hit:
//! 1. minimum-hold guard (non-critical exits suppressed while young)
//! 2. divergence flip
//! 3. severe erosion
//! 4. normal erosion, with the hold-top-opportunity escape
//! 5. age limit

use crate::divergence_flip::DivergenceFlipRiskManager;
use crate::profit_erosion::{erosion_ratio, ProfitErosionRiskManager};
use crate::types::{CurrentRates, ExitDecision, ExitReason, RiskManager};
use chrono::{DateTime, Utc};
use funding_arb_data::FundingArbPosition;
use rust_decimal::Decimal;

pub struct CombinedRiskManager {
    flip_checker: DivergenceFlipRiskManager,
    erosion_checker: ProfitErosionRiskManager,
    severe_erosion_ratio: f64,
    max_position_age_hours: f64,
    min_hold_hours: f64,
}

impl CombinedRiskManager {
    #[must_use]
    pub fn new(
        flip_margin: Decimal,
        min_erosion_ratio: f64,
        severe_erosion_ratio: f64,
        max_position_age_hours: f64,
        min_hold_hours: f64,
    ) -> Self {
        Self {
            flip_checker: DivergenceFlipRiskManager::new(flip_margin),
            erosion_checker: ProfitErosionRiskManager::new(min_erosion_ratio),
            severe_erosion_ratio,
            max_position_age_hours,
            min_hold_hours,
        }
    }
}

impl RiskManager for CombinedRiskManager {
    fn should_exit(
        &self,
        position: &FundingArbPosition,
        rates: &CurrentRates,
        now: DateTime<Utc>,
    ) -> ExitDecision {
        let age_hours = position.age_hours(now);

        // Minimum-hold guard. Critical reasons never reach this manager;
        // the parallel detectors pre-empt the waterfall upstream.
        if age_hours < self.min_hold_hours {
            return ExitDecision::hold();
        }

        // Priority 1: divergence flip.
        let flip = self.flip_checker.should_exit(position, rates, now);
        if flip.should_exit {
            return ExitDecision::exit(ExitReason::DivergenceFlipped);
        }

        let ratio = erosion_ratio(position, rates.divergence);

        // Priority 2: severe erosion.
        if ratio < self.severe_erosion_ratio {
            return ExitDecision::exit(ExitReason::SevereErosion);
        }

        // Priority 3: normal erosion, unless this triple is still the
        // top-ranked opportunity worth holding.
        let erosion = self.erosion_checker.should_exit(position, rates, now);
        if erosion.should_exit {
            if let Some(top) = &rates.top_opportunity {
                if top.matches(position) && top.net_profit_percent >= rates.min_profit {
                    tracing::debug!(
                        symbol = %position.symbol,
                        net_profit = %top.net_profit_percent,
                        "erosion exit suppressed, still the top opportunity"
                    );
                    return ExitDecision::hold_because(ExitReason::HoldTopOpportunity);
                }
            }
            return ExitDecision::exit(ExitReason::ProfitErosion);
        }

        // Priority 4: age limit.
        if age_hours > self.max_position_age_hours {
            return ExitDecision::exit(ExitReason::TimeLimit);
        }

        ExitDecision::hold()
    }

    fn name(&self) -> &str {
        "combined"
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::TopOpportunity;
    use funding_arb_core::{ExecutionMode, Side};
    use funding_arb_data::{LegMetadata, PositionStatus};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    pub(crate) fn sample_position(entry_divergence: Decimal) -> FundingArbPosition {
        let leg = |side: Side, price: Decimal| LegMetadata {
            side,
            entry_price: price,
            quantity: dec!(0.02),
            order_id: None,
            fees_paid: Decimal::ZERO,
            slippage_usd: Decimal::ZERO,
            execution_mode: ExecutionMode::LimitOnly,
            exposure_usd: price * dec!(0.02),
            last_updated: Utc::now(),
            contract_id: None,
            quantity_multiplier: Decimal::ONE,
            price_multiplier: Decimal::ONE,
            mark_price: None,
            unrealized_pnl: None,
            funding_accrued: None,
            margin_reserved: None,
            liquidation_price: None,
        };
        let mut legs = BTreeMap::new();
        legs.insert("aster".to_string(), leg(Side::Long, dec!(50000)));
        legs.insert("lighter".to_string(), leg(Side::Short, dec!(50010)));

        FundingArbPosition {
            id: Uuid::new_v4(),
            symbol: "BTC".to_string(),
            long_dex: "aster".to_string(),
            short_dex: "lighter".to_string(),
            size_usd: dec!(1000),
            entry_long_rate: dec!(-0.01),
            entry_short_rate: dec!(0.04),
            entry_divergence,
            opened_at: Utc::now() - chrono::Duration::hours(2),
            closed_at: None,
            status: PositionStatus::Open,
            exit_reason: None,
            pnl_usd: Decimal::ZERO,
            total_fees_paid: Decimal::ZERO,
            current_divergence: None,
            last_checked_at: None,
            legs,
            fills: Vec::new(),
        }
    }

    fn manager() -> CombinedRiskManager {
        CombinedRiskManager::new(Decimal::ZERO, 0.6, 0.4, 100.0, 1.0)
    }

    #[test]
    fn flip_takes_priority_over_everything() {
        // S3: entry divergence positive, current negative, flip_margin 0.
        let decision = manager().should_exit(
            &sample_position(dec!(0.05)),
            &CurrentRates::simple(dec!(-0.0001), dec!(-0.01), dec!(0.0099)),
            Utc::now(),
        );
        assert!(decision.should_exit);
        assert_eq!(decision.reason, Some(ExitReason::DivergenceFlipped));
    }

    #[test]
    fn severe_erosion_beats_normal_erosion() {
        // 0.015 / 0.05 = 0.3 < severe threshold 0.4.
        let decision = manager().should_exit(
            &sample_position(dec!(0.05)),
            &CurrentRates::simple(dec!(0.015), dec!(-0.01), dec!(0.025)),
            Utc::now(),
        );
        assert_eq!(decision.reason, Some(ExitReason::SevereErosion));
    }

    #[test]
    fn normal_erosion_path() {
        // ratio 0.56: above severe (0.4), below normal (0.6).
        let decision = manager().should_exit(
            &sample_position(dec!(0.05)),
            &CurrentRates::simple(dec!(0.028), dec!(-0.01), dec!(0.018)),
            Utc::now(),
        );
        assert_eq!(decision.reason, Some(ExitReason::ProfitErosion));
    }

    #[test]
    fn time_limit_when_thresholds_pass() {
        let mut position = sample_position(dec!(0.05));
        position.opened_at = Utc::now() - chrono::Duration::hours(200);
        let decision = manager().should_exit(
            &position,
            &CurrentRates::simple(dec!(0.045), dec!(-0.01), dec!(0.035)),
            Utc::now(),
        );
        assert_eq!(decision.reason, Some(ExitReason::TimeLimit));
    }

    #[test]
    fn min_hold_guard_suppresses_young_exits() {
        let mut position = sample_position(dec!(0.05));
        position.opened_at = Utc::now() - chrono::Duration::minutes(10);
        // Flip conditions present, but the position is 10 minutes old.
        let decision = manager().should_exit(
            &position,
            &CurrentRates::simple(dec!(-0.01), dec!(-0.01), dec!(-0.02)),
            Utc::now(),
        );
        assert!(!decision.should_exit);
    }

    #[test]
    fn top_opportunity_suppresses_erosion_exit() {
        let position = sample_position(dec!(0.05));
        let mut rates = CurrentRates::simple(dec!(0.028), dec!(-0.01), dec!(0.018));
        rates.min_profit = dec!(0.001);
        rates.top_opportunity = Some(TopOpportunity {
            symbol: "BTC".to_string(),
            long_dex: "aster".to_string(),
            short_dex: "lighter".to_string(),
            net_profit_percent: dec!(0.002),
        });

        let decision = manager().should_exit(&position, &rates, Utc::now());
        assert!(!decision.should_exit);
        assert_eq!(decision.reason, Some(ExitReason::HoldTopOpportunity));

        // A different triple does not hold the position.
        let mut rates = rates;
        rates.top_opportunity.as_mut().unwrap().symbol = "ETH".to_string();
        let decision = manager().should_exit(&position, &rates, Utc::now());
        assert!(decision.should_exit);
        assert_eq!(decision.reason, Some(ExitReason::ProfitErosion));
    }

    #[test]
    fn evaluation_is_deterministic() {
        let position = sample_position(dec!(0.05));
        let rates = CurrentRates::simple(dec!(0.015), dec!(-0.01), dec!(0.025));
        let now = Utc::now();
        let manager = manager();

        let first = manager.should_exit(&position, &rates, now);
        for _ in 0..10 {
            assert_eq!(manager.should_exit(&position, &rates, now), first);
        }
    }
}

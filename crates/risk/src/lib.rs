//! Risk controller: decides when an open hedge must close.
//!
//! Pluggable managers evaluate a priority waterfall (minimum-hold guard,
//! divergence flip, severe erosion, normal erosion with the
//! hold-top-opportunity escape, age limit). Parallel detectors for
//! liquidations and leg imbalance run before the waterfall and pre-empt it;
//! their reasons are critical and bypass the hold guards. Evaluation is
//! deterministic: the same `(position, rates)` always yields the same
//! decision.

pub mod combined;
pub mod detectors;
pub mod divergence_flip;
pub mod profit_erosion;
pub mod types;

pub use combined::CombinedRiskManager;
pub use divergence_flip::DivergenceFlipRiskManager;
pub use profit_erosion::ProfitErosionRiskManager;
pub use types::{CurrentRates, ExitDecision, ExitReason, RiskManager, TopOpportunity};

use funding_arb_core::config::RiskConfig;
use rust_decimal::Decimal;

/// Builds the configured risk manager.
///
/// Unknown names fall back to `combined`, the production default.
#[must_use]
pub fn build_risk_manager(config: &RiskConfig) -> Box<dyn RiskManager> {
    match config.strategy.as_str() {
        "divergence_flip" => Box::new(DivergenceFlipRiskManager::new(config.flip_margin)),
        "profit_erosion" => Box::new(ProfitErosionRiskManager::new(config.min_erosion_threshold)),
        other => {
            if other != "combined" {
                tracing::warn!(strategy = other, "unknown risk strategy, using combined");
            }
            Box::new(CombinedRiskManager::new(
                config.flip_margin,
                config.min_erosion_threshold,
                config.severe_erosion_ratio,
                config.max_position_age_hours,
                config.min_hold_hours,
            ))
        }
    }
}

/// Relative token imbalance above which a hedge is no longer delta-neutral.
#[must_use]
pub fn severe_imbalance_threshold() -> Decimal {
    Decimal::new(5, 2)
}

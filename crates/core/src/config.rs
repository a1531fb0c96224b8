//! Configuration surface for the engine.
//!
//! Loaded by [`crate::config_loader::ConfigLoader`]; every section has
//! serde defaults so a minimal TOML file runs with sane values. Validation
//! failures surface as [`EngineError::ConfigInvalid`] and refuse startup.

use crate::error::EngineError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub opportunity_store: OpportunityStoreConfig,
    /// Venue connection settings keyed by lowercase venue name.
    #[serde(default)]
    pub venues: HashMap<String, VenueConfig>,
}

/// Endpoint of the out-of-process funding-rate service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityStoreConfig {
    pub url: String,
}

impl Default for OpportunityStoreConfig {
    fn default() -> Self {
        Self { url: "http://127.0.0.1:8077".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    pub api_url: String,
    pub ws_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
}

/// Trading parameters for the funding arbitrage strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Venues to scan and trade on.
    pub exchanges: Vec<String>,
    /// Venue that must appear on one side of every hedge.
    #[serde(default)]
    pub mandatory_exchange: Option<String>,
    /// Alias honored when `mandatory_exchange` is unset.
    #[serde(default)]
    pub primary_exchange: Option<String>,

    /// Global cap on simultaneously open hedges.
    pub max_positions: usize,
    /// New hedges allowed per orchestrator cycle.
    pub max_new_positions_per_cycle: usize,
    /// Cap on total USD exposure across open hedges.
    pub max_total_exposure_usd: Decimal,
    /// Cap on a single hedge's USD exposure.
    pub max_position_size_usd: Decimal,
    /// Open-interest cap on the required leg, USD.
    #[serde(default)]
    pub max_oi_usd: Option<Decimal>,

    /// Base margin per position; exposure = margin × min leverage.
    pub target_margin: Decimal,
    /// Minimum fee-adjusted net profit for candidates, as a fraction.
    pub min_profit: Decimal,

    /// Limit-price offset applied when crossing the spread, as a fraction.
    #[serde(default)]
    pub limit_order_offset_pct: Option<Decimal>,
    /// Align entry limit prices so the hedge opens at break-even or better.
    #[serde(default = "default_true")]
    pub enable_break_even_alignment: bool,
    /// Above this inter-venue spread, alignment falls back to raw BBO.
    #[serde(default)]
    pub max_spread_threshold_pct: Option<Decimal>,
    /// Abort opens when venue mid prices diverge beyond this fraction.
    #[serde(default)]
    pub max_entry_price_divergence_pct: Option<Decimal>,

    /// Estimate post-fill liquidation distance before opening.
    #[serde(default = "default_true")]
    pub enable_liquidation_prevention: bool,
    /// Minimum |entry − liq| / entry required per leg.
    #[serde(default)]
    pub min_liquidation_distance_pct: Option<Decimal>,

    /// React to BBO updates with opportunistic profit-taking closes.
    #[serde(default = "default_true")]
    pub enable_immediate_profit_taking: bool,
    /// Net profit threshold as a fraction of position notional.
    #[serde(default = "default_profit_taking_pct")]
    pub min_immediate_profit_taking_pct: Decimal,
    /// Minimum seconds between profit re-evaluations per position.
    #[serde(default = "default_profit_check_interval")]
    pub realtime_profit_check_interval: f64,

    /// Seconds between orchestrator cycles.
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_seconds: u64,
    /// When set, stop opening after the first position of this process.
    #[serde(default)]
    pub single_position_per_session: bool,
}

/// Exit-rule thresholds for the risk controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Risk strategy to run: `divergence_flip`, `profit_erosion`, `combined`.
    pub strategy: String,
    /// Positions younger than this only exit on critical reasons.
    pub min_hold_hours: f64,
    /// Exit when current/entry divergence drops below this ratio.
    pub min_erosion_threshold: f64,
    /// Exit immediately below this ratio.
    pub severe_erosion_ratio: f64,
    /// Hard age cap in hours.
    pub max_position_age_hours: f64,
    /// Divergence below this margin counts as flipped.
    pub flip_margin: Decimal,
    /// Seconds between periodic risk sweeps.
    pub check_interval_seconds: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            strategy: "combined".to_string(),
            min_hold_hours: 1.0,
            min_erosion_threshold: 0.5,
            severe_erosion_ratio: 0.2,
            max_position_age_hours: 168.0,
            flip_margin: Decimal::ZERO,
            check_interval_seconds: 60,
        }
    }
}

/// Out-of-process dashboard wiring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    pub enabled: bool,
    /// Renderer hint forwarded to the dashboard process.
    pub renderer: String,
    pub refresh_interval_seconds: u64,
    pub persist_snapshots: bool,
    /// Rows retained per session in `dashboard_snapshots`.
    pub snapshot_retention: u32,
    /// Rows retained per session in `dashboard_events`.
    pub event_retention: u32,
    pub write_interval_seconds: u64,
    /// Replay a stored session instead of the live one.
    #[serde(default)]
    pub replay_session_id: Option<String>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            renderer: "table".to_string(),
            refresh_interval_seconds: 5,
            persist_snapshots: true,
            snapshot_retention: 500,
            event_retention: 2000,
            write_interval_seconds: 10,
            replay_session_id: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_profit_taking_pct() -> Decimal {
    // 0.2% of notional.
    Decimal::new(2, 3)
}

fn default_profit_check_interval() -> f64 {
    1.0
}

fn default_cycle_interval() -> u64 {
    60
}

impl StrategyConfig {
    /// Resolves the venue one leg must use, honoring the legacy alias.
    #[must_use]
    pub fn required_exchange(&self) -> Option<String> {
        self.mandatory_exchange
            .as_deref()
            .or(self.primary_exchange.as_deref())
            .map(|name| name.trim().to_ascii_lowercase())
            .filter(|name| !name.is_empty())
    }
}

impl AppConfig {
    /// Validates cross-field constraints that serde cannot express.
    ///
    /// # Errors
    /// Returns [`EngineError::ConfigInvalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), EngineError> {
        let s = &self.strategy;

        if s.exchanges.len() < 2 {
            return Err(EngineError::ConfigInvalid(
                "at least two exchanges are required for a hedge".to_string(),
            ));
        }
        for name in &s.exchanges {
            if !self.venues.contains_key(&name.to_ascii_lowercase()) {
                return Err(EngineError::ConfigInvalid(format!(
                    "exchange '{name}' has no [venues.{name}] section"
                )));
            }
        }
        if let Some(required) = s.required_exchange() {
            if !s.exchanges.iter().any(|e| e.eq_ignore_ascii_case(&required)) {
                return Err(EngineError::ConfigInvalid(format!(
                    "mandatory exchange '{required}' is not in the exchanges list"
                )));
            }
        }
        if s.max_positions == 0 {
            return Err(EngineError::ConfigInvalid(
                "max_positions must be at least 1".to_string(),
            ));
        }
        if s.target_margin <= Decimal::ZERO {
            return Err(EngineError::ConfigInvalid(
                "target_margin must be positive".to_string(),
            ));
        }
        if s.max_total_exposure_usd <= Decimal::ZERO || s.max_position_size_usd <= Decimal::ZERO {
            return Err(EngineError::ConfigInvalid(
                "exposure caps must be positive".to_string(),
            ));
        }

        let r = &self.risk;
        if !(0.0..1.0).contains(&r.severe_erosion_ratio) || r.severe_erosion_ratio <= 0.0 {
            return Err(EngineError::ConfigInvalid(format!(
                "severe_erosion_ratio must be in (0, 1), got {}",
                r.severe_erosion_ratio
            )));
        }
        if r.min_erosion_threshold <= r.severe_erosion_ratio {
            return Err(EngineError::ConfigInvalid(
                "min_erosion_threshold must exceed severe_erosion_ratio".to_string(),
            ));
        }
        if !matches!(r.strategy.as_str(), "combined" | "divergence_flip" | "profit_erosion") {
            return Err(EngineError::ConfigInvalid(format!(
                "unknown risk strategy '{}'",
                r.strategy
            )));
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut venues = HashMap::new();
        venues.insert(
            "aster".to_string(),
            VenueConfig {
                api_url: "https://fapi.asterdex.com".to_string(),
                ws_url: "wss://fstream.asterdex.com".to_string(),
                api_key: None,
                secret_key: None,
            },
        );
        venues.insert(
            "lighter".to_string(),
            VenueConfig {
                api_url: "https://mainnet.zklighter.elliot.ai".to_string(),
                ws_url: "wss://mainnet.zklighter.elliot.ai/stream".to_string(),
                api_key: None,
                secret_key: None,
            },
        );

        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8090,
            },
            database: DatabaseConfig {
                url: "postgresql://localhost/funding_arb".to_string(),
                max_connections: 10,
            },
            strategy: StrategyConfig {
                exchanges: vec!["aster".to_string(), "lighter".to_string()],
                mandatory_exchange: None,
                primary_exchange: None,
                max_positions: 3,
                max_new_positions_per_cycle: 1,
                max_total_exposure_usd: Decimal::new(5000, 0),
                max_position_size_usd: Decimal::new(2000, 0),
                max_oi_usd: None,
                target_margin: Decimal::new(100, 0),
                min_profit: Decimal::new(1, 3),
                limit_order_offset_pct: Some(Decimal::new(5, 4)),
                enable_break_even_alignment: true,
                max_spread_threshold_pct: Some(Decimal::new(3, 3)),
                max_entry_price_divergence_pct: Some(Decimal::new(5, 3)),
                enable_liquidation_prevention: true,
                min_liquidation_distance_pct: Some(Decimal::new(5, 2)),
                enable_immediate_profit_taking: true,
                min_immediate_profit_taking_pct: default_profit_taking_pct(),
                realtime_profit_check_interval: default_profit_check_interval(),
                cycle_interval_seconds: default_cycle_interval(),
                single_position_per_session: false,
            },
            risk: RiskConfig::default(),
            dashboard: DashboardConfig::default(),
            opportunity_store: OpportunityStoreConfig::default(),
            venues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_single_exchange() {
        let mut config = AppConfig::default();
        config.strategy.exchanges.truncate(1);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("two exchanges"));
    }

    #[test]
    fn rejects_unwired_exchange() {
        let mut config = AppConfig::default();
        config.strategy.exchanges.push("paradex".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_mandatory_exchange_outside_list() {
        let mut config = AppConfig::default();
        config.strategy.mandatory_exchange = Some("backpack".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn primary_exchange_alias_is_honored() {
        let mut config = AppConfig::default();
        config.strategy.primary_exchange = Some("Aster ".to_string());
        assert_eq!(config.strategy.required_exchange().as_deref(), Some("aster"));
    }

    #[test]
    fn rejects_inverted_erosion_thresholds() {
        let mut config = AppConfig::default();
        config.risk.min_erosion_threshold = 0.1;
        config.risk.severe_erosion_ratio = 0.4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_nonpositive_margin() {
        let mut config = AppConfig::default();
        config.strategy.target_margin = dec!(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn profit_taking_default_is_twenty_bps() {
        let config = AppConfig::default();
        assert_eq!(config.strategy.min_immediate_profit_taking_pct, dec!(0.002));
    }
}

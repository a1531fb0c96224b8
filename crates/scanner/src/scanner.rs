//! Opportunity discovery, filtering, capacity, and sizing.

use crate::cooldown::CooldownManager;
use chrono::Utc;
use funding_arb_connector::VenueMap;
use funding_arb_core::{OpportunityData, OpportunityFilter, OpportunityStore};
use funding_arb_data::FundingArbPosition;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Conservative leverage assumed when neither venue reports one.
const FALLBACK_LEVERAGE: u32 = 5;

/// Scanner knobs, a projection of the strategy config.
#[derive(Debug, Clone)]
pub struct ScannerSettings {
    pub min_profit: Decimal,
    pub max_positions: usize,
    pub max_new_positions_per_cycle: usize,
    pub max_total_exposure_usd: Decimal,
    pub max_position_size_usd: Decimal,
    pub max_oi_usd: Option<Decimal>,
    pub required_exchange: Option<String>,
    pub target_margin: Decimal,
    /// Candidates fetched from the store per scan.
    pub fetch_limit: usize,
}

/// A candidate hedge with its computed size and normalized leverage.
#[derive(Debug, Clone)]
pub struct SizedOpportunity {
    pub opportunity: OpportunityData,
    pub size_usd: Decimal,
    pub leverage: u32,
}

pub struct OpportunityScanner {
    store: Arc<dyn OpportunityStore>,
    settings: ScannerSettings,
    cooldowns: Arc<CooldownManager>,
    max_position_warning_logged: AtomicBool,
}

impl OpportunityScanner {
    #[must_use]
    pub fn new(
        store: Arc<dyn OpportunityStore>,
        settings: ScannerSettings,
        cooldowns: Arc<CooldownManager>,
    ) -> Self {
        Self {
            store,
            settings,
            cooldowns,
            max_position_warning_logged: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn cooldowns(&self) -> &Arc<CooldownManager> {
        &self.cooldowns
    }

    /// True while another hedge can be opened. The "max positions reached"
    /// info line is emitted exactly once per transition into saturation.
    #[must_use]
    pub fn has_capacity(&self, open_positions: &[FundingArbPosition]) -> bool {
        let open_count = open_positions.len();
        if open_count >= self.settings.max_positions {
            if !self.max_position_warning_logged.swap(true, Ordering::SeqCst) {
                tracing::info!(
                    open = open_count,
                    max = self.settings.max_positions,
                    "max positions reached, skipping new opportunities until capacity frees up"
                );
            }
            return false;
        }
        self.max_position_warning_logged.store(false, Ordering::SeqCst);
        true
    }

    /// Sum of open hedge notionals.
    #[must_use]
    pub fn total_exposure(open_positions: &[FundingArbPosition]) -> Decimal {
        open_positions
            .iter()
            .filter(|p| p.is_open())
            .map(|p| p.size_usd)
            .sum()
    }

    /// The store's current best candidate for the hold-top-opportunity
    /// check, regardless of capacity.
    pub async fn top_opportunity(&self, venues: &VenueMap) -> Option<OpportunityData> {
        let filter = self.build_filter(venues, 1);
        match self.store.find_opportunities(&filter).await {
            Ok(mut opportunities) => opportunities.drain(..).next(),
            Err(e) => {
                tracing::warn!(error = %e, "top-opportunity query failed");
                None
            }
        }
    }

    /// Latest funding rates for one open triple, used by the risk
    /// controller. Returns `None` when the store no longer ranks it.
    pub async fn current_rates(
        &self,
        symbol: &str,
        long_dex: &str,
        short_dex: &str,
    ) -> Option<OpportunityData> {
        let filter = OpportunityFilter {
            min_profit_percent: None,
            max_oi_usd: None,
            whitelist_dexes: None,
            required_dex: None,
            symbol: Some(symbol.to_string()),
            limit: Some(20),
        };
        match self.store.find_opportunities(&filter).await {
            Ok(opportunities) => opportunities.into_iter().find(|o| {
                o.long_dex.eq_ignore_ascii_case(long_dex)
                    && o.short_dex.eq_ignore_ascii_case(short_dex)
            }),
            Err(e) => {
                tracing::warn!(error = %e, symbol, "rate lookup failed");
                None
            }
        }
    }

    /// Scans the store and returns sized candidates this cycle may open.
    pub async fn scan(
        &self,
        venues: &VenueMap,
        open_positions: &[FundingArbPosition],
        failed_symbols: &HashSet<String>,
    ) -> Vec<SizedOpportunity> {
        let mut candidates = Vec::new();

        if !self.has_capacity(open_positions) {
            return candidates;
        }

        let filter = self.build_filter(venues, self.settings.fetch_limit);
        let opportunities = match self.store.find_opportunities(&filter).await {
            Ok(opportunities) => opportunities,
            Err(e) => {
                tracing::error!(error = %e, "opportunity store query failed");
                return candidates;
            }
        };
        tracing::info!(count = opportunities.len(), "opportunities found");

        let now = Utc::now();
        let mut remaining_slots = self
            .settings
            .max_new_positions_per_cycle
            .min(self.settings.max_positions.saturating_sub(open_positions.len()));
        let mut current_exposure = Self::total_exposure(open_positions);

        for opportunity in opportunities {
            if remaining_slots == 0 {
                break;
            }
            if failed_symbols.contains(&opportunity.symbol) {
                tracing::debug!(
                    symbol = %opportunity.symbol,
                    "skipping symbol, already failed validation this cycle"
                );
                continue;
            }
            if self.cooldowns.is_cooling(&opportunity.symbol, now) {
                tracing::debug!(symbol = %opportunity.symbol, "skipping symbol on cooldown");
                continue;
            }

            let Some(sized) = self.size_candidate(venues, &opportunity, current_exposure).await
            else {
                continue;
            };

            current_exposure += sized.size_usd;
            remaining_slots -= 1;
            candidates.push(sized);
        }

        candidates
    }

    fn build_filter(&self, venues: &VenueMap, limit: usize) -> OpportunityFilter {
        let whitelist: Vec<String> = venues.keys().cloned().collect();
        let required = self.settings.required_exchange.clone();
        OpportunityFilter {
            min_profit_percent: Some(self.settings.min_profit),
            // The OI rail only applies when one venue is mandatory.
            max_oi_usd: required.as_ref().and(self.settings.max_oi_usd),
            whitelist_dexes: (!whitelist.is_empty()).then_some(whitelist),
            required_dex: required,
            symbol: None,
            limit: Some(limit),
        }
    }

    async fn size_candidate(
        &self,
        venues: &VenueMap,
        opportunity: &OpportunityData,
        current_exposure: Decimal,
    ) -> Option<SizedOpportunity> {
        let Some(long_venue) = venues.get(&opportunity.long_dex) else {
            tracing::warn!(
                symbol = %opportunity.symbol,
                venue = %opportunity.long_dex,
                "skipping opportunity, long venue has no trading client"
            );
            return None;
        };
        let Some(short_venue) = venues.get(&opportunity.short_dex) else {
            tracing::warn!(
                symbol = %opportunity.symbol,
                venue = %opportunity.short_dex,
                "skipping opportunity, short venue has no trading client"
            );
            return None;
        };

        // Most restrictive leverage across both venues drives sizing.
        let leverage = {
            let long = long_venue.client.leverage_info(&opportunity.symbol).await.ok();
            let short = short_venue.client.leverage_info(&opportunity.symbol).await.ok();
            match (long, short) {
                (Some(l), Some(s)) => l.max_leverage.min(s.max_leverage),
                (Some(l), None) => l.max_leverage,
                (None, Some(s)) => s.max_leverage,
                (None, None) => {
                    tracing::warn!(
                        symbol = %opportunity.symbol,
                        fallback = FALLBACK_LEVERAGE,
                        "leverage unavailable on both venues, using conservative estimate"
                    );
                    FALLBACK_LEVERAGE
                }
            }
        };

        let mut size_usd = self.settings.target_margin * Decimal::from(leverage.max(1));
        if size_usd > self.settings.max_position_size_usd {
            return None;
        }

        // Clip to remaining portfolio headroom.
        let headroom = self.settings.max_total_exposure_usd - current_exposure;
        if size_usd > headroom {
            size_usd = headroom;
        }
        if size_usd < dec!(5) {
            tracing::debug!(
                symbol = %opportunity.symbol,
                size = %size_usd,
                "skipping opportunity, size below viable minimum"
            );
            return None;
        }

        tracing::debug!(
            symbol = %opportunity.symbol,
            size_usd = %size_usd,
            leverage,
            "sized opportunity"
        );
        Some(SizedOpportunity { opportunity: opportunity.clone(), size_usd, leverage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use funding_arb_core::EngineError;
    use parking_lot::Mutex;

    struct StubStore {
        opportunities: Mutex<Vec<OpportunityData>>,
        last_filter: Mutex<Option<OpportunityFilter>>,
    }

    #[async_trait]
    impl OpportunityStore for StubStore {
        async fn find_opportunities(
            &self,
            filter: &OpportunityFilter,
        ) -> Result<Vec<OpportunityData>, EngineError> {
            *self.last_filter.lock() = Some(filter.clone());
            Ok(self.opportunities.lock().clone())
        }
    }

    fn opportunity(symbol: &str, net: Decimal) -> OpportunityData {
        OpportunityData {
            symbol: symbol.to_string(),
            long_dex: "aster".to_string(),
            short_dex: "lighter".to_string(),
            long_rate: dec!(-0.0001),
            short_rate: dec!(0.0003),
            divergence: dec!(0.0004),
            net_profit_percent: net,
            open_interest_long_usd: dec!(1000000),
            open_interest_short_usd: dec!(800000),
        }
    }

    fn settings() -> ScannerSettings {
        ScannerSettings {
            min_profit: dec!(0.001),
            max_positions: 3,
            max_new_positions_per_cycle: 2,
            max_total_exposure_usd: dec!(5000),
            max_position_size_usd: dec!(2000),
            max_oi_usd: Some(dec!(2000000)),
            required_exchange: None,
            target_margin: dec!(100),
            fetch_limit: 10,
        }
    }

    fn scanner_with(opportunities: Vec<OpportunityData>) -> OpportunityScanner {
        let store = Arc::new(StubStore {
            opportunities: Mutex::new(opportunities),
            last_filter: Mutex::new(None),
        });
        OpportunityScanner::new(store, settings(), Arc::new(CooldownManager::default()))
    }

    fn open_position(size: Decimal) -> FundingArbPosition {
        use funding_arb_data::PositionStatus;
        FundingArbPosition {
            id: uuid::Uuid::new_v4(),
            symbol: "SOL".to_string(),
            long_dex: "aster".to_string(),
            short_dex: "lighter".to_string(),
            size_usd: size,
            entry_long_rate: Decimal::ZERO,
            entry_short_rate: Decimal::ZERO,
            entry_divergence: dec!(0.0004),
            opened_at: Utc::now(),
            closed_at: None,
            status: PositionStatus::Open,
            exit_reason: None,
            pnl_usd: Decimal::ZERO,
            total_fees_paid: Decimal::ZERO,
            current_divergence: None,
            last_checked_at: None,
            legs: Default::default(),
            fills: Vec::new(),
        }
    }

    #[test]
    fn capacity_logs_once_per_transition() {
        let scanner = scanner_with(Vec::new());
        let full: Vec<_> = (0..3).map(|_| open_position(dec!(1000))).collect();

        assert!(!scanner.has_capacity(&full));
        // The warning flag is latched after the first saturation report.
        assert!(scanner.max_position_warning_logged.load(Ordering::SeqCst));
        assert!(!scanner.has_capacity(&full));

        // Capacity frees: flag resets so the next saturation logs again.
        assert!(scanner.has_capacity(&full[..1]));
        assert!(!scanner.max_position_warning_logged.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn scan_respects_failed_symbols_and_cooldowns() {
        let scanner = scanner_with(vec![
            opportunity("BTC", dec!(0.002)),
            opportunity("ETH", dec!(0.0015)),
            opportunity("SOL", dec!(0.0012)),
        ]);
        scanner.cooldowns().mark("ETH", Utc::now());

        let mut failed = HashSet::new();
        failed.insert("BTC".to_string());

        // No venue clients wired: every surviving candidate is skipped at
        // sizing, so the scan returns empty rather than erroring.
        let venues: VenueMap = VenueMap::new();
        let result = scanner.scan(&venues, &[], &failed).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn filter_carries_whitelist_and_required_dex() {
        let store = Arc::new(StubStore {
            opportunities: Mutex::new(Vec::new()),
            last_filter: Mutex::new(None),
        });
        let mut s = settings();
        s.required_exchange = Some("aster".to_string());
        let scanner =
            OpportunityScanner::new(Arc::clone(&store) as Arc<dyn OpportunityStore>, s, Arc::new(CooldownManager::default()));

        let venues: VenueMap = VenueMap::new();
        let _ = scanner.scan(&venues, &[], &HashSet::new()).await;

        let filter = store.last_filter.lock().clone().unwrap();
        assert_eq!(filter.required_dex.as_deref(), Some("aster"));
        assert_eq!(filter.max_oi_usd, Some(dec!(2000000)));
        assert_eq!(filter.min_profit_percent, Some(dec!(0.001)));
    }

    #[test]
    fn total_exposure_sums_open_only() {
        let positions = vec![open_position(dec!(1000)), open_position(dec!(500))];
        assert_eq!(OpportunityScanner::total_exposure(&positions), dec!(1500));
    }
}

//! The three-phase strategy cycle.
//!
//! Phase 1 (monitor): refresh leg snapshots into the position metadata
//! cache and accrue funding payments. Phase 2 (close): run the parallel
//! risk detectors and the waterfall; close what they flag, plus any closes
//! queued by the profit monitor or the control API. Phase 3 (open): scan,
//! size, and open new hedges while capacity allows. While paused, only
//! Phase 1 runs.

use crate::closer::PositionCloser;
use crate::events::{
    ControlHandle, DashboardSnapshot, EngineEvents, EventCategory, ManualClose, PortfolioSummary,
    TimelineEvent,
};
use crate::opener::PositionOpener;
use anyhow::Result;
use chrono::Utc;
use funding_arb_core::{EngineError, ExchangePositionSnapshot, LiquidationEvent};
use funding_arb_connector::VenueMap;
use funding_arb_data::{
    Database, FundingArbPosition, LifecycleStage, PositionStore, Session, SessionHealth,
};
use funding_arb_data::repositories::{DashboardRepo, SessionRepo, StrategyStateRepo};
use funding_arb_execution::PriceProvider;
use funding_arb_monitor::{CloseRequest, RealTimeProfitMonitor};
use funding_arb_risk::{
    detectors, severe_imbalance_threshold, CurrentRates, ExitReason, RiskManager, TopOpportunity,
};
use funding_arb_scanner::OpportunityScanner;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StrategySettings {
    pub strategy_name: String,
    pub cycle_interval: Duration,
    pub min_profit: Decimal,
    pub single_position_per_session: bool,
    pub persist_snapshots: bool,
    pub snapshot_retention: u32,
    pub event_retention: u32,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            strategy_name: "funding_arbitrage".to_string(),
            cycle_interval: Duration::from_secs(60),
            min_profit: Decimal::new(1, 3),
            single_position_per_session: false,
            persist_snapshots: true,
            snapshot_retention: 500,
            event_retention: 2000,
        }
    }
}

/// Result of probing one leg on its venue during Phase 1.
#[derive(Debug, Clone)]
pub enum LegProbe {
    /// The venue returned a live position.
    Live(ExchangePositionSnapshot),
    /// The venue positively reported no position.
    Flat,
    /// The probe failed; nothing can be concluded about the leg.
    Unavailable,
}

impl LegProbe {
    /// True when the probe says something definite about the leg.
    #[must_use]
    pub fn is_conclusive(&self) -> bool {
        !matches!(self, Self::Unavailable)
    }

    /// The live snapshot, if any.
    #[must_use]
    pub fn snapshot(&self) -> Option<&ExchangePositionSnapshot> {
        match self {
            Self::Live(snapshot) => Some(snapshot),
            _ => None,
        }
    }
}

/// Everything the orchestrator coordinates, wired at the composition root.
pub struct OrchestratorDeps {
    pub venues: Arc<VenueMap>,
    pub store: Arc<PositionStore>,
    pub scanner: Arc<OpportunityScanner>,
    pub risk: Box<dyn RiskManager>,
    pub opener: PositionOpener,
    pub closer: PositionCloser,
    pub monitor: Arc<RealTimeProfitMonitor>,
    pub price_provider: Arc<PriceProvider>,
    pub events: Arc<EngineEvents>,
    pub database: Database,
    pub monitor_close_rx: mpsc::UnboundedReceiver<CloseRequest>,
}

pub struct StrategyOrchestrator {
    venues: Arc<VenueMap>,
    store: Arc<PositionStore>,
    scanner: Arc<OpportunityScanner>,
    risk: Box<dyn RiskManager>,
    opener: PositionOpener,
    closer: PositionCloser,
    monitor: Arc<RealTimeProfitMonitor>,
    price_provider: Arc<PriceProvider>,
    events: Arc<EngineEvents>,
    session_repo: SessionRepo,
    state_repo: StrategyStateRepo,
    dashboard_repo: DashboardRepo,
    settings: StrategySettings,
    session: Session,
    paused: Arc<AtomicBool>,
    monitor_close_rx: mpsc::UnboundedReceiver<CloseRequest>,
    manual_close_rx: mpsc::UnboundedReceiver<ManualClose>,
    /// Symbols that failed validation this cycle; reset every cycle.
    failed_symbols: HashSet<String>,
    opened_this_session: bool,
    cycle_count: u64,
}

impl StrategyOrchestrator {
    /// Builds the orchestrator and its control handle.
    #[must_use]
    pub fn new(deps: OrchestratorDeps, settings: StrategySettings) -> (Self, ControlHandle) {
        let paused = Arc::new(AtomicBool::new(false));
        let (manual_tx, manual_close_rx) = mpsc::unbounded_channel();
        let control = ControlHandle::new(Arc::clone(&paused), manual_tx);

        let session = Session::start(&settings.strategy_name, Utc::now());
        let orchestrator = Self {
            venues: deps.venues,
            store: deps.store,
            scanner: deps.scanner,
            risk: deps.risk,
            opener: deps.opener,
            closer: deps.closer,
            monitor: deps.monitor,
            price_provider: deps.price_provider,
            events: deps.events,
            session_repo: SessionRepo::new(deps.database.clone()),
            state_repo: StrategyStateRepo::new(deps.database.clone()),
            dashboard_repo: DashboardRepo::new(deps.database),
            settings,
            session,
            paused,
            monitor_close_rx: deps.monitor_close_rx,
            manual_close_rx,
            failed_symbols: HashSet::new(),
            opened_this_session: false,
            cycle_count: 0,
        };
        (orchestrator, control)
    }

    /// Runs the cycle until shutdown is signaled, then drains gracefully.
    ///
    /// # Errors
    /// Returns an error only for unrecoverable startup failures; runtime
    /// errors are absorbed per cycle.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.startup().await?;

        let mut liquidation_rx = self.spawn_liquidation_forwarders();
        let mut interval = tokio::time::interval(self.settings.cycle_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                Some(request) = self.monitor_close_rx.recv() => {
                    self.handle_profit_close(request).await;
                }
                Some(request) = self.manual_close_rx.recv() => {
                    self.handle_manual_close(request).await;
                }
                Some(event) = liquidation_rx.recv() => {
                    self.handle_liquidation_event(event).await;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        tracing::error!(error = %e, "cycle failed");
                        self.session.health = SessionHealth::Degraded;
                        self.emit(EventCategory::Error, format!("cycle failed: {e}"));
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn startup(&mut self) -> Result<()> {
        self.set_stage(LifecycleStage::Initializing).await;

        for venue in self.venues.values() {
            if let Err(e) = venue.stream.connect().await {
                tracing::warn!(venue = %venue.name, error = %e, "venue stream failed to connect");
                self.session.health = SessionHealth::Degraded;
            }
        }

        // Re-arm the profit monitor for hedges that survived a restart.
        match self.store.open_positions().await {
            Ok(positions) => {
                for position in &positions {
                    self.monitor.register_position(position);
                }
                tracing::info!(count = positions.len(), "restored open hedges");
            }
            Err(e) => {
                tracing::error!(error = %e, "open-position restore failed");
                self.session.health = SessionHealth::Degraded;
            }
        }

        if self.session.health == SessionHealth::Starting {
            self.session.health = SessionHealth::Running;
        }
        self.set_stage(LifecycleStage::Idle).await;
        self.emit(EventCategory::Info, "engine started");
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.set_stage(LifecycleStage::Complete).await;
        self.monitor.cleanup_all();
        for venue in self.venues.values() {
            venue.stream.disconnect().await;
        }
        self.session.health = SessionHealth::Stopped;
        self.session.ended_at = Some(Utc::now());
        if let Err(e) = self.session_repo.upsert(&self.session).await {
            tracing::warn!(error = %e, "final session write failed");
        }
        self.emit(EventCategory::Info, "engine stopped");
    }

    async fn run_cycle(&mut self) -> Result<()> {
        self.cycle_count += 1;
        self.failed_symbols.clear();
        self.price_provider.invalidate();
        self.session.last_heartbeat = Utc::now();
        self.session.paused = self.is_paused();

        self.set_stage(LifecycleStage::Monitoring).await;
        let snapshots = self.phase_monitor().await;

        if self.is_paused() {
            tracing::debug!("strategy paused, skipping close and open phases");
        } else {
            self.set_stage(LifecycleStage::Closing).await;
            self.phase_close(&snapshots).await;

            self.set_stage(LifecycleStage::Scanning).await;
            self.phase_open().await;
        }

        self.set_stage(LifecycleStage::Idle).await;
        self.persist_state().await;
        self.publish_snapshot().await;
        Ok(())
    }

    // =========================================================================
    // Phase 1: monitor
    // =========================================================================

    /// Refreshes leg snapshots into the metadata cache and accrues funding.
    /// Returns the fresh snapshots keyed by position for Phase 2.
    async fn phase_monitor(&mut self) -> HashMap<Uuid, (LegProbe, LegProbe)> {
        let mut snapshots = HashMap::new();
        let positions = match self.store.open_positions().await {
            Ok(positions) => positions,
            Err(e) => {
                tracing::error!(error = %e, "open-position query failed");
                return snapshots;
            }
        };

        for mut position in positions {
            let long = self.refresh_leg(&mut position, true).await;
            let short = self.refresh_leg(&mut position, false).await;

            self.accrue_funding(&position).await;

            position.last_checked_at = Some(Utc::now());
            if let Err(e) = self.store.update(&position).await {
                tracing::warn!(position_id = %position.id, error = %e, "snapshot cache write failed");
            }
            snapshots.insert(position.id, (long, short));
        }
        snapshots
    }

    async fn refresh_leg(&self, position: &mut FundingArbPosition, long_side: bool) -> LegProbe {
        let venue_name =
            if long_side { position.long_dex.clone() } else { position.short_dex.clone() };
        let Some(venue) = self.venues.get(&venue_name) else {
            return LegProbe::Unavailable;
        };

        match venue.client.position_snapshot(&position.symbol).await {
            Ok(Some(snapshot)) => {
                if let Some(leg) = position.legs.get_mut(&venue_name) {
                    leg.mark_price = Some(snapshot.mark_price);
                    leg.unrealized_pnl = Some(snapshot.unrealized_pnl);
                    leg.funding_accrued = snapshot.funding_accrued;
                    leg.margin_reserved = Some(snapshot.margin_reserved);
                    leg.liquidation_price = snapshot.liquidation_price;
                    leg.last_updated = Utc::now();
                }
                LegProbe::Live(snapshot)
            }
            // The venue positively reported no position: the leg is gone.
            Ok(None) => LegProbe::Flat,
            Err(e) => {
                tracing::warn!(
                    position_id = %position.id,
                    venue = %venue_name,
                    error = %e,
                    "leg snapshot refresh failed"
                );
                LegProbe::Unavailable
            }
        }
    }

    /// Scans each leg's trade history since the last accrual checkpoint and
    /// records funding payments into the authoritative tally.
    async fn accrue_funding(&self, position: &FundingArbPosition) {
        let now = Utc::now();
        for venue_name in [&position.long_dex, &position.short_dex] {
            let Some(venue) = self.venues.get(venue_name) else { continue };

            let since = match self.store.last_funding_accrual(position.id, venue_name).await {
                Ok(Some(checkpoint)) => checkpoint,
                Ok(None) => position.opened_at,
                Err(e) => {
                    tracing::warn!(error = %e, "funding checkpoint lookup failed");
                    continue;
                }
            };

            let trades = match venue
                .client
                .user_trade_history(&position.symbol, since, now, None)
                .await
            {
                Ok(trades) => trades,
                Err(e) => {
                    tracing::debug!(venue = %venue_name, error = %e, "funding history scan failed");
                    continue;
                }
            };

            for trade in trades {
                let Some(funding) = trade.realized_funding else { continue };
                if funding.is_zero() || trade.timestamp <= since {
                    continue;
                }
                if let Err(e) = self
                    .store
                    .record_funding(position.id, venue_name, trade.timestamp, funding)
                    .await
                {
                    tracing::warn!(error = %e, "funding accrual write failed");
                }
            }
        }
    }

    // =========================================================================
    // Phase 2: close
    // =========================================================================

    async fn phase_close(&mut self, snapshots: &HashMap<Uuid, (LegProbe, LegProbe)>) {
        let positions = match self.store.open_positions().await {
            Ok(positions) => positions,
            Err(e) => {
                tracing::error!(error = %e, "open-position query failed");
                return;
            }
        };
        if positions.is_empty() {
            return;
        }

        let top = self.scanner.top_opportunity(&self.venues).await.map(|o| TopOpportunity {
            symbol: o.symbol,
            long_dex: o.long_dex,
            short_dex: o.short_dex,
            net_profit_percent: o.net_profit_percent,
        });

        for mut position in positions {
            // Parallel detectors pre-empt the waterfall. The liquidation
            // diff only runs on conclusive probes: a failed fetch is not a
            // missing leg.
            let critical = snapshots.get(&position.id).and_then(|(long, short)| {
                let liquidation = if long.is_conclusive() && short.is_conclusive() {
                    detectors::detect_leg_liquidation(long.snapshot(), short.snapshot())
                } else {
                    None
                };
                liquidation.or_else(|| {
                    detectors::detect_severe_imbalance(&position, severe_imbalance_threshold())
                })
            });
            if let Some(reason) = critical {
                self.close_position(&position, reason).await;
                continue;
            }

            let rates = self.rates_for(&position, top.clone()).await;
            position.current_divergence = Some(rates.divergence);
            if let Err(e) = self.store.update(&position).await {
                tracing::warn!(error = %e, "divergence cache write failed");
            }

            let decision = self.risk.should_exit(&position, &rates, Utc::now());
            if decision.should_exit {
                if let Some(reason) = decision.reason {
                    self.close_position(&position, reason).await;
                }
            }
        }
    }

    async fn rates_for(
        &self,
        position: &FundingArbPosition,
        top: Option<TopOpportunity>,
    ) -> CurrentRates {
        match self
            .scanner
            .current_rates(&position.symbol, &position.long_dex, &position.short_dex)
            .await
        {
            Some(data) => CurrentRates {
                divergence: data.divergence,
                long_rate: data.long_rate,
                short_rate: data.short_rate,
                long_oi_usd: Some(data.open_interest_long_usd),
                short_oi_usd: Some(data.open_interest_short_usd),
                top_opportunity: top,
                min_profit: self.settings.min_profit,
            },
            None => {
                // Store no longer ranks the triple; evaluate against the
                // last known divergence rather than skipping the check.
                let divergence =
                    position.current_divergence.unwrap_or(position.entry_divergence);
                CurrentRates {
                    divergence,
                    long_rate: position.entry_long_rate,
                    short_rate: position.entry_short_rate,
                    long_oi_usd: None,
                    short_oi_usd: None,
                    top_opportunity: top,
                    min_profit: self.settings.min_profit,
                }
            }
        }
    }

    async fn close_position(&self, position: &FundingArbPosition, reason: ExitReason) {
        self.emit(
            EventCategory::Execution,
            format!("closing {} ({})", position.symbol, reason),
        );
        match self.closer.close(position, &reason, &self.monitor).await {
            Ok(Some(closed)) => {
                self.emit(
                    EventCategory::Execution,
                    format!("closed {} pnl {}", closed.symbol, closed.pnl_usd),
                );
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(position_id = %position.id, error = %e, "close failed");
                self.emit(EventCategory::Error, format!("close failed: {e}"));
            }
        }
    }

    // =========================================================================
    // Phase 3: open
    // =========================================================================

    async fn phase_open(&mut self) {
        if self.settings.single_position_per_session && self.opened_this_session {
            tracing::debug!("single-position guard active, skipping open phase");
            return;
        }

        let open_positions = match self.store.open_positions().await {
            Ok(positions) => positions,
            Err(e) => {
                tracing::error!(error = %e, "open-position query failed");
                return;
            }
        };

        let candidates = self
            .scanner
            .scan(&self.venues, &open_positions, &self.failed_symbols)
            .await;

        for candidate in candidates {
            let symbol = candidate.opportunity.symbol.clone();
            self.set_stage(LifecycleStage::Executing).await;
            match self.opener.open(&candidate, &self.monitor).await {
                Ok(position) => {
                    self.opened_this_session = true;
                    self.emit(
                        EventCategory::Execution,
                        format!(
                            "opened {} {}/{} at {}",
                            position.symbol,
                            position.long_dex,
                            position.short_dex,
                            position.size_usd
                        ),
                    );
                }
                Err(EngineError::PreflightValidation(message)) => {
                    tracing::warn!(symbol = %symbol, %message, "open aborted by validation");
                    self.scanner.cooldowns().mark(&symbol, Utc::now());
                    self.failed_symbols.insert(symbol);
                }
                Err(e) => {
                    tracing::error!(symbol = %symbol, error = %e, "open failed");
                    self.failed_symbols.insert(symbol);
                    self.emit(EventCategory::Error, format!("open failed: {e}"));
                }
            }
        }
    }

    // =========================================================================
    // Out-of-cycle close requests
    // =========================================================================

    async fn handle_profit_close(&self, request: CloseRequest) {
        let position = match self.store.get(request.position_id).await {
            Ok(Some(position)) => position,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(error = %e, "profit-close position fetch failed");
                return;
            }
        };
        self.emit(
            EventCategory::Execution,
            format!(
                "profit-taking close {} (net {})",
                position.symbol, request.net_profit
            ),
        );
        if let Err(e) = self
            .closer
            .close_with_guard(&position, &request.reason, request.guard, &self.monitor)
            .await
        {
            tracing::error!(position_id = %position.id, error = %e, "profit-taking close failed");
        }
    }

    async fn handle_manual_close(&self, request: ManualClose) {
        let position = match self.store.get(request.position_id).await {
            Ok(Some(position)) => position,
            Ok(None) => {
                tracing::warn!(position_id = %request.position_id, "manual close: unknown position");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "manual-close position fetch failed");
                return;
            }
        };
        self.close_position(&position, ExitReason::Manual).await;
    }

    async fn handle_liquidation_event(&self, event: LiquidationEvent) {
        let positions = match self.store.open_positions().await {
            Ok(positions) => positions,
            Err(e) => {
                tracing::error!(error = %e, "open-position query failed");
                return;
            }
        };
        for position in positions {
            if let Some(reason) = detectors::detect_external_liquidation(&position, &event) {
                self.emit(
                    EventCategory::Warning,
                    format!("venue liquidation touched {}", position.symbol),
                );
                self.close_position(&position, reason).await;
            }
        }
    }

    fn spawn_liquidation_forwarders(&self) -> mpsc::UnboundedReceiver<LiquidationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        for venue in self.venues.values() {
            let mut liquidations = venue.stream.subscribe_liquidations();
            let tx = tx.clone();
            let venue_name = venue.name.clone();
            tokio::spawn(async move {
                loop {
                    match liquidations.recv().await {
                        Ok(event) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(venue = %venue_name, skipped, "liquidation stream lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }
        rx
    }

    // =========================================================================
    // Session, state, and dashboard plumbing
    // =========================================================================

    fn is_paused(&self) -> bool {
        self.paused.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn set_stage(&mut self, stage: LifecycleStage) {
        if self.session.lifecycle_stage == stage {
            return;
        }
        self.session.lifecycle_stage = stage;
        self.emit(EventCategory::Stage, stage.as_str());
        if let Err(e) = self.session_repo.upsert(&self.session).await {
            tracing::debug!(error = %e, "session stage write failed");
        }
    }

    fn emit(&self, category: EventCategory, message: impl Into<String>) {
        let event = TimelineEvent::now(category, message);
        if self.settings.persist_snapshots {
            let repo_event = event.clone();
            let session_id = self.session.session_id;
            let retention = self.settings.event_retention;
            let repo = self.dashboard_repo.clone();
            tokio::spawn(async move {
                if let Err(e) = repo
                    .insert_event(
                        session_id,
                        repo_event.ts,
                        repo_event.category.as_str(),
                        &repo_event.message,
                        &repo_event.metadata,
                        retention,
                    )
                    .await
                {
                    tracing::debug!(error = %e, "event persistence failed");
                }
            });
        }
        self.events.emit_event(event);
    }

    async fn persist_state(&self) {
        let state = json!({
            "session_id": self.session.session_id,
            "cycle_count": self.cycle_count,
            "opened_this_session": self.opened_this_session,
            "paused": self.is_paused(),
            "failed_symbols": self.failed_symbols,
        });
        if let Err(e) = self.state_repo.save(&self.settings.strategy_name, &state).await {
            tracing::debug!(error = %e, "strategy state write failed");
        }
        if let Err(e) = self.session_repo.upsert(&self.session).await {
            tracing::debug!(error = %e, "session heartbeat write failed");
        }
    }

    async fn publish_snapshot(&self) {
        let positions = self.store.open_positions().await.unwrap_or_default();
        let mut funding_total = Decimal::ZERO;
        for position in &positions {
            funding_total += self
                .store
                .cumulative_funding(position.id)
                .await
                .unwrap_or(Decimal::ZERO);
        }

        let snapshot = DashboardSnapshot {
            session: self.session.clone(),
            portfolio: PortfolioSummary {
                open_positions: positions.len(),
                total_exposure_usd: positions.iter().map(|p| p.size_usd).sum(),
                total_fees_paid: positions.iter().map(|p| p.total_fees_paid).sum(),
                cumulative_funding_usd: funding_total,
            },
            positions,
            generated_at: Utc::now(),
        };

        if self.settings.persist_snapshots {
            if let Ok(payload) = serde_json::to_value(&snapshot) {
                if let Err(e) = self
                    .dashboard_repo
                    .insert_snapshot(
                        self.session.session_id,
                        snapshot.generated_at,
                        &payload,
                        self.settings.snapshot_retention,
                    )
                    .await
                {
                    tracing::debug!(error = %e, "snapshot persistence failed");
                }
            }
        }
        self.events.emit_snapshot(snapshot);
    }
}

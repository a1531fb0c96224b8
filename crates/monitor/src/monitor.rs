//! BBO-driven monitor runtime.
//!
//! One listener task per open hedge, subscribed to both leg venues' BBO
//! fan-out. Evaluation is throttled per position, guarded against reentry,
//! and always defers to the shared closing set: a position the risk
//! controller is already closing is never touched here.

use crate::evaluator::{evaluate_immediate_profit, ProfitEvaluation};
use funding_arb_connector::{SubscriptionId, VenueMap};
use funding_arb_core::{symbol, Bbo, ExchangePositionSnapshot, Side};
use funding_arb_data::{FundingArbPosition, LegMetadata, PositionStore};
use funding_arb_execution::{ClosingGuard, ClosingSet};
use funding_arb_risk::ExitReason;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// How old a cached leg snapshot may be before REST is consulted.
pub const SNAPSHOT_CACHE_MAX_AGE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub enabled: bool,
    /// Minimum interval between re-evaluations per position.
    pub check_interval: Duration,
    /// Profit threshold as a fraction of position notional.
    pub min_profit_pct: Decimal,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: Duration::from_secs(1),
            min_profit_pct: Decimal::new(2, 3),
        }
    }
}

/// A close the monitor decided on, handed to the position closer together
/// with the claimed closing-set guard.
pub struct CloseRequest {
    pub position_id: Uuid,
    pub reason: ExitReason,
    pub net_profit: Decimal,
    pub guard: ClosingGuard,
}

struct ListenerHandle {
    task: JoinHandle<()>,
    subscriptions: Vec<(String, SubscriptionId)>,
}

pub struct RealTimeProfitMonitor {
    venues: Arc<VenueMap>,
    store: Arc<PositionStore>,
    closing: Arc<ClosingSet>,
    settings: MonitorSettings,
    close_tx: mpsc::UnboundedSender<CloseRequest>,
    listeners: Mutex<HashMap<Uuid, ListenerHandle>>,
    last_check: Mutex<HashMap<Uuid, Instant>>,
    being_evaluated: Mutex<HashSet<Uuid>>,
}

impl RealTimeProfitMonitor {
    #[must_use]
    pub fn new(
        venues: Arc<VenueMap>,
        store: Arc<PositionStore>,
        closing: Arc<ClosingSet>,
        settings: MonitorSettings,
        close_tx: mpsc::UnboundedSender<CloseRequest>,
    ) -> Arc<Self> {
        Arc::new(Self {
            venues,
            store,
            closing,
            settings,
            close_tx,
            listeners: Mutex::new(HashMap::new()),
            last_check: Mutex::new(HashMap::new()),
            being_evaluated: Mutex::new(HashSet::new()),
        })
    }

    /// Registers throttled BBO listeners on both leg venues. Re-registering
    /// an already-monitored position is a no-op.
    pub fn register_position(self: &Arc<Self>, position: &FundingArbPosition) {
        if !self.settings.enabled {
            return;
        }
        let position_id = position.id;
        if self.listeners.lock().contains_key(&position_id) {
            tracing::debug!(symbol = %position.symbol, %position_id, "listeners already registered");
            return;
        }

        let mut subscriptions = Vec::new();
        let mut subs = Vec::new();
        for venue_name in [&position.long_dex, &position.short_dex] {
            if let Some(venue) = self.venues.get(venue_name) {
                let sub = venue.stream.subscribe_bbo();
                subscriptions.push((venue_name.clone(), sub.id()));
                subs.push(sub);
            } else {
                tracing::warn!(
                    symbol = %position.symbol,
                    venue = %venue_name,
                    "cannot register profit listener, venue not wired"
                );
            }
        }
        if subs.is_empty() {
            return;
        }

        let monitor = Arc::clone(self);
        let symbol = position.symbol.clone();
        let task = tokio::spawn(async move {
            match subs.len() {
                1 => {
                    let sub = &subs[0];
                    loop {
                        let quote = sub.recv().await;
                        monitor.on_bbo(position_id, &symbol, &quote).await;
                    }
                }
                _ => {
                    let (long_sub, short_sub) = (&subs[0], &subs[1]);
                    loop {
                        let quote = tokio::select! {
                            q = long_sub.recv() => q,
                            q = short_sub.recv() => q,
                        };
                        monitor.on_bbo(position_id, &symbol, &quote).await;
                    }
                }
            }
        });

        self.listeners
            .lock()
            .insert(position_id, ListenerHandle { task, subscriptions });
        tracing::info!(
            symbol = %position.symbol,
            %position_id,
            "real-time profit monitor active"
        );
    }

    /// Removes listeners and throttle state for a position; idempotent.
    pub fn unregister_position(&self, position_id: Uuid) {
        let handle = self.listeners.lock().remove(&position_id);
        if let Some(handle) = handle {
            handle.task.abort();
            for (venue_name, sub_id) in handle.subscriptions {
                if let Some(venue) = self.venues.get(&venue_name) {
                    venue.stream.unsubscribe_bbo(sub_id);
                }
            }
            tracing::info!(%position_id, "real-time profit monitor disabled");
        }
        self.last_check.lock().remove(&position_id);
        self.being_evaluated.lock().remove(&position_id);
    }

    /// Tears down every listener on shutdown.
    pub fn cleanup_all(&self) {
        let ids: Vec<Uuid> = self.listeners.lock().keys().copied().collect();
        for id in ids {
            self.unregister_position(id);
        }
        self.last_check.lock().clear();
        self.being_evaluated.lock().clear();
    }

    /// Throttle check; records the evaluation time when it passes.
    fn passes_throttle(&self, position_id: Uuid, now: Instant) -> bool {
        let mut last_check = self.last_check.lock();
        match last_check.get(&position_id) {
            Some(last) if now.duration_since(*last) < self.settings.check_interval => false,
            _ => {
                last_check.insert(position_id, now);
                true
            }
        }
    }

    async fn on_bbo(self: &Arc<Self>, position_id: Uuid, position_symbol: &str, quote: &Bbo) {
        // Listeners receive every symbol the venue streams; only the
        // position's own underlying matters.
        if !symbol::same_underlying(&quote.symbol, position_symbol) {
            return;
        }
        if self.closing.contains(position_id) {
            return;
        }
        if !self.passes_throttle(position_id, Instant::now()) {
            return;
        }
        if !self.being_evaluated.lock().insert(position_id) {
            return;
        }

        let result = self.evaluate(position_id).await;
        self.being_evaluated.lock().remove(&position_id);

        if let Err(e) = result {
            tracing::warn!(%position_id, error = %e, "profit evaluation failed");
        }
    }

    async fn evaluate(self: &Arc<Self>, position_id: Uuid) -> anyhow::Result<()> {
        let Some(position) = self.store.get(position_id).await? else {
            return Ok(());
        };
        if !position.is_open() {
            return Ok(());
        }

        let (Some(long_venue), Some(short_venue)) = (
            self.venues.get(&position.long_dex),
            self.venues.get(&position.short_dex),
        ) else {
            return Ok(());
        };

        let Some(long_snapshot) = self.leg_snapshot(&position, true).await else {
            return Ok(());
        };
        let Some(short_snapshot) = self.leg_snapshot(&position, false).await else {
            return Ok(());
        };

        let long_bbo = long_venue.stream.latest_bbo();
        let short_bbo = short_venue.stream.latest_bbo();

        let evaluation = evaluate_immediate_profit(
            &position,
            &long_snapshot,
            &short_snapshot,
            long_bbo.as_ref(),
            short_bbo.as_ref(),
            long_venue.client.fee_structure().maker_fee,
            short_venue.client.fee_structure().maker_fee,
            self.settings.min_profit_pct,
        );
        if !evaluation.should_close {
            return Ok(());
        }

        log_opportunity(&position, &evaluation);

        // Double-check against genuinely fresh quotes before committing;
        // the spread may have reverted inside the evaluation window.
        let fresh_long = long_venue.client.fetch_bbo(&position.symbol).await.ok();
        let fresh_short = short_venue.client.fetch_bbo(&position.symbol).await.ok();
        let recheck = evaluate_immediate_profit(
            &position,
            &long_snapshot,
            &short_snapshot,
            fresh_long.as_ref(),
            fresh_short.as_ref(),
            long_venue.client.fee_structure().maker_fee,
            short_venue.client.fee_structure().maker_fee,
            self.settings.min_profit_pct,
        );
        if !recheck.should_close {
            tracing::info!(
                symbol = %position.symbol,
                first_net = %evaluation.net_profit,
                recheck_net = %recheck.net_profit,
                "profit evaporated before execution, aborting close"
            );
            return Ok(());
        }

        // Claim the close; the risk controller may have beaten us here.
        let Some(guard) = self.closing.begin_close(position_id) else {
            tracing::debug!(%position_id, "position already being closed, standing down");
            return Ok(());
        };

        let request = CloseRequest {
            position_id,
            reason: ExitReason::ImmediateProfit,
            net_profit: recheck.net_profit,
            guard,
        };
        if self.close_tx.send(request).is_err() {
            tracing::warn!(%position_id, "close channel dropped, releasing claim");
        }
        Ok(())
    }

    /// Snapshot for one leg: the metadata cache when fresh enough,
    /// otherwise a live REST read.
    async fn leg_snapshot(
        &self,
        position: &FundingArbPosition,
        long_side: bool,
    ) -> Option<ExchangePositionSnapshot> {
        let venue_name = if long_side { &position.long_dex } else { &position.short_dex };
        let venue = self.venues.get(venue_name)?;
        let leg = position.legs.get(venue_name);

        if let Some(leg) = leg {
            if let Some(snapshot) = snapshot_from_cache(leg, &venue.client.venue_symbol(&position.symbol)) {
                return Some(snapshot);
            }
        }

        match venue.client.position_snapshot(&position.symbol).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(
                    symbol = %position.symbol,
                    venue = %venue_name,
                    error = %e,
                    "snapshot fetch failed during profit evaluation"
                );
                None
            }
        }
    }
}

/// Builds a snapshot from the monitor-loop cache when it is fresh enough.
#[must_use]
pub fn snapshot_from_cache(leg: &LegMetadata, venue_symbol: &str) -> Option<ExchangePositionSnapshot> {
    let age = chrono::Utc::now() - leg.last_updated;
    if age > chrono::Duration::seconds(SNAPSHOT_CACHE_MAX_AGE.as_secs() as i64) {
        return None;
    }
    let mark_price = leg.mark_price?;
    let signed_quantity = match leg.side {
        Side::Long => leg.quantity.abs(),
        Side::Short => -leg.quantity.abs(),
    };
    Some(ExchangePositionSnapshot {
        symbol: venue_symbol.to_string(),
        side: leg.side,
        quantity: signed_quantity,
        entry_price: leg.entry_price,
        mark_price,
        unrealized_pnl: leg.unrealized_pnl.unwrap_or(Decimal::ZERO),
        realized_pnl: Decimal::ZERO,
        funding_accrued: leg.funding_accrued,
        leverage: 1,
        margin_reserved: leg.margin_reserved.unwrap_or(Decimal::ZERO),
        liquidation_price: leg.liquidation_price,
    })
}

fn log_opportunity(position: &FundingArbPosition, evaluation: &ProfitEvaluation) {
    tracing::info!(
        symbol = %position.symbol,
        long_dex = %position.long_dex,
        short_dex = %position.short_dex,
        long_pnl = %evaluation.long_pnl,
        short_pnl = %evaluation.short_pnl,
        fees = %evaluation.estimated_closing_fees,
        net_profit = %evaluation.net_profit,
        threshold = %evaluation.threshold,
        "immediate profit opportunity"
    );
}

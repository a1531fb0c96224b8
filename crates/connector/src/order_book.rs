//! Per-(venue, symbol) order book state.
//!
//! Single writer (the listener task), many readers. Snapshot-style feeds
//! replace the whole book; delta feeds apply incremental changes guarded by
//! sequence offsets. A crossed book or a sequence gap marks the book
//! not-ready until a fresh snapshot is applied.

use chrono::{DateTime, Utc};
use funding_arb_core::EngineError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Levels retained per side; worse levels are evicted to bound memory.
pub const MAX_LEVELS_PER_SIDE: usize = 100;

/// Default seconds without an update before the book counts as stale.
pub const DEFAULT_STALE_SECS: i64 = 60;

/// Default seconds without an update before a full reconnect is required.
pub const DEFAULT_RECONNECT_SECS: i64 = 180;

/// One price level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Top-N view of the book handed to readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    /// Bids, best (highest) first.
    pub bids: Vec<BookLevel>,
    /// Asks, best (lowest) first.
    pub asks: Vec<BookLevel>,
    /// Last applied sequence offset, if the feed carries one.
    pub last_sequence: Option<u64>,
}

/// Outcome of applying a delta update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// Update applied in order.
    Applied,
    /// Out-of-order duplicate, silently dropped.
    Duplicate,
}

#[derive(Debug)]
pub struct OrderBookState {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    last_sequence: Option<u64>,
    snapshot_loaded: bool,
    first_delta_pending: bool,
    last_update: Option<DateTime<Utc>>,
}

impl Default for OrderBookState {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderBookState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_sequence: None,
            snapshot_loaded: false,
            first_delta_pending: false,
            last_update: None,
        }
    }

    /// Clears all state; the book is not-ready until the next snapshot.
    pub fn reset(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.last_sequence = None;
        self.snapshot_loaded = false;
        self.first_delta_pending = false;
        self.last_update = None;
    }

    /// Returns true once a snapshot has loaded and the book is uncrossed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.snapshot_loaded
    }

    /// Last applied sequence offset.
    #[must_use]
    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// Wall-clock time of the last accepted update.
    #[must_use]
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    /// Replaces the whole book from a snapshot-style feed.
    pub fn apply_snapshot(
        &mut self,
        bids: Vec<BookLevel>,
        asks: Vec<BookLevel>,
        sequence: Option<u64>,
        now: DateTime<Utc>,
    ) {
        self.bids = bids
            .into_iter()
            .filter(|l| l.size > Decimal::ZERO)
            .map(|l| (l.price, l.size))
            .collect();
        self.asks = asks
            .into_iter()
            .filter(|l| l.size > Decimal::ZERO)
            .map(|l| (l.price, l.size))
            .collect();
        self.last_sequence = sequence;
        self.snapshot_loaded = true;
        self.first_delta_pending = true;
        self.last_update = Some(now);
        self.enforce_caps();
        self.invalidate_if_crossed();
    }

    /// Applies a delta update guarded by `(first_seq, last_seq)` offsets.
    ///
    /// The first delta after a snapshot must bracket `snapshot_seq + 1`;
    /// later deltas must continue exactly from the previous `last_seq`.
    /// Out-of-order duplicates are dropped without error.
    ///
    /// # Errors
    /// Returns [`EngineError::SequenceGap`] when a gap is detected. The book
    /// is marked not-ready; the caller must refetch a snapshot.
    pub fn apply_delta(
        &mut self,
        first_seq: u64,
        last_seq: u64,
        bid_changes: Vec<BookLevel>,
        ask_changes: Vec<BookLevel>,
        now: DateTime<Utc>,
    ) -> Result<DeltaOutcome, EngineError> {
        let prev = match self.last_sequence {
            Some(prev) if self.snapshot_loaded => prev,
            _ => {
                // No usable snapshot; deltas cannot anchor anywhere.
                self.snapshot_loaded = false;
                return Err(EngineError::SequenceGap { expected: 0, got: first_seq });
            }
        };

        if last_seq <= prev {
            return Ok(DeltaOutcome::Duplicate);
        }

        let expected = prev + 1;
        let in_order = if self.first_delta_pending {
            // First delta after a snapshot may bracket the expected offset.
            first_seq <= expected && expected <= last_seq
        } else {
            first_seq == expected
        };
        if !in_order {
            self.snapshot_loaded = false;
            return Err(EngineError::SequenceGap { expected, got: first_seq });
        }
        self.first_delta_pending = false;

        for level in bid_changes {
            if level.size.is_zero() {
                self.bids.remove(&level.price);
            } else {
                self.bids.insert(level.price, level.size);
            }
        }
        for level in ask_changes {
            if level.size.is_zero() {
                self.asks.remove(&level.price);
            } else {
                self.asks.insert(level.price, level.size);
            }
        }

        self.last_sequence = Some(last_seq);
        self.last_update = Some(now);
        self.enforce_caps();
        // A crossed book after the delta leaves the state not-ready; the
        // caller observes is_ready() and requests a resync.
        self.invalidate_if_crossed();

        Ok(DeltaOutcome::Applied)
    }

    /// Best bid, if any.
    #[must_use]
    pub fn best_bid(&self) -> Option<BookLevel> {
        self.bids
            .iter()
            .next_back()
            .map(|(p, s)| BookLevel { price: *p, size: *s })
    }

    /// Best ask, if any.
    #[must_use]
    pub fn best_ask(&self) -> Option<BookLevel> {
        self.asks
            .iter()
            .next()
            .map(|(p, s)| BookLevel { price: *p, size: *s })
    }

    /// Best levels where `price × size` clears the notional floor.
    ///
    /// With `min_notional_usd = 0` this returns the raw touch.
    #[must_use]
    pub fn best_levels(&self, min_notional_usd: Decimal) -> (Option<BookLevel>, Option<BookLevel>) {
        let bid = self
            .bids
            .iter()
            .rev()
            .map(|(p, s)| BookLevel { price: *p, size: *s })
            .find(|l| l.price * l.size >= min_notional_usd);
        let ask = self
            .asks
            .iter()
            .map(|(p, s)| BookLevel { price: *p, size: *s })
            .find(|l| l.price * l.size >= min_notional_usd);
        (bid, ask)
    }

    /// Top-N view, or `None` until the book is ready.
    #[must_use]
    pub fn snapshot(&self, levels: usize) -> Option<OrderBookSnapshot> {
        if !self.snapshot_loaded || (self.bids.is_empty() && self.asks.is_empty()) {
            return None;
        }
        Some(OrderBookSnapshot {
            bids: self
                .bids
                .iter()
                .rev()
                .take(levels)
                .map(|(p, s)| BookLevel { price: *p, size: *s })
                .collect(),
            asks: self
                .asks
                .iter()
                .take(levels)
                .map(|(p, s)| BookLevel { price: *p, size: *s })
                .collect(),
            last_sequence: self.last_sequence,
        })
    }

    /// Seconds since the last accepted update, or `None` before the first.
    #[must_use]
    pub fn age_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_update.map(|t| (now - t).num_seconds())
    }

    /// True when the book needs a fresh snapshot.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, threshold_secs: i64) -> bool {
        match self.age_secs(now) {
            Some(age) => age > threshold_secs,
            None => false,
        }
    }

    fn enforce_caps(&mut self) {
        while self.bids.len() > MAX_LEVELS_PER_SIDE {
            // Worst bid is the lowest price.
            let worst = *self.bids.keys().next().unwrap_or(&Decimal::ZERO);
            self.bids.remove(&worst);
        }
        while self.asks.len() > MAX_LEVELS_PER_SIDE {
            // Worst ask is the highest price.
            if let Some(worst) = self.asks.keys().next_back().copied() {
                self.asks.remove(&worst);
            } else {
                break;
            }
        }
    }

    fn invalidate_if_crossed(&mut self) {
        if let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) {
            if bid.price >= ask.price {
                tracing::warn!(
                    best_bid = %bid.price,
                    best_ask = %ask.price,
                    "crossed order book, marking not-ready"
                );
                self.snapshot_loaded = false;
            }
        }
    }
}

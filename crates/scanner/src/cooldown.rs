//! Per-symbol cooldowns after failed entry validation.
//!
//! A symbol that failed price-divergence validation or hit the wide-spread
//! fallback is suppressed for a cooldown interval so the scanner does not
//! retry it immediately.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Default cooldown: one orchestrator cycle.
pub const DEFAULT_COOLDOWN_SECS: i64 = 60;

#[derive(Debug)]
pub struct CooldownManager {
    expiries: Mutex<HashMap<String, DateTime<Utc>>>,
    duration: Duration,
}

impl Default for CooldownManager {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_COOLDOWN_SECS))
    }
}

impl CooldownManager {
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self { expiries: Mutex::new(HashMap::new()), duration }
    }

    /// Marks a symbol as cooling down from `now`.
    pub fn mark(&self, symbol: &str, now: DateTime<Utc>) {
        let expiry = now + self.duration;
        self.expiries.lock().insert(symbol.to_ascii_uppercase(), expiry);
        tracing::debug!(symbol = %symbol, expiry = %expiry, "symbol cooldown set");
    }

    /// True while the symbol's cooldown has not expired. Expired entries
    /// are removed on the way out.
    #[must_use]
    pub fn is_cooling(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        let key = symbol.to_ascii_uppercase();
        let mut expiries = self.expiries.lock();
        match expiries.get(&key) {
            Some(expiry) if *expiry > now => true,
            Some(_) => {
                expiries.remove(&key);
                false
            }
            None => false,
        }
    }

    /// Drops all expired entries.
    pub fn purge(&self, now: DateTime<Utc>) {
        self.expiries.lock().retain(|_, expiry| *expiry > now);
    }

    /// Number of live cooldowns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.expiries.lock().len()
    }

    /// True when no cooldowns are active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expiries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marked_symbol_cools_until_expiry() {
        let manager = CooldownManager::new(Duration::seconds(60));
        let now = Utc::now();
        manager.mark("BTC", now);

        assert!(manager.is_cooling("BTC", now));
        assert!(manager.is_cooling("btc", now + Duration::seconds(59)));
        assert!(!manager.is_cooling("BTC", now + Duration::seconds(61)));
        // Checking after expiry removed the entry.
        assert!(manager.is_empty());
    }

    #[test]
    fn unmarked_symbols_are_free() {
        let manager = CooldownManager::default();
        assert!(!manager.is_cooling("ETH", Utc::now()));
    }

    #[test]
    fn purge_drops_only_expired() {
        let manager = CooldownManager::new(Duration::seconds(60));
        let now = Utc::now();
        manager.mark("BTC", now - Duration::seconds(120));
        manager.mark("ETH", now);

        manager.purge(now);
        assert_eq!(manager.len(), 1);
        assert!(manager.is_cooling("ETH", now));
    }
}

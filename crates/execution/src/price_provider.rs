//! Unified BBO source with a short TTL cache.
//!
//! One instance is shared by the executor, the risk controller, and the
//! liquidity checks so a single cycle never fetches the same quote twice.
//! Lookup order: cache → connector's latest websocket quote → REST.

use funding_arb_connector::Venue;
use funding_arb_core::{Bbo, EngineError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default cache TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

pub struct PriceProvider {
    ttl: Duration,
    cache: Mutex<HashMap<(String, String), (Instant, Bbo)>>,
}

impl Default for PriceProvider {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl PriceProvider {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, cache: Mutex::new(HashMap::new()) }
    }

    /// Best bid/offer for a normalized symbol on one venue.
    ///
    /// # Errors
    /// Returns an error when neither the websocket cache nor REST yields a
    /// valid two-sided quote.
    pub async fn get_bbo(&self, venue: &Venue, symbol: &str) -> Result<Bbo, EngineError> {
        let key = (venue.name.clone(), symbol.to_string());

        if let Some(quote) = self.cached(&key) {
            return Ok(quote);
        }

        // Websocket quote, if the stream follows this symbol.
        let venue_symbol = venue.client.venue_symbol(symbol);
        if let Some(quote) = venue.stream.latest_bbo() {
            if quote.symbol.eq_ignore_ascii_case(&venue_symbol) && quote.is_valid() {
                self.insert(key, quote.clone());
                return Ok(quote);
            }
        }

        // REST fallback.
        let quote = venue.client.fetch_bbo(symbol).await?;
        if !quote.is_valid() {
            return Err(EngineError::PreflightValidation(format!(
                "non-positive BBO for {symbol} on {}: bid={}, ask={}",
                venue.name, quote.bid, quote.ask
            )));
        }
        self.insert(key, quote.clone());
        Ok(quote)
    }

    /// Drops every cached quote (used between orchestrator cycles).
    pub fn invalidate(&self) {
        self.cache.lock().clear();
    }

    /// Drops the cached quote for one (venue, symbol) pair.
    pub fn invalidate_symbol(&self, venue: &str, symbol: &str) {
        self.cache.lock().remove(&(venue.to_string(), symbol.to_string()));
    }

    fn cached(&self, key: &(String, String)) -> Option<Bbo> {
        let cache = self.cache.lock();
        let (inserted, quote) = cache.get(key)?;
        if inserted.elapsed() <= self.ttl {
            Some(quote.clone())
        } else {
            None
        }
    }

    fn insert(&self, key: (String, String), quote: Bbo) {
        self.cache.lock().insert(key, (Instant::now(), quote));
    }
}

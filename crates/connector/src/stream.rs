//! The market-stream surface consumed by the executor, profit monitor,
//! and orchestrator, and the composition-root pairing of a venue's REST
//! client with its stream manager.

use crate::bbo::{BboSubscription, SubscriptionId};
use crate::order_book::OrderBookSnapshot;
use async_trait::async_trait;
use funding_arb_core::{Bbo, EngineError, LiquidationEvent, OrderUpdate, VenueClient};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Live stream manager for one venue.
///
/// Implementations own their sockets, order book, and listener tasks;
/// callers interact only through these methods or read-only snapshots.
#[async_trait]
pub trait MarketStream: Send + Sync {
    /// Opens both streams. Blocks until the private stream is authenticated
    /// and the order book has loaded a snapshot (or the venue has no public
    /// depth feed). Calling while already connected is a no-op.
    ///
    /// # Errors
    /// Returns an error when authentication fails or the initial snapshot
    /// never arrives.
    async fn connect(&self) -> Result<(), EngineError>;

    /// Cancels listener tasks, closes sockets, clears state; idempotent.
    /// After this returns, no outbound network calls originate here.
    async fn disconnect(&self);

    /// True while listener tasks are alive.
    fn is_running(&self) -> bool;

    /// Reconfigures the public stream to the given normalized symbol
    /// without dropping unrelated streams.
    ///
    /// # Errors
    /// Returns an error when no snapshot arrives for the new symbol within
    /// the switch deadline.
    async fn ensure_market_feed(&self, symbol: &str) -> Result<(), EngineError>;

    /// The symbol the public stream currently follows.
    fn current_symbol(&self) -> Option<String>;

    /// Registers a bounded BBO subscription; every update on the focal
    /// symbol is delivered, oldest dropped on overflow.
    fn subscribe_bbo(&self) -> BboSubscription;

    /// Removes a BBO subscription; unknown ids are a no-op.
    fn unsubscribe_bbo(&self, id: SubscriptionId);

    /// Most recent cached quote, or `None` before the first update.
    fn latest_bbo(&self) -> Option<Bbo>;

    /// Top-N order book view, or `None` until the book is ready.
    fn order_book_snapshot(&self, levels: usize) -> Option<OrderBookSnapshot>;

    /// Order-status transitions from the private stream.
    fn subscribe_order_updates(&self) -> broadcast::Receiver<OrderUpdate>;

    /// Forced-liquidation events touching the focal symbol.
    fn subscribe_liquidations(&self) -> broadcast::Receiver<LiquidationEvent>;
}

/// A wired venue: REST trading client plus its stream manager.
pub struct Venue {
    /// Lowercase venue name, the map key.
    pub name: String,
    /// REST trading capabilities.
    pub client: Arc<dyn VenueClient>,
    /// Websocket stream manager.
    pub stream: Arc<dyn MarketStream>,
}

impl Venue {
    #[must_use]
    pub fn new(client: Arc<dyn VenueClient>, stream: Arc<dyn MarketStream>) -> Self {
        Self { name: client.name().to_string(), client, stream }
    }
}

impl std::fmt::Debug for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Venue")
            .field("name", &self.name)
            .field("running", &self.stream.is_running())
            .finish()
    }
}

/// Connectors keyed by lowercase venue name.
pub type VenueMap = HashMap<String, Arc<Venue>>;

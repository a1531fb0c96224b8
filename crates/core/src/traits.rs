//! Capability traits implemented per venue and by external collaborators.

use crate::error::EngineError;
use crate::types::{
    Bbo, ContractAttributes, ExchangePositionSnapshot, FeeStructure, LeverageInfo,
    OpportunityData, OpportunityFilter, OrderSide, TimeInForce, TradeData,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Trading capabilities every wired venue must provide.
///
/// One implementation per venue; the orchestrator holds a
/// `HashMap<String, Arc<dyn VenueClient>>` keyed by venue name. Symbols cross
/// this boundary only in the venue's native format, produced by
/// [`VenueClient::venue_symbol`].
#[async_trait]
pub trait VenueClient: Send + Sync {
    /// Lowercase venue name used as the map key (e.g. `"aster"`).
    fn name(&self) -> &str;

    /// Converts a venue-native symbol back to the normalized form (`BTC`).
    fn normalize_symbol(&self, venue_symbol: &str) -> String;

    /// Converts a normalized symbol to the venue's native format.
    fn venue_symbol(&self, symbol: &str) -> String;

    /// Maker/taker rates and funding cadence for this venue.
    fn fee_structure(&self) -> FeeStructure;

    /// Fetches contract metadata for a normalized symbol.
    ///
    /// # Errors
    /// Returns [`EngineError::VenueRejected`] when the symbol is not listed,
    /// [`EngineError::TransientNetwork`] on transport failure.
    async fn contract_attributes(&self, symbol: &str) -> Result<ContractAttributes, EngineError>;

    /// Reads current and maximum leverage for a symbol.
    ///
    /// # Errors
    /// Returns an error on transport failure or unknown symbol.
    async fn leverage_info(&self, symbol: &str) -> Result<LeverageInfo, EngineError>;

    /// Sets account leverage for a symbol.
    ///
    /// # Errors
    /// Returns [`EngineError::VenueRejected`] when the venue refuses the value.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), EngineError>;

    /// Fetches best bid/offer over REST (websocket-independent fallback).
    ///
    /// # Errors
    /// Returns an error on transport failure.
    async fn fetch_bbo(&self, symbol: &str) -> Result<Bbo, EngineError>;

    /// Places a limit order; returns the venue order id.
    ///
    /// # Errors
    /// Returns [`EngineError::VenueRejected`] on rejection,
    /// [`EngineError::TransientNetwork`] on transport failure.
    async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        reduce_only: bool,
        time_in_force: TimeInForce,
    ) -> Result<String, EngineError>;

    /// Places a market (IOC) order; returns the venue order id.
    ///
    /// # Errors
    /// Returns an error on rejection or transport failure.
    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> Result<String, EngineError>;

    /// Cancels a resting order on the venue side.
    ///
    /// # Errors
    /// Returns an error when the venue refuses the cancel; an already-gone
    /// order is not an error.
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), EngineError>;

    /// Live snapshot of the account's position in a symbol, or `None` when flat.
    ///
    /// # Errors
    /// Returns an error on transport failure.
    async fn position_snapshot(
        &self,
        symbol: &str,
    ) -> Result<Option<ExchangePositionSnapshot>, EngineError>;

    /// User trade history, optionally filtered to one order id.
    ///
    /// # Errors
    /// Returns an error on transport failure.
    async fn user_trade_history(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        order_id: Option<&str>,
    ) -> Result<Vec<TradeData>, EngineError>;

    /// Rounds a quantity down to the venue's step size for the symbol.
    fn round_to_step(&self, symbol: &str, quantity: Decimal) -> Decimal;
}

/// External funding-rate store queried by the opportunity scanner.
///
/// The collection service that populates the store is out of process; the
/// engine only consumes ranked candidates through this seam.
#[async_trait]
pub trait OpportunityStore: Send + Sync {
    /// Returns candidate hedges matching the filter, best first.
    ///
    /// # Errors
    /// Returns an error when the store is unreachable.
    async fn find_opportunities(
        &self,
        filter: &OpportunityFilter,
    ) -> Result<Vec<OpportunityData>, EngineError>;
}

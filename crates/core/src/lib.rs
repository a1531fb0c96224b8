//! Core types, traits, errors, and configuration for the funding arbitrage engine.
//!
//! Everything shared across the venue connectors, the executor, the risk
//! controller, and the orchestrator lives here: the `VenueClient` capability
//! trait, the market-data primitives (BBO, snapshots, liquidation events),
//! the engine-wide error taxonomy, and the configuration surface.

pub mod config;
pub mod config_loader;
pub mod error;
pub mod symbol;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use config_loader::ConfigLoader;
pub use error::EngineError;
pub use traits::{OpportunityStore, VenueClient};
pub use types::{
    Bbo, ContractAttributes, ExchangePositionSnapshot, ExecutionMode, FeeStructure,
    LeverageInfo, LiquidationEvent, OpportunityData, OpportunityFilter, OrderSide,
    OrderStatus, OrderUpdate, Side, TimeInForce, TradeData,
};

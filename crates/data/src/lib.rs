//! Durable storage for the funding arbitrage engine.
//!
//! The position store exclusively owns hedge records; every mutator takes a
//! per-position logical lock before writing. Repositories hold the SQL; the
//! store layers locking, additive-merge semantics, and idempotent closes on
//! top.

pub mod database;
pub mod models;
pub mod repositories;
pub mod store;

pub use database::Database;
pub use models::{
    FillFingerprint, FundingArbPosition, LegMetadata, LifecycleStage, MergeFill, PositionStatus,
    Session, SessionHealth, TradeFill, TradeType,
};
pub use store::PositionStore;

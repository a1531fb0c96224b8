//! Atomic multi-leg execution.
//!
//! The executor opens or closes all legs of a hedge concurrently and rolls
//! the survivors back when any leg fails to fill. Around it live the
//! break-even price aligner, the cross-venue quantity harmonizer, the
//! shared TTL price cache, and the closing set through which the risk
//! controller and the profit monitor coordinate so a hedge is never closed
//! twice.

pub mod alignment;
pub mod atomic;
pub mod closing_set;
pub mod price_provider;
pub mod sizing;

pub use alignment::{AlignedPrices, AlignmentStrategy, BreakEvenAligner};
pub use atomic::{
    AtomicExecutionResult, AtomicExecutor, ExecutorConfig, FillRecord, OrderSpec,
};
pub use closing_set::{ClosingGuard, ClosingSet};
pub use price_provider::PriceProvider;
pub use sizing::{harmonize_quantities, HarmonizedQuantities, LegSizing};

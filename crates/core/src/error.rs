//! Engine-wide error taxonomy.
//!
//! Components return these typed kinds instead of raising control-flow
//! exceptions; callers match on the kind to decide between retry, resync,
//! cooldown, and fatal paths.

use thiserror::Error;

/// Error kinds the engine core recognizes.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Socket or REST failure; retry with backoff at the next cycle.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Depth stream skipped a sequence offset; the order book needs a resync.
    #[error("sequence gap on depth stream: expected {expected}, got {got}")]
    SequenceGap {
        /// Sequence the book expected next.
        expected: u64,
        /// First sequence carried by the rejected update.
        got: u64,
    },

    /// Order book has not been updated within the staleness threshold.
    #[error("order book stale for {age_secs}s")]
    StaleOrderBook {
        /// Seconds since the last accepted update.
        age_secs: u64,
    },

    /// Private-stream token expired or could not be refreshed.
    #[error("listen key expired")]
    ListenKeyExpired,

    /// Pre-flight validation rejected an open; symbol enters cooldown.
    #[error("preflight validation failed: {0}")]
    PreflightValidation(String),

    /// One or more legs failed to fill; rollback was invoked.
    #[error("partial fill: {0}")]
    PartialFill(String),

    /// Venue reported or snapshot diff implied a forced liquidation.
    #[error("liquidation detected on {venue} for {symbol}")]
    LiquidationDetected {
        /// Venue that liquidated the leg.
        venue: String,
        /// Affected symbol.
        symbol: String,
    },

    /// Leg token amounts diverged beyond the imbalance threshold.
    #[error("severe leg imbalance: {0}")]
    SevereImbalance(String),

    /// Configuration failed validation at startup; fatal.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Persistence unreachable; fatal at startup, degraded at runtime.
    #[error("database unavailable: {0}")]
    DatabaseUnavailable(String),

    /// Venue rejected an order or request with a business error.
    #[error("venue {venue} rejected request: {message}")]
    VenueRejected {
        /// Venue name.
        venue: String,
        /// Venue-supplied reason.
        message: String,
    },
}

impl EngineError {
    /// Returns true for kinds that must stop the process.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConfigInvalid(_))
    }

    /// Returns true for kinds absorbed locally with a retry/backoff loop.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork(_)
                | Self::SequenceGap { .. }
                | Self::StaleOrderBook { .. }
                | Self::ListenKeyExpired
        )
    }
}

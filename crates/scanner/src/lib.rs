//! Opportunity scanning and ranking.
//!
//! Candidates come from the external funding-rate store; the analyzer
//! normalizes rates to a per-second basis and nets out fees, the cooldown
//! manager suppresses symbols that recently failed validation, and the
//! scanner enforces capacity and sizes each candidate from target margin
//! and the venues' common leverage.

pub mod analyzer;
pub mod cooldown;
pub mod fees;
pub mod http_store;
pub mod scanner;

pub use analyzer::FundingAnalyzer;
pub use cooldown::CooldownManager;
pub use fees::FeeCalculator;
pub use http_store::HttpOpportunityStore;
pub use scanner::{OpportunityScanner, ScannerSettings, SizedOpportunity};

//! Strategy orchestration.
//!
//! The orchestrator drives the engine's cycle: Phase 1 refreshes leg
//! snapshots and accrues funding, Phase 2 asks the risk controller and the
//! profit monitor's close queue whether anything must close, Phase 3 scans
//! for new opportunities and opens them. A control handle toggles pause and
//! requests manual closes; dashboard snapshots and timeline events stream
//! out on broadcast channels.

pub mod closer;
pub mod events;
pub mod opener;
pub mod strategy;

pub use closer::PositionCloser;
pub use events::{ControlHandle, DashboardSnapshot, EngineEvents, EventCategory, TimelineEvent};
pub use opener::{OpenSettings, PositionOpener};
pub use strategy::{OrchestratorDeps, StrategyOrchestrator, StrategySettings};

//! Dashboard events and the control surface.

use chrono::{DateTime, Utc};
use funding_arb_data::{FundingArbPosition, Session};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// Category of a timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Stage,
    Execution,
    Info,
    Warning,
    Error,
}

impl EventCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stage => "stage",
            Self::Execution => "execution",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// One entry on the dashboard timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub ts: DateTime<Utc>,
    pub category: EventCategory,
    pub message: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl TimelineEvent {
    #[must_use]
    pub fn now(category: EventCategory, message: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            category,
            message: message.into(),
            metadata: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Portfolio roll-up pushed with every snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub open_positions: usize,
    pub total_exposure_usd: Decimal,
    pub total_fees_paid: Decimal,
    pub cumulative_funding_usd: Decimal,
}

/// State pushed to the out-of-process dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub session: Session,
    pub positions: Vec<FundingArbPosition>,
    pub portfolio: PortfolioSummary,
    pub generated_at: DateTime<Utc>,
}

/// Broadcast channels the dashboard server subscribes to.
pub struct EngineEvents {
    pub snapshots: broadcast::Sender<DashboardSnapshot>,
    pub timeline: broadcast::Sender<TimelineEvent>,
}

impl Default for EngineEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineEvents {
    #[must_use]
    pub fn new() -> Self {
        let (snapshots, _) = broadcast::channel(64);
        let (timeline, _) = broadcast::channel(256);
        Self { snapshots, timeline }
    }

    pub fn emit_event(&self, event: TimelineEvent) {
        tracing::debug!(category = event.category.as_str(), message = %event.message, "timeline event");
        let _ = self.timeline.send(event);
    }

    pub fn emit_snapshot(&self, snapshot: DashboardSnapshot) {
        let _ = self.snapshots.send(snapshot);
    }
}

/// Manual close request from the control API.
#[derive(Debug, Clone)]
pub struct ManualClose {
    pub position_id: Uuid,
}

/// Shared control surface consumed by the web API.
#[derive(Clone)]
pub struct ControlHandle {
    paused: Arc<AtomicBool>,
    manual_close_tx: mpsc::UnboundedSender<ManualClose>,
}

impl ControlHandle {
    #[must_use]
    pub fn new(paused: Arc<AtomicBool>, manual_close_tx: mpsc::UnboundedSender<ManualClose>) -> Self {
        Self { paused, manual_close_tx }
    }

    /// Pauses opening and closing; Phase 1 monitoring continues.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        tracing::info!("strategy paused via control api");
    }

    /// Resumes the full cycle.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        tracing::info!("strategy resumed via control api");
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Queues a manual close for the next Phase 2.
    ///
    /// Returns false when the orchestrator is gone.
    pub fn request_close(&self, position_id: Uuid) -> bool {
        self.manual_close_tx.send(ManualClose { position_id }).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_resume_round_trip() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = ControlHandle::new(Arc::new(AtomicBool::new(false)), tx);

        assert!(!handle.is_paused());
        handle.pause();
        assert!(handle.is_paused());
        handle.resume();
        assert!(!handle.is_paused());
    }

    #[test]
    fn manual_close_reaches_queue() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ControlHandle::new(Arc::new(AtomicBool::new(false)), tx);

        let id = Uuid::new_v4();
        assert!(handle.request_close(id));
        assert_eq!(rx.try_recv().unwrap().position_id, id);
    }

    #[test]
    fn events_flow_to_subscribers() {
        let events = EngineEvents::new();
        let mut rx = events.timeline.subscribe();
        events.emit_event(TimelineEvent::now(EventCategory::Stage, "scanning"));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.category, EventCategory::Stage);
        assert_eq!(event.message, "scanning");
    }
}

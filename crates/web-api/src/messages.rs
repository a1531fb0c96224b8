//! Wire format of the control websocket.

use funding_arb_orchestrator::{DashboardSnapshot, TimelineEvent};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Commands accepted from the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    PauseStrategy,
    ResumeStrategy,
    ClosePosition {
        position_id: Uuid,
    },
    Ping,
}

/// Reply sent for every command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlReply {
    pub ok: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlReply {
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self { ok: true, message: message.into(), error: None }
    }

    #[must_use]
    pub fn err(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self { ok: false, message: message.into(), error: Some(error.into()) }
    }
}

/// Frames pushed to the dashboard.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundFrame {
    Snapshot(DashboardSnapshot),
    Event(TimelineEvent),
    Reply(ControlReply),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_from_documented_json() {
        let pause: ControlCommand = serde_json::from_str(r#"{"type":"pause_strategy"}"#).unwrap();
        assert_eq!(pause, ControlCommand::PauseStrategy);

        let ping: ControlCommand = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping, ControlCommand::Ping);

        let id = Uuid::new_v4();
        let close: ControlCommand = serde_json::from_str(&format!(
            r#"{{"type":"close_position","position_id":"{id}"}}"#
        ))
        .unwrap();
        assert_eq!(close, ControlCommand::ClosePosition { position_id: id });
    }

    #[test]
    fn unknown_commands_are_rejected() {
        assert!(serde_json::from_str::<ControlCommand>(r#"{"type":"self_destruct"}"#).is_err());
    }

    #[test]
    fn replies_serialize_with_optional_error() {
        let ok = serde_json::to_value(ControlReply::ok("paused")).unwrap();
        assert_eq!(ok["ok"], true);
        assert!(ok.get("error").is_none());

        let err = serde_json::to_value(ControlReply::err("close failed", "unknown id")).unwrap();
        assert_eq!(err["ok"], false);
        assert_eq!(err["error"], "unknown id");
    }
}

//! The dashboard/control websocket connection.

use crate::messages::{ControlCommand, ControlReply, OutboundFrame};
use crate::server::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| websocket_connection(socket, state))
}

async fn websocket_connection(mut socket: WebSocket, state: AppState) {
    let mut snapshots = state.events.snapshots.subscribe();
    let mut timeline = state.events.timeline.subscribe();

    loop {
        tokio::select! {
            snapshot = snapshots.recv() => match snapshot {
                Ok(snapshot) => {
                    if send_frame(&mut socket, &OutboundFrame::Snapshot(snapshot)).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            event = timeline.recv() => match event {
                Ok(event) => {
                    if send_frame(&mut socket, &OutboundFrame::Event(event)).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = handle_command(&state, &text);
                    if send_frame(&mut socket, &OutboundFrame::Reply(reply)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }

    tracing::info!("control websocket closed");
}

async fn send_frame(socket: &mut WebSocket, frame: &OutboundFrame) -> Result<(), axum::Error> {
    let json = serde_json::to_string(frame).unwrap_or_default();
    socket.send(Message::Text(json)).await
}

fn handle_command(state: &AppState, text: &str) -> ControlReply {
    let command: ControlCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => return ControlReply::err("unrecognized command", e.to_string()),
    };

    match command {
        ControlCommand::Ping => ControlReply::ok("pong"),
        ControlCommand::PauseStrategy => {
            state.control.pause();
            ControlReply::ok("strategy paused")
        }
        ControlCommand::ResumeStrategy => {
            state.control.resume();
            ControlReply::ok("strategy resumed")
        }
        ControlCommand::ClosePosition { position_id } => {
            if state.control.request_close(position_id) {
                ControlReply::ok(format!("close queued for {position_id}"))
            } else {
                ControlReply::err("close not queued", "strategy is shutting down")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funding_arb_orchestrator::{ControlHandle, EngineEvents};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn state() -> (AppState, mpsc::UnboundedReceiver<funding_arb_orchestrator::events::ManualClose>) {
        let paused = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();
        let state = AppState {
            control: ControlHandle::new(paused, tx),
            events: Arc::new(EngineEvents::new()),
        };
        (state, rx)
    }

    #[test]
    fn pause_and_resume_commands_toggle_state() {
        let (state, _rx) = state();

        let reply = handle_command(&state, r#"{"type":"pause_strategy"}"#);
        assert!(reply.ok);
        assert!(state.control.is_paused());

        let reply = handle_command(&state, r#"{"type":"resume_strategy"}"#);
        assert!(reply.ok);
        assert!(!state.control.is_paused());
    }

    #[test]
    fn ping_answers_pong() {
        let (state, _rx) = state();
        let reply = handle_command(&state, r#"{"type":"ping"}"#);
        assert!(reply.ok);
        assert_eq!(reply.message, "pong");
    }

    #[test]
    fn close_command_queues_request() {
        let (state, mut rx) = state();
        let id = uuid::Uuid::new_v4();
        let reply =
            handle_command(&state, &format!(r#"{{"type":"close_position","position_id":"{id}"}}"#));
        assert!(reply.ok);
        assert_eq!(rx.try_recv().unwrap().position_id, id);
    }

    #[test]
    fn malformed_commands_yield_errors() {
        let (state, _rx) = state();
        let reply = handle_command(&state, "not json");
        assert!(!reply.ok);
        assert!(reply.error.is_some());
    }
}

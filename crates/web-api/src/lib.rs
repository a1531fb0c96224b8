//! WebSocket control API and dashboard feed.
//!
//! One endpoint serves both directions: dashboard snapshots and timeline
//! events stream out; pause/resume/close-position commands come in and are
//! answered with `{ok, message}` replies.

pub mod messages;
pub mod server;
pub mod websocket;

pub use messages::{ControlCommand, ControlReply, OutboundFrame};
pub use server::{run_server, AppState};

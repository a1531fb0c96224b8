//! Lighter venue integration.
//!
//! Lighter authenticates at websocket handshake time, so switching the
//! market feed means closing and reopening the socket rather than sending
//! subscribe/unsubscribe frames. Its depth channel is incremental: every
//! update carries a monotonic offset, and a gap forces an asynchronous
//! snapshot refetch. There is no dedicated force-order stream; liquidations
//! are synthesized from order updates flagged as such.

pub mod client;
pub mod messages;
pub mod websocket;

pub use client::LighterClient;
pub use websocket::LighterStream;

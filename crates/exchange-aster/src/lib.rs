//! Aster venue integration.
//!
//! Aster is the Binance-shaped venue: a signed REST API, an expiring listen
//! key authorizing the private stream, and a combined public stream carrying
//! book-ticker quotes, partial-depth snapshots, and force-order events.
//! Market-feed switching uses subscribe/unsubscribe batches on the live
//! socket.

pub mod client;
pub mod messages;
pub mod websocket;

pub use client::AsterClient;
pub use websocket::AsterStream;

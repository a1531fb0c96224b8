//! Shared websocket stream substrate.
//!
//! Every venue connector is built from the same parts: an
//! [`order_book::OrderBookState`] fed by its depth channel, a
//! [`bbo::BboBroadcaster`] fanning quotes out to bounded subscriber queues,
//! a [`backoff::BackoffPolicy`] driving its reconnect loops, and (where the
//! venue requires one) a [`listen_key::ListenKeyState`] scheduling private
//! stream token refreshes. The [`stream::MarketStream`] trait is the surface
//! the executor, profit monitor, and orchestrator consume.

pub mod backoff;
pub mod bbo;
pub mod listen_key;
pub mod order_book;
pub mod stream;

pub use backoff::BackoffPolicy;
pub use bbo::{BboBroadcaster, BboSubscription, SubscriptionId};
pub use listen_key::ListenKeyState;
pub use order_book::{BookLevel, OrderBookSnapshot, OrderBookState};
pub use stream::{MarketStream, Venue, VenueMap};

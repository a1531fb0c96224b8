//! Websocket stream manager for Lighter.
//!
//! One socket carries both the account channel and the focal market's
//! incremental order book. Authentication happens at handshake time, so the
//! market-feed switcher closes and reopens the socket instead of sending
//! subscribe frames. Depth updates carry a monotonic offset; a gap marks
//! the book not-ready and triggers an in-place channel resubscribe, which
//! delivers a fresh snapshot.

use crate::client::LighterClient;
use crate::messages;
use async_trait::async_trait;
use chrono::Utc;
use funding_arb_connector::{
    BackoffPolicy, BboBroadcaster, BboSubscription, MarketStream, OrderBookSnapshot,
    OrderBookState, SubscriptionId,
};
use funding_arb_connector::order_book::{DEFAULT_RECONNECT_SECS, DEFAULT_STALE_SECS};
use funding_arb_core::{Bbo, EngineError, LiquidationEvent, OrderUpdate, VenueClient};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const STALENESS_POLL: Duration = Duration::from_secs(30);
const FEED_SWITCH_DEADLINE: Duration = Duration::from_secs(5);
const CONNECT_DEADLINE: Duration = Duration::from_secs(15);

struct Inner {
    ws_url: String,
    client: Arc<LighterClient>,
    running: AtomicBool,
    account_ready: AtomicBool,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    current_symbol: RwLock<Option<String>>,
    order_book: RwLock<OrderBookState>,
    latest_bbo: RwLock<Option<Bbo>>,
    bbo: BboBroadcaster,
    order_updates: broadcast::Sender<OrderUpdate>,
    liquidations: broadcast::Sender<LiquidationEvent>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    force_reconnect: Notify,
}

/// Lighter market-stream manager.
pub struct LighterStream {
    inner: Arc<Inner>,
}

impl LighterStream {
    #[must_use]
    pub fn new(ws_url: String, client: Arc<LighterClient>) -> Self {
        let (order_updates, _) = broadcast::channel(256);
        let (liquidations, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                ws_url,
                client,
                running: AtomicBool::new(false),
                account_ready: AtomicBool::new(false),
                shutdown: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
                current_symbol: RwLock::new(None),
                order_book: RwLock::new(OrderBookState::new()),
                latest_bbo: RwLock::new(None),
                bbo: BboBroadcaster::default(),
                order_updates,
                liquidations,
                outbound: Mutex::new(None),
                force_reconnect: Notify::new(),
            }),
        }
    }
}

impl Inner {
    fn book_channel(market_id: &str) -> String {
        format!("order_book:{market_id}")
    }

    fn subscribe_frame(channel: &str) -> Message {
        Message::Text(json!({ "type": "subscribe", "channel": channel }).to_string())
    }

    fn unsubscribe_frame(channel: &str) -> Message {
        Message::Text(json!({ "type": "unsubscribe", "channel": channel }).to_string())
    }

    /// Requests a fresh snapshot by cycling the order-book channel on the
    /// live socket. Used after sequence gaps and staleness.
    fn request_book_resync(&self, market_id: &str) {
        let outbound = self.outbound.lock().clone();
        if let Some(tx) = outbound {
            let channel = Self::book_channel(market_id);
            let _ = tx.send(Self::unsubscribe_frame(&channel));
            let _ = tx.send(Self::subscribe_frame(&channel));
        }
    }

    fn publish_top_of_book(&self, venue_symbol: &str, sequence: u64) {
        let (bid, ask) = {
            let book = self.order_book.read();
            if !book.is_ready() {
                return;
            }
            (book.best_bid(), book.best_ask())
        };
        if let (Some(bid), Some(ask)) = (bid, ask) {
            let quote = Bbo {
                symbol: venue_symbol.to_string(),
                bid: bid.price,
                ask: ask.price,
                timestamp: Utc::now(),
                sequence: Some(sequence),
            };
            *self.latest_bbo.write() = Some(quote.clone());
            self.bbo.publish(&quote);
        }
    }

    fn handle_text(&self, text: &str, market_id: Option<&str>) {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "unparseable lighter message");
                return;
            }
        };

        if let Some(book_msg) = messages::parse_order_book(&value) {
            let symbol = self.current_symbol.read().clone();
            let venue_symbol = symbol
                .as_deref()
                .map(|s| self.client.venue_symbol(s))
                .unwrap_or_default();

            if book_msg.is_snapshot {
                self.order_book.write().apply_snapshot(
                    book_msg.bids,
                    book_msg.asks,
                    Some(book_msg.offset),
                    Utc::now(),
                );
                self.publish_top_of_book(&venue_symbol, book_msg.offset);
            } else {
                let offset = book_msg.offset;
                let result = self.order_book.write().apply_delta(
                    offset,
                    offset,
                    book_msg.bids,
                    book_msg.asks,
                    Utc::now(),
                );
                match result {
                    Ok(_) => self.publish_top_of_book(&venue_symbol, offset),
                    Err(e) => {
                        tracing::warn!(error = %e, "depth gap, requesting book resync");
                        if let Some(market_id) = market_id {
                            self.request_book_resync(market_id);
                        }
                    }
                }
            }
            return;
        }

        let symbol = self.current_symbol.read().clone();
        let venue_symbol = symbol
            .as_deref()
            .map(|s| self.client.venue_symbol(s))
            .unwrap_or_default();
        for update in messages::parse_account_orders(&value, &venue_symbol) {
            if update.is_liquidation {
                // No dedicated force-order stream on this venue; synthesize
                // the event from the flagged order update.
                let event = LiquidationEvent {
                    venue: update.venue.clone(),
                    symbol: update.symbol.clone(),
                    side: update.side,
                    quantity: update.filled_quantity,
                    price: update.avg_fill_price.unwrap_or_default(),
                    timestamp: update.timestamp,
                };
                let _ = self.liquidations.send(event);
            }
            let _ = self.order_updates.send(update);
        }
    }
}

async fn stream_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let mut backoff = BackoffPolicy::private();

    while !*shutdown.borrow() {
        // Resolve the focal market before the handshake: auth and channel
        // selection both happen at connect time on this venue.
        let symbol = inner.current_symbol.read().clone();
        let market_id = match &symbol {
            Some(symbol) => match inner.client.contract_attributes(symbol).await {
                Ok(attrs) => Some(attrs.contract_id),
                Err(e) => {
                    tracing::warn!(error = %e, symbol = %symbol, "market resolution failed");
                    None
                }
            },
            None => None,
        };

        let url = format!("{}?auth={}", inner.ws_url, inner.client.auth_token());
        match connect_async(&url).await {
            Ok((ws, _)) => {
                tracing::info!("lighter stream connected");
                backoff.reset();
                inner.order_book.write().reset();

                let (mut sink, mut stream) = ws.split();

                // Fresh write handle first, then the subscribe batch.
                let (tx, mut outbound) = mpsc::unbounded_channel::<Message>();
                *inner.outbound.lock() = Some(tx);

                let mut subscribed = true;
                if sink.send(Inner::subscribe_frame("account_all")).await.is_err() {
                    subscribed = false;
                }
                if let Some(market_id) = market_id.as_deref() {
                    if sink
                        .send(Inner::subscribe_frame(&Inner::book_channel(market_id)))
                        .await
                        .is_err()
                    {
                        subscribed = false;
                    }
                }

                if subscribed {
                    inner.account_ready.store(true, Ordering::SeqCst);
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => {
                                let _ = sink.send(Message::Close(None)).await;
                                inner.account_ready.store(false, Ordering::SeqCst);
                                return;
                            }
                            () = inner.force_reconnect.notified() => {
                                tracing::info!("lighter stream reconnect requested");
                                let _ = sink.send(Message::Close(None)).await;
                                break;
                            }
                            out = outbound.recv() => match out {
                                Some(msg) => {
                                    if sink.send(msg).await.is_err() {
                                        break;
                                    }
                                }
                                None => break,
                            },
                            incoming = stream.next() => match incoming {
                                Some(Ok(Message::Text(text))) => {
                                    inner.handle_text(&text, market_id.as_deref());
                                }
                                Some(Ok(Message::Ping(payload))) => {
                                    let _ = sink.send(Message::Pong(payload)).await;
                                }
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    tracing::warn!(error = %e, "lighter stream error");
                                    break;
                                }
                            }
                        }
                    }
                }

                inner.account_ready.store(false, Ordering::SeqCst);
                inner.outbound.lock().take();
                inner.order_book.write().reset();
            }
            Err(e) => {
                tracing::warn!(error = %e, "lighter stream connect failed");
            }
        }

        if *shutdown.borrow() {
            break;
        }
        let delay = backoff.next_delay();
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }
}

async fn staleness_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            () = tokio::time::sleep(STALENESS_POLL) => {}
            _ = shutdown.changed() => return,
        }

        let symbol = inner.current_symbol.read().clone();
        let Some(symbol) = symbol else { continue };

        let now = Utc::now();
        let (stale, needs_reconnect) = {
            let book = inner.order_book.read();
            (
                book.is_stale(now, DEFAULT_STALE_SECS),
                book.is_stale(now, DEFAULT_RECONNECT_SECS),
            )
        };

        if needs_reconnect {
            tracing::warn!("lighter book past reconnect threshold, forcing reconnect");
            inner.force_reconnect.notify_one();
        } else if stale {
            tracing::warn!("lighter book stale, requesting snapshot");
            if let Some(market_id) = inner.client.market_id(&symbol) {
                inner.request_book_resync(&market_id);
            }
        }
    }
}

#[async_trait]
impl MarketStream for LighterStream {
    async fn connect(&self) -> Result<(), EngineError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let (tx, rx) = watch::channel(false);
        *self.inner.shutdown.lock() = Some(tx);

        {
            let mut tasks = self.inner.tasks.lock();
            tasks.push(tokio::spawn(stream_loop(Arc::clone(&self.inner), rx.clone())));
            tasks.push(tokio::spawn(staleness_loop(Arc::clone(&self.inner), rx)));
        }

        let deadline = Instant::now() + CONNECT_DEADLINE;
        loop {
            let account_ok = self.inner.account_ready.load(Ordering::SeqCst);
            let book_ok = self.inner.current_symbol.read().is_none()
                || self.inner.order_book.read().is_ready();
            if account_ok && book_ok {
                return Ok(());
            }
            if Instant::now() > deadline {
                self.disconnect().await;
                return Err(EngineError::TransientNetwork(
                    "lighter stream did not come up before the connect deadline".to_string(),
                ));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn disconnect(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = self.inner.shutdown.lock().take() {
            let _ = tx.send(true);
        }
        let handles: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        self.inner.outbound.lock().take();
        self.inner.account_ready.store(false, Ordering::SeqCst);
        self.inner.order_book.write().reset();
        *self.inner.latest_bbo.write() = None;
        tracing::info!("lighter stream disconnected");
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    async fn ensure_market_feed(&self, symbol: &str) -> Result<(), EngineError> {
        {
            let current = self.inner.current_symbol.read().clone();
            if current.as_deref() == Some(symbol) && self.inner.order_book.read().is_ready() {
                return Ok(());
            }
        }

        self.inner.order_book.write().reset();
        *self.inner.current_symbol.write() = Some(symbol.to_string());

        // Handshake-auth venue: cycle the socket so the new market's
        // channel is subscribed on a fresh connection.
        if self.inner.running.load(Ordering::SeqCst) {
            self.inner.force_reconnect.notify_one();
        }

        let deadline = Instant::now() + FEED_SWITCH_DEADLINE + CONNECT_DEADLINE;
        loop {
            if self.inner.order_book.read().is_ready() {
                break;
            }
            if Instant::now() > deadline {
                return Err(EngineError::StaleOrderBook {
                    age_secs: FEED_SWITCH_DEADLINE.as_secs(),
                });
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let snapshot = self.inner.order_book.read().snapshot(20);
        let (bid_levels, ask_levels) = snapshot
            .map(|s| (s.bids.len(), s.asks.len()))
            .unwrap_or((0, 0));
        tracing::info!(
            symbol = %symbol,
            venue_symbol = %self.inner.client.venue_symbol(symbol),
            bid_levels,
            ask_levels,
            "lighter market feed switched"
        );
        Ok(())
    }

    fn current_symbol(&self) -> Option<String> {
        self.inner.current_symbol.read().clone()
    }

    fn subscribe_bbo(&self) -> BboSubscription {
        self.inner.bbo.subscribe()
    }

    fn unsubscribe_bbo(&self, id: SubscriptionId) {
        self.inner.bbo.unsubscribe(id);
    }

    fn latest_bbo(&self) -> Option<Bbo> {
        self.inner.latest_bbo.read().clone()
    }

    fn order_book_snapshot(&self, levels: usize) -> Option<OrderBookSnapshot> {
        self.inner.order_book.read().snapshot(levels)
    }

    fn subscribe_order_updates(&self) -> broadcast::Receiver<OrderUpdate> {
        self.inner.order_updates.subscribe()
    }

    fn subscribe_liquidations(&self) -> broadcast::Receiver<LiquidationEvent> {
        self.inner.liquidations.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn stream() -> LighterStream {
        let client = Arc::new(LighterClient::new(
            "https://mainnet.zklighter.elliot.ai".to_string(),
            "token".to_string(),
        ));
        LighterStream::new("wss://mainnet.zklighter.elliot.ai/stream".to_string(), client)
    }

    #[test]
    fn snapshot_then_delta_updates_book_and_bbo() {
        let s = stream();
        *s.inner.current_symbol.write() = Some("BTC".to_string());

        s.inner.handle_text(
            r#"{"type":"subscribed/order_book","channel":"order_book:3","offset":100,
               "order_book":{"bids":[{"price":"49990","size":"1"}],"asks":[{"price":"50010","size":"1"}]}}"#,
            Some("3"),
        );
        assert!(s.order_book_snapshot(5).is_some());
        assert_eq!(s.latest_bbo().unwrap().bid, dec!(49990));

        s.inner.handle_text(
            r#"{"type":"update/order_book","offset":101,
               "order_book":{"bids":[{"price":"49995","size":"2"}],"asks":[]}}"#,
            Some("3"),
        );
        let bbo = s.latest_bbo().unwrap();
        assert_eq!(bbo.bid, dec!(49995));
        assert_eq!(bbo.sequence, Some(101));
    }

    #[test]
    fn gap_marks_book_not_ready() {
        let s = stream();
        *s.inner.current_symbol.write() = Some("BTC".to_string());

        s.inner.handle_text(
            r#"{"type":"subscribed/order_book","offset":100,
               "order_book":{"bids":[{"price":"49990","size":"1"}],"asks":[{"price":"50010","size":"1"}]}}"#,
            Some("3"),
        );
        s.inner.handle_text(
            r#"{"type":"update/order_book","offset":105,
               "order_book":{"bids":[{"price":"49991","size":"1"}],"asks":[]}}"#,
            Some("3"),
        );
        assert!(s.order_book_snapshot(5).is_none());
    }

    #[test]
    fn liquidation_flagged_orders_synthesize_events() {
        let s = stream();
        *s.inner.current_symbol.write() = Some("BTC".to_string());
        let mut liq_rx = s.subscribe_liquidations();
        let mut ord_rx = s.subscribe_order_updates();

        s.inner.handle_text(
            r#"{"type":"update/account_orders","orders":[
                {"order_index":9,"side":"sell","status":"filled",
                 "filled_base_amount":"0.5","avg_fill_price":"48000","is_liquidation":true}]}"#,
            Some("3"),
        );

        let event = liq_rx.try_recv().unwrap();
        assert_eq!(event.quantity, dec!(0.5));
        assert_eq!(event.venue, "lighter");
        assert!(ord_rx.try_recv().unwrap().is_liquidation);
    }

    #[tokio::test]
    async fn disconnect_without_connect_is_a_noop() {
        let s = stream();
        s.disconnect().await;
        assert!(!s.is_running());
    }
}

//! Websocket stream manager for Aster.
//!
//! Two independent sockets: the private stream authorized by an expiring
//! listen key, and a combined public stream carrying book-ticker, partial
//! depth, and force-order channels for one focal symbol. Each socket runs
//! its own reconnect loop; a shared watchdog refreshes the listen key and
//! force-closes connections that stop receiving server pings.

use crate::client::AsterClient;
use crate::messages;
use async_trait::async_trait;
use chrono::Utc;
use funding_arb_connector::{
    BackoffPolicy, BboBroadcaster, BboSubscription, ListenKeyState, MarketStream,
    OrderBookSnapshot, OrderBookState, SubscriptionId,
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

/// Watchdog sweep interval.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(300);
/// Connection presumed dead after this long without a server ping.
const PING_DEADLINE: Duration = Duration::from_secs(600);
/// Staleness poll interval for the order book.
const STALENESS_POLL: Duration = Duration::from_secs(30);
/// How long `ensure_market_feed` waits for a snapshot on the new symbol.
const FEED_SWITCH_DEADLINE: Duration = Duration::from_secs(5);
/// How long `connect` waits for both streams to come up.
const CONNECT_DEADLINE: Duration = Duration::from_secs(15);
/// Consecutive listen-key failures tolerated before the private loop quits.
const MAX_AUTH_FAILURES: u32 = 5;

struct Inner {
    ws_url: String,
    client: Arc<AsterClient>,
    running: AtomicBool,
    private_ready: AtomicBool,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Focal symbol, normalized form.
    current_symbol: RwLock<Option<String>>,
    order_book: RwLock<OrderBookState>,
    latest_bbo: RwLock<Option<Bbo>>,
    bbo: BboBroadcaster,
    order_updates: broadcast::Sender<OrderUpdate>,
    liquidations: broadcast::Sender<LiquidationEvent>,
    /// Write handle into the live public socket. Replaced on every
    /// reconnect BEFORE re-subscribe frames are sent so callers never write
    /// into a closing transport.
    public_outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    listen_key: Mutex<ListenKeyState>,
    last_server_ping: RwLock<Instant>,
    force_private_reconnect: Notify,
    force_public_reconnect: Notify,
}

/// Aster market-stream manager.
pub struct AsterStream {
    inner: Arc<Inner>,
}

impl AsterStream {
    #[must_use]
    pub fn new(ws_url: String, client: Arc<AsterClient>) -> Self {
        let (order_updates, _) = broadcast::channel(256);
        let (liquidations, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                ws_url,
                client,
                running: AtomicBool::new(false),
                private_ready: AtomicBool::new(false),
                shutdown: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
                current_symbol: RwLock::new(None),
                order_book: RwLock::new(OrderBookState::new()),
                latest_bbo: RwLock::new(None),
                bbo: BboBroadcaster::default(),
                order_updates,
                liquidations,
                public_outbound: Mutex::new(None),
                listen_key: Mutex::new(ListenKeyState::default()),
                last_server_ping: RwLock::new(Instant::now()),
                force_private_reconnect: Notify::new(),
                force_public_reconnect: Notify::new(),
            }),
        }
    }
}

impl Inner {
    fn stream_names(&self, symbol: &str) -> Vec<String> {
        let venue_symbol = self.client.venue_symbol(symbol).to_ascii_lowercase();
        vec![
            format!("{venue_symbol}@bookTicker"),
            format!("{venue_symbol}@depth20@100ms"),
            format!("{venue_symbol}@forceOrder"),
        ]
    }

    fn subscribe_frame(method: &str, params: &[String], id: u64) -> Message {
        Message::Text(json!({ "method": method, "params": params, "id": id }).to_string())
    }

    fn handle_public_text(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "unparseable public message");
                return;
            }
        };
        let data = messages::unwrap_combined(&value);

        let focal_venue_symbol = self
            .current_symbol
            .read()
            .as_deref()
            .map(|s| self.client.venue_symbol(s));

        match messages::event_type(data) {
            Some("bookTicker") => {
                if let Some(quote) = messages::parse_book_ticker(data) {
                    // Every quote fans out to subscribers; the cached BBO
                    // tracks the focal symbol only.
                    if focal_venue_symbol
                        .as_deref()
                        .is_some_and(|s| s.eq_ignore_ascii_case(&quote.symbol))
                    {
                        *self.latest_bbo.write() = Some(quote.clone());
                    }
                    self.bbo.publish(&quote);
                }
            }
            Some("depthUpdate") => {
                if let Some(depth) = messages::parse_depth(data) {
                    // Depth for a previously-subscribed symbol can trail in
                    // around a feed switch; it must not repopulate the book.
                    let focal = focal_venue_symbol
                        .as_deref()
                        .is_some_and(|s| s.eq_ignore_ascii_case(&depth.symbol));
                    if focal {
                        self.order_book.write().apply_snapshot(
                            depth.bids,
                            depth.asks,
                            depth.sequence,
                            Utc::now(),
                        );
                    }
                }
            }
            Some("forceOrder") => {
                if let Some(event) = messages::parse_force_order(data) {
                    tracing::warn!(
                        symbol = %event.symbol,
                        side = %event.side,
                        quantity = %event.quantity,
                        "force order on public stream"
                    );
                    let _ = self.liquidations.send(event);
                }
            }
            _ => {}
        }
    }

    fn handle_private_text(&self, text: &str) -> bool {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "unparseable private message");
                return true;
            }
        };

        if messages::is_listen_key_expired(&value) {
            tracing::warn!("listen key expired event received, rebuilding private stream");
            self.listen_key.lock().invalidate();
            return false;
        }

        if let Some(update) = messages::parse_order_update(&value) {
            if update.is_liquidation {
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
        true
    }
}

async fn public_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let mut backoff = BackoffPolicy::private();

    while !*shutdown.borrow() {
        let url = format!("{}/stream", inner.ws_url);
        match connect_async(&url).await {
            Ok((ws, _)) => {
                tracing::info!(url = %url, "aster public stream connected");
                backoff.reset();
                inner.order_book.write().reset();
                *inner.last_server_ping.write() = Instant::now();

                let (mut sink, mut stream) = ws.split();

                // Install the fresh write handle BEFORE subscribing so the
                // feed switcher never targets the old transport.
                let (tx, mut outbound) = mpsc::unbounded_channel::<Message>();
                *inner.public_outbound.lock() = Some(tx);

                let symbol = inner.current_symbol.read().clone();
                if let Some(symbol) = symbol {
                    let params = inner.stream_names(&symbol);
                    if sink
                        .send(Inner::subscribe_frame("SUBSCRIBE", &params, 1))
                        .await
                        .is_err()
                    {
                        continue;
                    }
                }

                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            let _ = sink.send(Message::Close(None)).await;
                            return;
                        }
                        () = inner.force_public_reconnect.notified() => {
                            tracing::warn!("forcing aster public stream reconnect");
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
                            Some(Ok(Message::Text(text))) => inner.handle_public_text(&text),
                            Some(Ok(Message::Ping(payload))) => {
                                *inner.last_server_ping.write() = Instant::now();
                                let _ = sink.send(Message::Pong(payload)).await;
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "aster public stream error");
                                break;
                            }
                        }
                    }
                }

                inner.public_outbound.lock().take();
                inner.order_book.write().reset();
            }
            Err(e) => {
                tracing::warn!(error = %e, "aster public stream connect failed");
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

async fn private_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let mut backoff = BackoffPolicy::private();
    let mut auth_failures = 0u32;

    while !*shutdown.borrow() {
        let key = {
            let cached = inner.listen_key.lock().key().map(str::to_string);
            match cached {
                Some(key) => key,
                None => match inner.client.create_listen_key().await {
                    Ok(key) => {
                        inner.listen_key.lock().set(key.clone(), Utc::now());
                        auth_failures = 0;
                        key
                    }
                    Err(e) => {
                        auth_failures += 1;
                        tracing::error!(
                            error = %e,
                            attempt = auth_failures,
                            "failed to obtain aster listen key"
                        );
                        if auth_failures >= MAX_AUTH_FAILURES {
                            tracing::error!(
                                "aster private stream authentication exhausted retries"
                            );
                            return;
                        }
                        let delay = backoff.next_delay();
                        tokio::select! {
                            () = tokio::time::sleep(delay) => continue,
                            _ = shutdown.changed() => return,
                        }
                    }
                },
            }
        };

        let url = format!("{}/ws/{}", inner.ws_url, key);
        match connect_async(&url).await {
            Ok((ws, _)) => {
                tracing::info!("aster private stream connected");
                backoff.reset();
                inner.private_ready.store(true, Ordering::SeqCst);
                *inner.last_server_ping.write() = Instant::now();

                let (mut sink, mut stream) = ws.split();
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            let _ = sink.send(Message::Close(None)).await;
                            inner.private_ready.store(false, Ordering::SeqCst);
                            return;
                        }
                        () = inner.force_private_reconnect.notified() => {
                            tracing::warn!("forcing aster private stream reconnect");
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                        incoming = stream.next() => match incoming {
                            Some(Ok(Message::Text(text))) => {
                                if !inner.handle_private_text(&text) {
                                    break;
                                }
                            }
                            Some(Ok(Message::Ping(payload))) => {
                                *inner.last_server_ping.write() = Instant::now();
                                let _ = sink.send(Message::Pong(payload)).await;
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "aster private stream error");
                                break;
                            }
                        }
                    }
                }
                inner.private_ready.store(false, Ordering::SeqCst);
            }
            Err(e) => {
                tracing::warn!(error = %e, "aster private stream connect failed");
                inner.listen_key.lock().invalidate();
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

async fn watchdog_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            () = tokio::time::sleep(WATCHDOG_INTERVAL) => {}
            _ = shutdown.changed() => return,
        }

        let ping_age = inner.last_server_ping.read().elapsed();
        if ping_age > PING_DEADLINE {
            tracing::warn!(
                ping_age_secs = ping_age.as_secs(),
                "no server ping inside deadline, presuming connections dead"
            );
            inner.force_public_reconnect.notify_one();
            inner.force_private_reconnect.notify_one();
            continue;
        }

        let needs_refresh = {
            let listen_key = inner.listen_key.lock();
            listen_key.key().is_some() && listen_key.needs_refresh(Utc::now())
        };
        if needs_refresh {
            match inner.client.keepalive_listen_key().await {
                Ok(()) => {
                    let key = inner.listen_key.lock().key().map(str::to_string);
                    if let Some(key) = key {
                        inner.listen_key.lock().set(key, Utc::now());
                    }
                    tracing::debug!("aster listen key refreshed");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "listen key refresh failed, rebuilding stream");
                    inner.listen_key.lock().invalidate();
                    inner.force_private_reconnect.notify_one();
                }
            }
        }
    }
}

async fn staleness_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            () = tokio::time::sleep(STALENESS_POLL) => {}
            _ = shutdown.changed() => return,
        }

        if inner.current_symbol.read().is_none() {
            continue;
        }

        let now = Utc::now();
        let (stale, needs_reconnect) = {
            let book = inner.order_book.read();
            (
                book.is_stale(now, DEFAULT_STALE_SECS),
                book.is_stale(now, DEFAULT_RECONNECT_SECS),
            )
        };

        if needs_reconnect {
            tracing::warn!("order book past reconnect threshold, forcing reconnect");
            inner.force_public_reconnect.notify_one();
        } else if stale {
            // Partial-depth feed: a re-subscribe produces a fresh snapshot.
            tracing::warn!("order book stale, re-requesting depth snapshot");
            let symbol = inner.current_symbol.read().clone();
            let outbound = inner.public_outbound.lock().clone();
            if let (Some(symbol), Some(tx)) = (symbol, outbound) {
                let params = inner.stream_names(&symbol);
                let _ = tx.send(Inner::subscribe_frame("SUBSCRIBE", &params, 99));
            }
        }
    }
}

#[async_trait]
impl MarketStream for AsterStream {
    async fn connect(&self) -> Result<(), EngineError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let (tx, rx) = watch::channel(false);
        *self.inner.shutdown.lock() = Some(tx);

        {
            let mut tasks = self.inner.tasks.lock();
            tasks.push(tokio::spawn(private_loop(Arc::clone(&self.inner), rx.clone())));
            tasks.push(tokio::spawn(public_loop(Arc::clone(&self.inner), rx.clone())));
            tasks.push(tokio::spawn(watchdog_loop(Arc::clone(&self.inner), rx.clone())));
            tasks.push(tokio::spawn(staleness_loop(Arc::clone(&self.inner), rx)));
        }

        let deadline = Instant::now() + CONNECT_DEADLINE;
        loop {
            let private_ok = self.inner.private_ready.load(Ordering::SeqCst);
            let public_ok = self.inner.current_symbol.read().is_none()
                || self.inner.order_book.read().is_ready();
            if private_ok && public_ok {
                return Ok(());
            }
            if Instant::now() > deadline {
                self.disconnect().await;
                return Err(EngineError::TransientNetwork(
                    "aster streams did not come up before the connect deadline".to_string(),
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
        self.inner.public_outbound.lock().take();
        self.inner.private_ready.store(false, Ordering::SeqCst);
        self.inner.order_book.write().reset();
        *self.inner.latest_bbo.write() = None;
        tracing::info!("aster streams disconnected");
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    async fn ensure_market_feed(&self, symbol: &str) -> Result<(), EngineError> {
        // Validate: already on this symbol with a live feed.
        {
            let current = self.inner.current_symbol.read().clone();
            if current.as_deref() == Some(symbol)
                && self.inner.order_book.read().is_ready()
                && self.inner.public_outbound.lock().is_some()
            {
                return Ok(());
            }
        }

        // Clear.
        self.inner.order_book.write().reset();
        let previous = self.inner.current_symbol.write().replace(symbol.to_string());

        // Switch: unsubscribe the prior symbol, subscribe the new one, each
        // as a single batch on the live socket.
        let outbound = self.inner.public_outbound.lock().clone();
        if let Some(tx) = outbound {
            if let Some(previous) = previous.filter(|p| p != symbol) {
                let params = self.inner.stream_names(&previous);
                let _ = tx.send(Inner::subscribe_frame("UNSUBSCRIBE", &params, 2));
            }
            let params = self.inner.stream_names(symbol);
            let _ = tx.send(Inner::subscribe_frame("SUBSCRIBE", &params, 3));
        }

        // Wait for the first snapshot on the new symbol.
        let deadline = Instant::now() + FEED_SWITCH_DEADLINE;
        loop {
            if self.inner.order_book.read().is_ready() {
                break;
            }
            if Instant::now() > deadline {
                return Err(EngineError::StaleOrderBook { age_secs: FEED_SWITCH_DEADLINE.as_secs() });
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
            "aster market feed switched"
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

    fn stream() -> AsterStream {
        let client = Arc::new(AsterClient::new(
            "https://fapi.asterdex.com".to_string(),
            "key".to_string(),
            "secret".to_string(),
        ));
        AsterStream::new("wss://fstream.asterdex.com".to_string(), client)
    }

    #[test]
    fn stream_names_cover_all_channels() {
        let s = stream();
        let names = s.inner.stream_names("BTC");
        assert_eq!(
            names,
            vec![
                "btcusdt@bookTicker".to_string(),
                "btcusdt@depth20@100ms".to_string(),
                "btcusdt@forceOrder".to_string(),
            ]
        );
    }

    #[test]
    fn public_text_updates_bbo_and_book() {
        let s = stream();
        *s.inner.current_symbol.write() = Some("BTC".to_string());
        s.inner.handle_public_text(
            r#"{"stream":"btcusdt@bookTicker","data":{"e":"bookTicker","s":"BTCUSDT","b":"49990","a":"50010","u":5}}"#,
        );
        let bbo = s.latest_bbo().unwrap();
        assert_eq!(bbo.bid, dec!(49990));

        s.inner.handle_public_text(
            r#"{"stream":"btcusdt@depth20@100ms","data":{"e":"depthUpdate","s":"BTCUSDT","u":6,"b":[["49990","1"]],"a":[["50010","2"]]}}"#,
        );
        let book = s.order_book_snapshot(5).unwrap();
        assert_eq!(book.bids[0].price, dec!(49990));
        assert_eq!(book.asks[0].size, dec!(2));
    }

    #[test]
    fn depth_for_another_symbol_is_ignored() {
        let s = stream();
        *s.inner.current_symbol.write() = Some("ETH".to_string());
        s.inner.handle_public_text(
            r#"{"stream":"btcusdt@depth20@100ms","data":{"e":"depthUpdate","s":"BTCUSDT","u":6,"b":[["49990","1"]],"a":[["50010","2"]]}}"#,
        );
        assert!(s.order_book_snapshot(5).is_none());
        assert!(s.latest_bbo().is_none());
    }

    #[test]
    fn garbage_messages_are_ignored() {
        let s = stream();
        *s.inner.current_symbol.write() = Some("BTC".to_string());
        s.inner.handle_public_text("not json at all");
        s.inner.handle_public_text(r#"{"result":null,"id":1}"#);
        assert!(s.latest_bbo().is_none());
        assert!(s.order_book_snapshot(5).is_none());
    }

    #[test]
    fn private_text_broadcasts_order_updates() {
        let s = stream();
        let mut rx = s.subscribe_order_updates();
        let keep_going = s.inner.handle_private_text(
            r#"{"e":"ORDER_TRADE_UPDATE","o":{"s":"BTCUSDT","i":42,"X":"FILLED","x":"TRADE","z":"0.02","ap":"49995","n":"0.05","N":"USDT"}}"#,
        );
        assert!(keep_going);
        let update = rx.try_recv().unwrap();
        assert_eq!(update.order_id, "42");
        assert_eq!(update.filled_quantity, dec!(0.02));
    }

    #[test]
    fn listen_key_expiry_breaks_private_loop() {
        let s = stream();
        s.inner.listen_key.lock().set("lk".to_string(), Utc::now());
        let keep_going = s.inner.handle_private_text(r#"{"e":"listenKeyExpired"}"#);
        assert!(!keep_going);
        assert!(s.inner.listen_key.lock().key().is_none());
    }

    #[tokio::test]
    async fn disconnect_without_connect_is_a_noop() {
        let s = stream();
        s.disconnect().await;
        assert!(!s.is_running());
    }

    #[test]
    fn bbo_subscription_lifecycle() {
        let s = stream();
        let sub = s.subscribe_bbo();
        s.inner.handle_public_text(
            r#"{"data":{"e":"bookTicker","s":"BTCUSDT","b":"1","a":"2"}}"#,
        );
        assert!(sub.try_recv().is_some());
        s.unsubscribe_bbo(sub.id());
        s.unsubscribe_bbo(sub.id());
    }
}

//! Bounded BBO fan-out.
//!
//! Each subscriber owns a fixed-capacity queue; when a slow consumer falls
//! behind, the oldest quote is evicted so the freshest one always survives.
//! Publishing never blocks the listener task.

use funding_arb_core::Bbo;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Default per-subscriber queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Opaque subscriber handle; unsubscribing twice is safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug)]
struct SubQueue {
    buf: Mutex<VecDeque<Bbo>>,
    notify: Notify,
    capacity: usize,
}

impl SubQueue {
    fn push(&self, bbo: Bbo) {
        let mut buf = self.buf.lock();
        if buf.len() == self.capacity {
            // Prefer freshness over completeness.
            buf.pop_front();
        }
        buf.push_back(bbo);
        drop(buf);
        self.notify.notify_one();
    }
}

/// Receiving half of one subscription.
#[derive(Debug)]
pub struct BboSubscription {
    id: SubscriptionId,
    queue: Arc<SubQueue>,
}

impl BboSubscription {
    /// Returns the handle used to unsubscribe.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Awaits the next quote.
    pub async fn recv(&self) -> Bbo {
        loop {
            if let Some(bbo) = self.try_recv() {
                return bbo;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Pops the next quote without waiting.
    #[must_use]
    pub fn try_recv(&self) -> Option<Bbo> {
        self.queue.buf.lock().pop_front()
    }

    /// Number of quotes currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.buf.lock().len()
    }

    /// True when no quotes are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.buf.lock().is_empty()
    }
}

/// Publishes BBO updates to all live subscriptions.
#[derive(Debug)]
pub struct BboBroadcaster {
    subscribers: Mutex<HashMap<SubscriptionId, Arc<SubQueue>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for BboBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl BboBroadcaster {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Registers a new subscriber with its own bounded queue.
    #[must_use]
    pub fn subscribe(&self) -> BboSubscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let queue = Arc::new(SubQueue {
            buf: Mutex::new(VecDeque::with_capacity(self.capacity)),
            notify: Notify::new(),
            capacity: self.capacity,
        });
        self.subscribers.lock().insert(id, Arc::clone(&queue));
        BboSubscription { id, queue }
    }

    /// Removes a subscriber; unknown or already-removed ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().remove(&id);
    }

    /// Publishes a quote to every live subscriber.
    pub fn publish(&self, bbo: &Bbo) {
        let subscribers = self.subscribers.lock();
        for queue in subscribers.values() {
            queue.push(bbo.clone());
        }
    }

    /// Current subscriber count.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn quote(seq: u64) -> Bbo {
        Bbo {
            symbol: "BTCUSDT".to_string(),
            bid: dec!(49990) + rust_decimal::Decimal::from(seq),
            ask: dec!(50010) + rust_decimal::Decimal::from(seq),
            timestamp: Utc::now(),
            sequence: Some(seq),
        }
    }

    #[tokio::test]
    async fn delivers_in_order() {
        let broadcaster = BboBroadcaster::default();
        let sub = broadcaster.subscribe();

        broadcaster.publish(&quote(1));
        broadcaster.publish(&quote(2));

        assert_eq!(sub.recv().await.sequence, Some(1));
        assert_eq!(sub.recv().await.sequence, Some(2));
    }

    #[test]
    fn overflow_drops_oldest() {
        let broadcaster = BboBroadcaster::new(3);
        let sub = broadcaster.subscribe();

        for seq in 1..=5 {
            broadcaster.publish(&quote(seq));
        }

        assert_eq!(sub.len(), 3);
        assert_eq!(sub.try_recv().unwrap().sequence, Some(3));
        assert_eq!(sub.try_recv().unwrap().sequence, Some(4));
        assert_eq!(sub.try_recv().unwrap().sequence, Some(5));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let broadcaster = BboBroadcaster::default();
        let sub = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 1);

        broadcaster.unsubscribe(sub.id());
        broadcaster.unsubscribe(sub.id());
        assert_eq!(broadcaster.subscriber_count(), 0);

        // Publishing after unsubscribe reaches nobody and does not panic.
        broadcaster.publish(&quote(1));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn subscribers_are_independent() {
        let broadcaster = BboBroadcaster::default();
        let a = broadcaster.subscribe();
        let b = broadcaster.subscribe();

        broadcaster.publish(&quote(7));
        assert_eq!(a.try_recv().unwrap().sequence, Some(7));
        assert_eq!(b.try_recv().unwrap().sequence, Some(7));
        assert!(a.try_recv().is_none());
    }
}

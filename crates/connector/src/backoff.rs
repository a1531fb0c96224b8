//! Exponential reconnect backoff.

use std::time::Duration;

/// Doubling backoff with a per-stream cap.
///
/// Private and depth streams cap at 30 s; best-bid-offer streams at 60 s.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    initial: Duration,
    cap: Duration,
    current: Duration,
}

impl BackoffPolicy {
    /// Policy for private and depth streams (1 s doubling, 30 s cap).
    #[must_use]
    pub fn private() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }

    /// Policy for best-bid-offer streams (1 s doubling, 60 s cap).
    #[must_use]
    pub fn bbo() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }

    #[must_use]
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Self { initial, cap, current: initial }
    }

    /// Returns the delay to wait before the next attempt and advances.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.cap);
        delay
    }

    /// Resets to the initial delay after a successful connect.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Delay the next failure would wait, without advancing.
    #[must_use]
    pub fn peek(&self) -> Duration {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_cap() {
        let mut backoff = BackoffPolicy::private();
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn bbo_cap_is_higher() {
        let mut backoff = BackoffPolicy::bbo();
        for _ in 0..10 {
            backoff.next_delay();
        }
        assert_eq!(backoff.peek(), Duration::from_secs(60));
    }

    #[test]
    fn reset_restores_initial() {
        let mut backoff = BackoffPolicy::private();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }
}

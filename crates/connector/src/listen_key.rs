//! Listen-key lifecycle bookkeeping.
//!
//! Venues that authorize private streams through an expiring token issue it
//! over REST; the connector refreshes it well inside the venue TTL and
//! rebuilds the stream when the venue reports expiry anyway.

use chrono::{DateTime, Duration, Utc};

/// Default refresh cadence: every 50 minutes, inside the common 60-minute TTL.
pub const DEFAULT_REFRESH_MINUTES: i64 = 50;

/// Tracks the current listen key and when it needs refreshing.
#[derive(Debug, Clone)]
pub struct ListenKeyState {
    key: Option<String>,
    obtained_at: Option<DateTime<Utc>>,
    refresh_after: Duration,
}

impl Default for ListenKeyState {
    fn default() -> Self {
        Self::new(Duration::minutes(DEFAULT_REFRESH_MINUTES))
    }
}

impl ListenKeyState {
    #[must_use]
    pub fn new(refresh_after: Duration) -> Self {
        Self { key: None, obtained_at: None, refresh_after }
    }

    /// Stores a freshly issued key.
    pub fn set(&mut self, key: String, now: DateTime<Utc>) {
        self.key = Some(key);
        self.obtained_at = Some(now);
    }

    /// Drops the key, e.g. after a `listenKeyExpired` event.
    pub fn invalidate(&mut self) {
        self.key = None;
        self.obtained_at = None;
    }

    /// The current key, if one is held.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// True when no key is held or the refresh window has been reached.
    #[must_use]
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.obtained_at {
            Some(obtained) => now - obtained >= self.refresh_after,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_needs_refresh() {
        let state = ListenKeyState::default();
        assert!(state.key().is_none());
        assert!(state.needs_refresh(Utc::now()));
    }

    #[test]
    fn refresh_window_honored() {
        let mut state = ListenKeyState::default();
        let issued = Utc::now();
        state.set("lk-abc".to_string(), issued);

        assert_eq!(state.key(), Some("lk-abc"));
        assert!(!state.needs_refresh(issued + Duration::minutes(49)));
        assert!(state.needs_refresh(issued + Duration::minutes(50)));
    }

    #[test]
    fn invalidate_forces_refresh() {
        let mut state = ListenKeyState::default();
        state.set("lk-abc".to_string(), Utc::now());
        state.invalidate();
        assert!(state.key().is_none());
        assert!(state.needs_refresh(Utc::now()));
    }
}

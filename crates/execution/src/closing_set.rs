//! The shared closing set.
//!
//! A separately-owned value handed to both the risk controller's closer and
//! the profit monitor. Whoever wins `begin_close` owns the close; the other
//! observes membership and stands down. The guard removes the id on drop,
//! so an aborted close frees the position again.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Positions currently being closed.
#[derive(Debug, Default)]
pub struct ClosingSet {
    inner: Mutex<HashSet<Uuid>>,
}

impl ClosingSet {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// True while some component is closing the position.
    #[must_use]
    pub fn contains(&self, id: Uuid) -> bool {
        self.inner.lock().contains(&id)
    }

    /// Claims the close of a position. Returns `None` when another
    /// component already holds it.
    #[must_use]
    pub fn begin_close(self: &Arc<Self>, id: Uuid) -> Option<ClosingGuard> {
        if self.inner.lock().insert(id) {
            Some(ClosingGuard { set: Arc::clone(self), id })
        } else {
            None
        }
    }

    fn release(&self, id: Uuid) {
        self.inner.lock().remove(&id);
    }

    /// Number of closes in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True when no closes are in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// RAII claim on one position's close.
#[derive(Debug)]
pub struct ClosingGuard {
    set: Arc<ClosingSet>,
    id: Uuid,
}

impl ClosingGuard {
    #[must_use]
    pub fn position_id(&self) -> Uuid {
        self.id
    }
}

impl Drop for ClosingGuard {
    fn drop(&mut self) {
        self.set.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_is_refused() {
        let set = ClosingSet::new();
        let id = Uuid::new_v4();

        let guard = set.begin_close(id).unwrap();
        assert!(set.contains(id));
        assert!(set.begin_close(id).is_none());
        drop(guard);

        // Released on drop: a new claim succeeds.
        assert!(!set.contains(id));
        assert!(set.begin_close(id).is_some());
    }

    #[test]
    fn independent_positions_do_not_interfere() {
        let set = ClosingSet::new();
        let a = set.begin_close(Uuid::new_v4()).unwrap();
        let b = set.begin_close(Uuid::new_v4()).unwrap();
        assert_eq!(set.len(), 2);
        drop(a);
        assert_eq!(set.len(), 1);
        assert!(set.contains(b.position_id()));
    }
}

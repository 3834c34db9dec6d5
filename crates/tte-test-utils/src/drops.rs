//! Drop recorders.
//!
//! - [`DropLog`] records the id of every [`Tracked`] value as it drops, so
//!   tests can assert destructor order.
//! - [`DropCounter`] only counts drops of its [`CountedDrop`] tokens.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Shared, ordered record of dropped ids.
#[derive(Clone, Debug, Default)]
pub struct DropLog {
    order: Arc<Mutex<Vec<u32>>>,
}

impl DropLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a value that appends `id` to this log when dropped.
    pub fn tracked(&self, id: u32) -> Tracked {
        Tracked {
            id,
            log: self.clone(),
        }
    }

    /// Ids in the order they were dropped.
    pub fn order(&self) -> Vec<u32> {
        self.order.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.order.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.lock().is_empty()
    }
}

/// A value that records its id in a [`DropLog`] on drop.
#[derive(Debug)]
pub struct Tracked {
    pub id: u32,
    log: DropLog,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.log.order.lock().push(self.id);
    }
}

/// Shared drop count.
#[derive(Clone, Debug, Default)]
pub struct DropCounter {
    count: Arc<AtomicUsize>,
}

impl DropCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a token that bumps this counter when dropped.
    pub fn token(&self) -> CountedDrop {
        CountedDrop {
            count: Arc::clone(&self.count),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

/// Token that increments its [`DropCounter`] once on drop.
#[derive(Debug)]
pub struct CountedDrop {
    count: Arc<AtomicUsize>,
}

impl Clone for CountedDrop {
    fn clone(&self) -> Self {
        Self {
            count: Arc::clone(&self.count),
        }
    }
}

impl Drop for CountedDrop {
    fn drop(&mut self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_records_drop_order() {
        let log = DropLog::new();
        let a = log.tracked(1);
        let b = log.tracked(2);
        drop(b);
        drop(a);
        assert_eq!(log.order(), vec![2, 1]);
    }

    #[test]
    fn counter_counts_clones_independently() {
        let counter = DropCounter::new();
        let token = counter.token();
        let copy = token.clone();
        drop(token);
        assert_eq!(counter.count(), 1);
        drop(copy);
        assert_eq!(counter.count(), 2);
    }
}

//! Cumulative scheduler counters.
//!
//! [`SchedulerMetrics`] is a plain snapshot; the live counters are atomics
//! updated by posting threads and workers without taking any lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of scheduler activity since construction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchedulerMetrics {
    /// Jobs accepted by `post`, `post_all`, or an `enqueue_*` call.
    pub jobs_posted: u64,
    /// Jobs whose function returned `Ok`.
    pub jobs_completed: u64,
    /// Jobs whose function returned `Fail` (panics included).
    pub jobs_failed: u64,
    /// Jobs that ended `Cancelled` without running.
    pub jobs_cancelled: u64,
    /// Job functions that panicked.
    pub jobs_panicked: u64,
    /// Continuations pushed into the pending queue when a parent retired.
    pub continuations_dispatched: u64,
    /// Continuations run directly on the parent's worker thread.
    pub continuations_inline: u64,
    /// Highest number of counter slots in use at once.
    pub peak_live_counters: u64,
}

#[derive(Debug, Default)]
pub(crate) struct MetricCounters {
    pub(crate) posted: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) cancelled: AtomicU64,
    pub(crate) panicked: AtomicU64,
    pub(crate) dispatched: AtomicU64,
    pub(crate) inline: AtomicU64,
}

impl MetricCounters {
    pub(crate) fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, peak_live_counters: usize) -> SchedulerMetrics {
        SchedulerMetrics {
            jobs_posted: self.posted.load(Ordering::Relaxed),
            jobs_completed: self.completed.load(Ordering::Relaxed),
            jobs_failed: self.failed.load(Ordering::Relaxed),
            jobs_cancelled: self.cancelled.load(Ordering::Relaxed),
            jobs_panicked: self.panicked.load(Ordering::Relaxed),
            continuations_dispatched: self.dispatched.load(Ordering::Relaxed),
            continuations_inline: self.inline.load(Ordering::Relaxed),
            peak_live_counters: peak_live_counters as u64,
        }
    }
}

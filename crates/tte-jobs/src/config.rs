//! Scheduler configuration and construction errors.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use tte_heap::{HeapConfig, HeapError};

// ── SchedulerConfig ────────────────────────────────────────────────

/// Configuration for a [`JobScheduler`](crate::JobScheduler).
///
/// Validated by [`JobScheduler::new`](crate::JobScheduler::new); immutable
/// afterwards.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Number of worker threads. `None` selects
    /// [`DEFAULT_WORKER_COUNT`](Self::DEFAULT_WORKER_COUNT). Explicit values
    /// are clamped to `[1, MAX_WORKERS]`.
    pub worker_count: Option<usize>,
    /// Size of the fixed counter pool: the most jobs that may be in flight
    /// or held by a handle at once.
    pub counter_capacity: usize,
    /// Prefix for worker thread names; threads are named `{prefix}-{index}`.
    pub thread_name_prefix: String,
    /// Page size of each worker's scratch heap.
    pub scratch_page_size: u32,
    /// How long an idle worker sleeps before re-checking the queue and its
    /// exit flags.
    pub idle_wait: Duration,
}

impl SchedulerConfig {
    /// Default worker pool size.
    pub const DEFAULT_WORKER_COUNT: usize = 8;
    /// Upper clamp for `worker_count`.
    pub const MAX_WORKERS: usize = 64;
    /// Default counter pool size.
    pub const DEFAULT_COUNTER_CAPACITY: usize = 4096;
    /// Upper bound for `counter_capacity`.
    pub const MAX_COUNTER_CAPACITY: usize = 1 << 20;
    /// Default scratch heap page size: 64 KiB.
    pub const DEFAULT_SCRATCH_PAGE_SIZE: u32 = 64 * 1024;
    /// Default idle re-check interval.
    pub const DEFAULT_IDLE_WAIT: Duration = Duration::from_millis(30);

    /// Config with `workers` worker threads and defaults elsewhere.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            worker_count: Some(workers),
            ..Self::default()
        }
    }

    /// Worker thread count after applying the default and clamping.
    pub fn resolved_worker_count(&self) -> usize {
        match self.worker_count {
            Some(n) => n.clamp(1, Self::MAX_WORKERS),
            None => Self::DEFAULT_WORKER_COUNT,
        }
    }

    /// Check every field for values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == Some(0) {
            return Err(ConfigError::InvalidWorkerCount { configured: 0 });
        }
        if self.counter_capacity == 0 || self.counter_capacity > Self::MAX_COUNTER_CAPACITY {
            return Err(ConfigError::InvalidCounterCapacity {
                configured: self.counter_capacity,
            });
        }
        if self.idle_wait.is_zero() {
            return Err(ConfigError::InvalidIdleWait);
        }
        HeapConfig::new(self.scratch_page_size).validate()?;
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: None,
            counter_capacity: Self::DEFAULT_COUNTER_CAPACITY,
            thread_name_prefix: "tte-worker".into(),
            scratch_page_size: Self::DEFAULT_SCRATCH_PAGE_SIZE,
            idle_wait: Self::DEFAULT_IDLE_WAIT,
        }
    }
}

// ── ConfigError ────────────────────────────────────────────────────

/// Errors detected while building a scheduler.
#[derive(Debug, PartialEq)]
pub enum ConfigError {
    /// `worker_count` was explicitly zero.
    InvalidWorkerCount {
        /// The configured value.
        configured: usize,
    },
    /// `counter_capacity` is zero or above the maximum.
    InvalidCounterCapacity {
        /// The configured value.
        configured: usize,
    },
    /// `idle_wait` is zero.
    InvalidIdleWait,
    /// The scratch heap configuration is invalid.
    Heap(HeapError),
    /// A worker thread could not be spawned.
    ThreadSpawn {
        /// Description of the OS failure.
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidWorkerCount { configured } => {
                write!(f, "worker_count must be at least 1, got {configured}")
            }
            Self::InvalidCounterCapacity { configured } => write!(
                f,
                "counter_capacity must be in 1..={}, got {configured}",
                SchedulerConfig::MAX_COUNTER_CAPACITY
            ),
            Self::InvalidIdleWait => write!(f, "idle_wait must be non-zero"),
            Self::Heap(e) => write!(f, "scratch heap: {e}"),
            Self::ThreadSpawn { reason } => write!(f, "failed to spawn worker thread: {reason}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Heap(e) => Some(e),
            _ => None,
        }
    }
}

impl From<HeapError> for ConfigError {
    fn from(e: HeapError) -> Self {
        Self::Heap(e)
    }
}

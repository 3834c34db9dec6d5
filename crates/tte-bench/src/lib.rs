//! Benchmark profiles and utilities for the TTE runtime.
//!
//! Provides deterministic workloads shared by the benches and examples:
//!
//! - [`frame_profile`]: a seeded mix of allocation requests shaped like one
//!   UI frame (many small records, a few large buffers)
//! - [`priority_mix`]: a seeded spread of job priorities, mostly `Normal`
//! - [`bench_scheduler_config`]: scheduler settings used by the benches

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tte_heap::MAX_ALIGN;
use tte_jobs::{JobPriority, SchedulerConfig};

/// One allocation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocRequest {
    /// Bytes requested.
    pub size: usize,
    /// Requested alignment, a power of two no larger than [`MAX_ALIGN`].
    pub align: usize,
}

/// Build `count` allocation requests for one simulated frame.
///
/// Roughly 90% are small (8..256 bytes), the rest are buffers of 1..64 KiB.
/// The same seed always produces the same sequence.
pub fn frame_profile(seed: u64, count: usize) -> Vec<AllocRequest> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let roll = rng.next_u32();
            let size = if roll % 10 == 0 {
                1024 + (rng.next_u32() as usize % (63 * 1024))
            } else {
                8 + (rng.next_u32() as usize % 248)
            };
            let align = 1 << (rng.next_u32() % (MAX_ALIGN.trailing_zeros() + 1));
            AllocRequest { size, align }
        })
        .collect()
}

/// Build `count` job priorities: 70% `Normal`, then decreasing shares of
/// `High`, `VeryHigh` and `Highest`.
pub fn priority_mix(seed: u64, count: usize) -> Vec<JobPriority> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| match rng.next_u32() % 100 {
            0..70 => JobPriority::Normal,
            70..88 => JobPriority::High,
            88..97 => JobPriority::VeryHigh,
            _ => JobPriority::Highest,
        })
        .collect()
}

/// Scheduler settings for benches: `workers` threads, a counter pool large
/// enough for the biggest batch, and short idle waits.
pub fn bench_scheduler_config(workers: usize) -> SchedulerConfig {
    SchedulerConfig {
        worker_count: Some(workers),
        counter_capacity: 16 * 1024,
        thread_name_prefix: "tte-bench".into(),
        ..SchedulerConfig::default()
    }
}

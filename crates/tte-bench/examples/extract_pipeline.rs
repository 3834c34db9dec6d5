//! Archive extraction pipeline example.
//!
//! Demonstrates: build a scheduler → post decode jobs (manifest first, at
//! the highest priority) → chain an index job after each decode → fan out
//! a verify pass after the manifest → wait → print metrics.
//!
//! Set `TTE_LOG` (or `RUST_LOG`) to e.g. `tte_jobs=trace` to watch the
//! scheduler work.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};
use tte_bench::{bench_scheduler_config, frame_profile};
use tte_heap::LinearHeap;
use tte_jobs::{JobDescriptor, JobPriority, JobResult, JobScheduler, JobThread};

/// One packed entry: run-length pairs of (count, byte).
struct Entry {
    name: String,
    packed: Vec<u8>,
}

fn init_tracing() {
    let filter = std::env::var("TTE_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .init();
}

fn pack(seed: u64, len: usize) -> Vec<u8> {
    frame_profile(seed, len)
        .into_iter()
        .flat_map(|req| [(req.size % 16) as u8 + 1, (req.size % 251) as u8])
        .collect()
}

/// Unpack into the worker's scratch heap and return a checksum.
fn unpack(thread: &JobThread, packed: &[u8]) -> Option<u64> {
    if packed.len() % 2 != 0 {
        return None;
    }
    let total: usize = packed.chunks(2).map(|pair| pair[0] as usize).sum();
    let out = thread.scratch().new_array_no_destruct::<u8>(total);
    let mut cursor = 0;
    for pair in packed.chunks(2) {
        let run = pair[0] as usize;
        out[cursor..cursor + run].fill(pair[1]);
        cursor += run;
    }
    Some(out.iter().map(|&b| b as u64).sum())
}

fn main() {
    init_tracing();
    println!("=== TTE Extract Pipeline Example ===\n");

    let mut scheduler = JobScheduler::new(bench_scheduler_config(4)).unwrap();
    let entries: Vec<Arc<Entry>> = (0..48)
        .map(|i| {
            Arc::new(Entry {
                name: if i == 0 {
                    "manifest.toc".to_owned()
                } else {
                    format!("entry_{i:02}.bin")
                },
                packed: pack(i as u64, 64 + i * 8),
            })
        })
        .collect();

    let index: Arc<Mutex<Vec<(String, u64)>>> = Arc::new(Mutex::new(Vec::new()));
    let start = Instant::now();

    let mut decoded = Vec::new();
    let mut indexed = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        let priority = if i == 0 {
            JobPriority::Highest
        } else {
            JobPriority::Normal
        };
        let checksum = Arc::new(Mutex::new(None));
        let decode = {
            let entry = Arc::clone(entry);
            let checksum = Arc::clone(&checksum);
            scheduler.post(
                JobDescriptor::from_fn(move |thread, _| {
                    let sum = unpack(thread, &entry.packed);
                    *checksum.lock() = sum;
                    sum.is_some().into()
                })
                .with_priority(priority),
            )
        };
        let record = {
            let entry = Arc::clone(entry);
            let index = Arc::clone(&index);
            scheduler.enqueue_one(
                &decode,
                JobDescriptor::from_fn(move |_, previous| {
                    if previous != JobResult::Ok {
                        return JobResult::Cancelled;
                    }
                    let sum = checksum.lock().unwrap_or_default();
                    index.lock().push((entry.name.clone(), sum));
                    JobResult::Ok
                }),
            )
        };
        decoded.push(decode);
        indexed.push(record);
    }

    // Once the manifest is decoded, verify a handful of entries against it.
    let verify = scheduler.enqueue_all(
        &decoded[0],
        (0..8).map(|_| {
            JobDescriptor::from_fn(|thread, previous| {
                let mut scratch = LinearHeap::new(4096);
                scratch.scoped(|heap| {
                    let label = heap.intern_str(thread.name());
                    info!(worker = label, %previous, "verify pass");
                });
                previous
            })
        }),
    );

    let decode_result = scheduler.wait_all(&decoded);
    let index_result = scheduler.wait_all(&indexed);
    let verify_result = scheduler.wait_all(&verify);
    let elapsed = start.elapsed();

    let index = index.lock();
    println!("  decode: {decode_result}");
    println!("  index:  {index_result} ({} entries)", index.len());
    println!("  verify: {verify_result}");
    println!("  wall:   {:.2} ms", elapsed.as_secs_f64() * 1000.0);
    if let Some((name, sum)) = index.iter().find(|(name, _)| name == "manifest.toc") {
        println!("  {name}: checksum {sum}");
    }

    let metrics = scheduler.metrics();
    println!("\nScheduler metrics:");
    println!("  posted:     {}", metrics.jobs_posted);
    println!("  completed:  {}", metrics.jobs_completed);
    println!("  inline:     {}", metrics.continuations_inline);
    println!("  dispatched: {}", metrics.continuations_dispatched);
    println!("  peak slots: {}", metrics.peak_live_counters);

    let report = scheduler.shutdown(false);
    println!(
        "\nShutdown: {} workers joined in {} ms",
        report.workers_joined, report.total_ms
    );
}

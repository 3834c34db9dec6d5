//! Criterion micro-benchmarks for job posting, waiting, and chaining.

use std::hint::black_box;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use tte_bench::{bench_scheduler_config, priority_mix};
use tte_jobs::{JobDescriptor, JobResult, JobScheduler, JobThread, UserArg};

fn noop(_: &JobThread, _: JobResult, _: UserArg, _: UserArg) -> JobResult {
    JobResult::Ok
}

fn bench_post_wait_single(c: &mut Criterion) {
    let sched = JobScheduler::new(bench_scheduler_config(1)).unwrap();
    c.bench_function("jobs_post_wait_single", |b| {
        b.iter(|| {
            let handle = sched.post(JobDescriptor::new(noop, UserArg::NULL, UserArg::NULL));
            black_box(sched.wait(&handle));
        });
    });
}

fn bench_post_all_1k(c: &mut Criterion) {
    let sched = JobScheduler::new(bench_scheduler_config(4)).unwrap();
    c.bench_function("jobs_post_all_wait_all_1k", |b| {
        b.iter(|| {
            let handles = sched.post_all(
                (0..1000).map(|_| JobDescriptor::new(noop, UserArg::NULL, UserArg::NULL)),
            );
            black_box(sched.wait_all(&handles));
        });
    });
}

fn bench_priority_mix(c: &mut Criterion) {
    let sched = JobScheduler::new(bench_scheduler_config(4)).unwrap();
    let priorities = priority_mix(42, 1000);
    let done = Arc::new(AtomicUsize::new(0));
    c.bench_function("jobs_priority_mix_1k", |b| {
        b.iter(|| {
            let handles: Vec<_> = priorities
                .iter()
                .map(|&priority| {
                    let done = Arc::clone(&done);
                    sched.post(
                        JobDescriptor::from_fn(move |_, _| {
                            done.fetch_add(1, Ordering::Relaxed);
                            JobResult::Ok
                        })
                        .with_priority(priority),
                    )
                })
                .collect();
            black_box(sched.wait_all(&handles));
        });
    });
}

fn bench_chain_depth_64(c: &mut Criterion) {
    let sched = JobScheduler::new(bench_scheduler_config(2)).unwrap();
    c.bench_function("jobs_chain_depth_64", |b| {
        b.iter(|| {
            let mut tail = sched.post(JobDescriptor::new(noop, UserArg::NULL, UserArg::NULL));
            for _ in 0..63 {
                tail = sched.enqueue_one(
                    &tail,
                    JobDescriptor::new(noop, UserArg::NULL, UserArg::NULL),
                );
            }
            black_box(sched.wait(&tail));
        });
    });
}

fn bench_fan_out_after_parent(c: &mut Criterion) {
    let sched = JobScheduler::new(bench_scheduler_config(4)).unwrap();
    c.bench_function("jobs_fan_out_256", |b| {
        b.iter(|| {
            let parent = sched.post(JobDescriptor::new(noop, UserArg::NULL, UserArg::NULL));
            let children = sched.enqueue_all(
                &parent,
                (0..256).map(|_| JobDescriptor::new(noop, UserArg::NULL, UserArg::NULL)),
            );
            black_box(sched.wait_all(&children));
        });
    });
}

criterion_group!(
    benches,
    bench_post_wait_single,
    bench_post_all_1k,
    bench_priority_mix,
    bench_chain_depth_64,
    bench_fan_out_after_parent
);
criterion_main!(benches);

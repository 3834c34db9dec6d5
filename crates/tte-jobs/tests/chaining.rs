//! Continuations: result hand-off, enqueue timing, and cancellation cascades.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tte_jobs::{JobDescriptor, JobHandle, JobResult, JobScheduler, SchedulerConfig};
use tte_test_utils::{Gate, Latch};

const PATIENCE: Duration = Duration::from_secs(10);

fn scheduler(workers: usize) -> JobScheduler {
    JobScheduler::new(SchedulerConfig::with_workers(workers)).unwrap()
}

fn park_worker(sched: &JobScheduler, gate: &Gate) -> JobHandle {
    let started = Latch::new(1);
    let signal = started.clone();
    let gate = gate.clone();
    let handle = sched.post(JobDescriptor::from_fn(move |_, _| {
        signal.count_down();
        gate.wait();
        JobResult::Ok
    }));
    assert!(started.wait_timeout(PATIENCE), "worker never picked up the blocker");
    handle
}

/// A job that records the previous result it was given.
fn observer(seen: &Arc<Mutex<Vec<JobResult>>>) -> JobDescriptor {
    let seen = Arc::clone(seen);
    JobDescriptor::from_fn(move |_, previous| {
        seen.lock().push(previous);
        JobResult::Ok
    })
}

fn flag_job(ran: &Arc<AtomicBool>) -> JobDescriptor {
    let ran = Arc::clone(ran);
    JobDescriptor::from_fn(move |_, _| {
        ran.store(true, Ordering::SeqCst);
        JobResult::Ok
    })
}

#[test]
fn child_receives_failing_parent_result() {
    let sched = scheduler(2);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let gate = Gate::new();
    let parent = {
        let gate = gate.clone();
        sched.post(JobDescriptor::from_fn(move |_, _| {
            gate.wait();
            JobResult::Fail
        }))
    };
    let child = sched.enqueue_one(&parent, observer(&seen));
    assert!(child.is_valid());
    assert_eq!(sched.get_result(&child), JobResult::None);

    gate.open();
    assert_eq!(sched.wait(&child), JobResult::Ok);
    assert_eq!(sched.get_result(&parent), JobResult::Fail);
    assert_eq!(*seen.lock(), vec![JobResult::Fail]);
}

#[test]
fn chain_of_three_passes_results_down() {
    let sched = scheduler(2);
    let first = sched.post(JobDescriptor::from_fn(|_, prev| {
        assert_eq!(prev, JobResult::None);
        JobResult::Ok
    }));
    let second = sched.enqueue_one(
        &first,
        JobDescriptor::from_fn(|_, prev| {
            assert_eq!(prev, JobResult::Ok);
            JobResult::Fail
        }),
    );
    let third = sched.enqueue_one(
        &second,
        JobDescriptor::from_fn(|_, prev| (prev == JobResult::Fail).into()),
    );
    assert_eq!(sched.wait(&third), JobResult::Ok);
    assert_eq!(sched.get_result(&second), JobResult::Fail);
}

#[test]
fn enqueue_after_parent_finished_runs_with_its_result() {
    let sched = scheduler(1);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let parent = sched.post(JobDescriptor::from_fn(|_, _| JobResult::Fail));
    assert_eq!(sched.wait(&parent), JobResult::Fail);

    let child = sched.enqueue_one(&parent, observer(&seen));
    assert_eq!(sched.wait(&child), JobResult::Ok);
    assert_eq!(*seen.lock(), vec![JobResult::Fail]);
}

#[test]
fn invalid_parent_yields_nothing() {
    let sched = scheduler(1);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let orphan = sched.enqueue_one(&JobHandle::invalid(), observer(&seen));
    assert!(!orphan.is_valid());
    assert!(sched
        .enqueue_all(&JobHandle::default(), [observer(&seen), observer(&seen)])
        .is_empty());
    assert_eq!(sched.metrics().jobs_posted, 0);
}

#[test]
fn enqueue_all_fans_out_after_parent() {
    let sched = scheduler(4);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let gate = Gate::new();
    let parent = {
        let gate = gate.clone();
        sched.post(JobDescriptor::from_fn(move |_, _| {
            gate.wait();
            JobResult::Ok
        }))
    };
    let children = sched.enqueue_all(&parent, (0..6).map(|_| observer(&seen)));
    assert_eq!(children.len(), 6);
    assert!(seen.lock().is_empty());

    gate.open();
    assert_eq!(sched.wait_all(&children), JobResult::Ok);
    assert_eq!(*seen.lock(), vec![JobResult::Ok; 6]);

    let metrics = sched.metrics();
    assert_eq!(metrics.continuations_inline + metrics.continuations_dispatched, 6);
    assert_eq!(metrics.continuations_inline, 1);
}

#[test]
fn single_continuation_runs_inline_on_the_same_worker() {
    let sched = scheduler(4);
    let parent_worker = Arc::new(AtomicUsize::new(usize::MAX));
    let gate = Gate::new();
    let parent = {
        let parent_worker = Arc::clone(&parent_worker);
        let gate = gate.clone();
        sched.post(JobDescriptor::from_fn(move |thread, _| {
            parent_worker.store(thread.index(), Ordering::SeqCst);
            gate.wait();
            JobResult::Ok
        }))
    };
    let child = {
        let parent_worker = Arc::clone(&parent_worker);
        sched.enqueue_one(
            &parent,
            JobDescriptor::from_fn(move |thread, _| {
                (parent_worker.load(Ordering::SeqCst) == thread.index()).into()
            }),
        )
    };
    gate.open();
    assert_eq!(sched.wait(&child), JobResult::Ok);
    assert_eq!(sched.metrics().continuations_inline, 1);
}

#[test]
fn cancel_with_cascade_discards_the_whole_chain() {
    let sched = scheduler(1);
    let gate = Gate::new();
    let blocker = park_worker(&sched, &gate);

    let parent_ran = Arc::new(AtomicBool::new(false));
    let child_ran = Arc::new(AtomicBool::new(false));
    let grandchild_ran = Arc::new(AtomicBool::new(false));
    let parent = sched.post(flag_job(&parent_ran));
    let child = sched.enqueue_one(&parent, flag_job(&child_ran));
    let grandchild = sched.enqueue_one(&child, flag_job(&grandchild_ran));

    assert!(sched.cancel(&parent, true));
    assert_eq!(sched.wait(&parent), JobResult::Cancelled);
    assert_eq!(sched.wait(&child), JobResult::Cancelled);
    assert_eq!(sched.wait(&grandchild), JobResult::Cancelled);

    // A continuation added after the cascade is discarded as well.
    let late = sched.enqueue_one(&parent, JobDescriptor::from_fn(|_, _| JobResult::Ok));
    assert_eq!(sched.wait(&late), JobResult::Cancelled);

    gate.open();
    assert_eq!(sched.wait(&blocker), JobResult::Ok);
    assert!(!parent_ran.load(Ordering::SeqCst));
    assert!(!child_ran.load(Ordering::SeqCst));
    assert!(!grandchild_ran.load(Ordering::SeqCst));
    assert_eq!(sched.metrics().jobs_cancelled, 4);
}

#[test]
fn cancel_without_cascade_lets_children_clean_up() {
    let sched = scheduler(1);
    let gate = Gate::new();
    let blocker = park_worker(&sched, &gate);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let parent = sched.post(JobDescriptor::from_fn(|_, _| JobResult::Ok));
    let children = sched.enqueue_all(&parent, [observer(&seen), observer(&seen)]);

    assert!(sched.cancel(&parent, false));
    assert_eq!(sched.get_result(&parent), JobResult::Cancelled);

    // Enqueued after a non-cascading cancel: runs with the parent's result.
    let late = sched.enqueue_one(&parent, observer(&seen));

    gate.open();
    assert_eq!(sched.wait_all(&children), JobResult::Ok);
    assert_eq!(sched.wait(&late), JobResult::Ok);
    assert_eq!(sched.wait(&blocker), JobResult::Ok);
    assert_eq!(*seen.lock(), vec![JobResult::Cancelled; 3]);
}

#[test]
fn parked_continuation_can_be_cancelled_alone() {
    let sched = scheduler(1);
    let gate = Gate::new();
    let blocker = park_worker(&sched, &gate);

    let parent = sched.post(JobDescriptor::from_fn(|_, _| JobResult::Ok));
    let child_ran = Arc::new(AtomicBool::new(false));
    let child = sched.enqueue_one(&parent, flag_job(&child_ran));
    let sibling_seen = Arc::new(Mutex::new(Vec::new()));
    let sibling = sched.enqueue_one(&parent, observer(&sibling_seen));

    assert!(sched.cancel(&child, true));
    assert!(!sched.cancel(&child, true), "second cancel must report false");

    gate.open();
    assert_eq!(sched.wait(&parent), JobResult::Ok);
    assert_eq!(sched.wait(&sibling), JobResult::Ok);
    assert_eq!(sched.wait(&child), JobResult::Cancelled);
    assert_eq!(sched.wait(&blocker), JobResult::Ok);
    assert!(!child_ran.load(Ordering::SeqCst));
    assert_eq!(*sibling_seen.lock(), vec![JobResult::Ok]);
}

#[test]
fn continuation_handles_survive_parent_handle_drop() {
    let sched = scheduler(2);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let gate = Gate::new();
    let parent = {
        let gate = gate.clone();
        sched.post(JobDescriptor::from_fn(move |_, _| {
            gate.wait();
            JobResult::Fail
        }))
    };
    let child = sched.enqueue_one(&parent, observer(&seen));
    drop(parent);
    gate.open();
    assert_eq!(sched.wait(&child), JobResult::Ok);
    assert_eq!(*seen.lock(), vec![JobResult::Fail]);
}

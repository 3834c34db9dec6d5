//! Worker threads and the per-thread context handed to every job.

use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, warn};
use tte_heap::LinearHeap;

use crate::job::{Job, JobId, JobResult, Task};
use crate::metrics::MetricCounters;
use crate::scheduler::{SchedulerHandle, SchedulerId, Shared};

thread_local! {
    static CURRENT_WORKER: Cell<Option<(SchedulerId, usize)>> = const { Cell::new(None) };
}

/// The scheduler and worker index of the calling thread, if it is a worker.
pub(crate) fn current() -> Option<(SchedulerId, usize)> {
    CURRENT_WORKER.with(Cell::get)
}

// ── WorkerState ──────────────────────────────────────────────────

/// Per-worker control flags, padded to avoid false sharing.
#[repr(align(128))]
pub(crate) struct WorkerState {
    /// Cleared by a draining shutdown: exit once the queue is empty.
    alive: AtomicBool,
    /// Set by a killing shutdown: exit after the current job.
    force_exit: AtomicBool,
}

// Compile-time assertion: WorkerState must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<WorkerState>();
};

impl WorkerState {
    pub(crate) fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            force_exit: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn exit_requested(&self) -> bool {
        self.force_exit.load(Ordering::Acquire)
    }

    pub(crate) fn retire_when_idle(&self) {
        self.alive.store(false, Ordering::Release);
    }

    pub(crate) fn request_exit(&self) {
        self.alive.store(false, Ordering::Release);
        self.force_exit.store(true, Ordering::Release);
    }
}

// ── JobThread ────────────────────────────────────────────────────

/// The worker running a job, as seen from inside the job.
///
/// Gives access to a scratch [`LinearHeap`] that is rolled back after every
/// job, and to the scheduler for posting or chaining further work.
pub struct JobThread {
    index: usize,
    name: String,
    scratch: LinearHeap,
    scheduler: SchedulerHandle,
}

impl JobThread {
    /// Worker index in `0..worker_count`.
    pub fn index(&self) -> usize {
        self.index
    }

    /// OS thread name, `{prefix}-{index}`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Per-job scratch memory. Everything allocated here, and every
    /// destructor registered here, is released when the job returns.
    ///
    /// The heap is lent out shared, so a job cannot open nested contexts on
    /// it: the single rollback after the job is the only release point. A
    /// job that needs inner scopes builds its own [`LinearHeap`] and uses
    /// [`LinearHeap::scoped`].
    pub fn scratch(&self) -> &LinearHeap {
        &self.scratch
    }

    /// The scheduler this worker belongs to.
    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    /// Whether a killing shutdown has started. Long-running jobs may poll
    /// this and return early.
    pub fn is_exit_requested(&self) -> bool {
        self.shared().workers[self.index].exit_requested()
    }

    fn shared(&self) -> &Arc<Shared> {
        self.scheduler.shared()
    }

    /// Run `first`, then any continuation handed back for inline execution.
    fn run_chain(&mut self, first: Job) {
        let shared = Arc::clone(self.shared());
        let mut next = Some(first);
        while let Some(job) = next.take() {
            let Job {
                id,
                slot,
                previous,
                task,
                ..
            } = job;
            let result = self.run_task(id, task, previous, &shared.metrics);
            self.scratch.rollback();
            let dispatch = !shared.workers[self.index].exit_requested();
            next = shared.retire(self.index, id, slot, result, dispatch);
        }
    }

    fn run_task(
        &self,
        id: JobId,
        task: Task,
        previous: JobResult,
        metrics: &MetricCounters,
    ) -> JobResult {
        match panic::catch_unwind(AssertUnwindSafe(|| task.run(self, previous))) {
            Ok(result @ (JobResult::Ok | JobResult::Fail | JobResult::Cancelled)) => result,
            Ok(other) => {
                warn!(job_id = %id, result = %other, "job returned a non-final result, treated as failure");
                JobResult::Fail
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_owned())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".into());
                error!(job_id = %id, worker = self.index, panic = %message, "job panicked");
                MetricCounters::bump(&metrics.panicked, 1);
                JobResult::Fail
            }
        }
    }
}

impl fmt::Debug for JobThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobThread")
            .field("index", &self.index)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// ── Worker loop ──────────────────────────────────────────────────

pub(crate) fn run(shared: Arc<Shared>, index: usize, name: String, scratch_page_size: u32) {
    CURRENT_WORKER.with(|cell| cell.set(Some((shared.id, index))));
    let mut thread = JobThread {
        index,
        name,
        scratch: LinearHeap::new(scratch_page_size),
        scheduler: SchedulerHandle::from_shared(Arc::clone(&shared)),
    };
    debug!(worker = index, name = %thread.name, "job worker started");

    while let Some(job) = shared.next_job(index) {
        thread.run_chain(job);
    }

    debug!(worker = index, "job worker exiting");
    CURRENT_WORKER.with(|cell| cell.set(None));
}

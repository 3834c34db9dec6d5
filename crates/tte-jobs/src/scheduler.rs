//! The job scheduler: shared state, the cloneable [`SchedulerHandle`], and
//! the owning [`JobScheduler`] with its shutdown sequence.
//!
//! # Architecture
//!
//! ```text
//! Posting thread(s)                 Shared                    Workers (N)
//!     |                               |                           |
//!     |--post()/enqueue_one()-------->| counters.lock()           |
//!     |                               |   acquire slot            |
//!     |                               |   park on parent, or      |
//!     |                               |   queue.lock().push()     |
//!     |                               |   work_available.notify   |
//!     |                               |                           |
//!     |                               |      next_job() <---------|
//!     |                               |      run (catch_unwind)   |
//!     |                               |      scratch.rollback()   |
//!     |                               |<---- retire() ------------|
//!     |                               |   store result            |
//!     |                               |   dispatch continuations  |
//!     |<--wait() wakes on completed---|   completed.notify_all    |
//! ```
//!
//! Lock order is counters, then queue. Jobs removed while the counters lock
//! is held are collected and dropped after it is released, since a closure
//! may own `JobHandle`s whose destructors take that lock.

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace, warn};

use crate::config::{ConfigError, SchedulerConfig};
use crate::counter::CounterPool;
use crate::handle::JobHandle;
use crate::job::{Job, JobDescriptor, JobId, JobResult};
use crate::metrics::{MetricCounters, SchedulerMetrics};
use crate::queue::JobQueue;
use crate::worker::{self, WorkerState};

// ── SchedulerId ──────────────────────────────────────────────────

static SCHEDULER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one scheduler instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SchedulerId(u64);

impl SchedulerId {
    fn next() -> Self {
        Self(SCHEDULER_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SchedulerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Error types ──────────────────────────────────────────────────

/// Error posting a job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PostError {
    /// The scheduler has been shut down with `kill_awaiting`, or finished
    /// shutting down.
    ShutDown,
    /// Every counter slot is held by an in-flight job or a live handle.
    CounterPoolExhausted {
        /// The configured pool size.
        capacity: usize,
    },
}

impl fmt::Display for PostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShutDown => write!(f, "scheduler has shut down"),
            Self::CounterPoolExhausted { capacity } => {
                write!(f, "all {capacity} job counters are in use")
            }
        }
    }
}

impl Error for PostError {}

// ── ShutdownReport ───────────────────────────────────────────────

/// Report from [`JobScheduler::shutdown`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Total time spent in the shutdown sequence.
    pub total_ms: u64,
    /// Number of worker threads joined.
    pub workers_joined: usize,
    /// Workers left running unjoined. Non-zero only when `shutdown` is
    /// called from one of the scheduler's own jobs: that worker finishes
    /// the calling job and exits on its own.
    pub workers_detached: usize,
    /// Jobs that ended `Cancelled` because of the shutdown.
    pub jobs_cancelled: usize,
    /// Whether queued jobs were killed rather than drained.
    pub killed: bool,
}

// ── Shared ───────────────────────────────────────────────────────

pub(crate) struct Shared {
    pub(crate) id: SchedulerId,
    counters: Mutex<CounterPool>,
    completed: Condvar,
    queue: Mutex<JobQueue>,
    work_available: Condvar,
    pub(crate) workers: Vec<WorkerState>,
    next_id: AtomicU64,
    /// Flipped only while the counters lock is held.
    accepting: AtomicBool,
    pub(crate) metrics: MetricCounters,
    idle_wait: Duration,
}

impl Shared {
    fn new(config: &SchedulerConfig, workers: usize) -> Self {
        Self {
            id: SchedulerId::next(),
            counters: Mutex::new(CounterPool::new(config.counter_capacity)),
            completed: Condvar::new(),
            queue: Mutex::new(JobQueue::new(workers)),
            work_available: Condvar::new(),
            workers: (0..workers).map(|_| WorkerState::new()).collect(),
            next_id: AtomicU64::new(1),
            accepting: AtomicBool::new(true),
            metrics: MetricCounters::default(),
            idle_wait: config.idle_wait,
        }
    }

    // ── Handle bookkeeping ───────────────────────────────────────

    pub(crate) fn retain(&self, slot: u32, id: JobId) -> bool {
        self.counters.lock().add_ref(slot, id)
    }

    pub(crate) fn release(&self, slot: u32, id: JobId) {
        self.counters.lock().release_ref(slot, id);
    }

    // ── Posting ──────────────────────────────────────────────────

    /// Assign an id and a counter slot to `desc`.
    fn register(
        self: &Arc<Self>,
        counters: &mut CounterPool,
        desc: JobDescriptor,
    ) -> Result<(Job, JobHandle), PostError> {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let slot = counters
            .acquire(id)
            .ok_or(PostError::CounterPoolExhausted {
                capacity: counters.capacity(),
            })?;
        let mut job = Job::new(id, slot, desc, JobResult::None);
        if let Some(worker) = job.affinity {
            if worker >= self.workers.len() {
                warn!(
                    job_id = %id,
                    worker,
                    workers = self.workers.len(),
                    "affinity outside the worker pool, job left unpinned"
                );
                job.affinity = None;
            }
        }
        MetricCounters::bump(&self.metrics.posted, 1);
        Ok((job, JobHandle::adopt(id, slot, self)))
    }

    fn try_post_all(
        self: &Arc<Self>,
        descs: impl IntoIterator<Item = JobDescriptor>,
    ) -> Result<Vec<JobHandle>, PostError> {
        // Descriptors may own handles, so they must outlive the guard.
        let descs: Vec<JobDescriptor> = descs.into_iter().collect();
        let mut counters = self.counters.lock();
        if !self.accepting.load(Ordering::Acquire) {
            return Err(PostError::ShutDown);
        }
        if counters.free() < descs.len() {
            return Err(PostError::CounterPoolExhausted {
                capacity: counters.capacity(),
            });
        }
        let mut jobs = Vec::with_capacity(descs.len());
        let mut handles = Vec::with_capacity(descs.len());
        for desc in descs {
            match self.register(&mut counters, desc) {
                Ok((job, handle)) => {
                    jobs.push(job);
                    handles.push(handle);
                }
                Err(e) => {
                    // Nothing from this batch was queued. The handles free
                    // the slots once they drop, after the lock is released.
                    for job in &jobs {
                        counters.release_scheduler(job.slot);
                    }
                    drop(counters);
                    drop(handles);
                    drop(jobs);
                    return Err(e);
                }
            }
        }
        self.push_jobs(jobs);
        Ok(handles)
    }

    /// Chain every descriptor after `parent` under one counters lock.
    /// Either the whole batch is chained or nothing is.
    fn try_enqueue_all(
        self: &Arc<Self>,
        parent: &JobHandle,
        descs: impl IntoIterator<Item = JobDescriptor>,
    ) -> Result<Vec<JobHandle>, PostError> {
        if !parent.belongs_to(self) {
            return Ok(Vec::new());
        }
        // Descriptors may own handles, so they must outlive the guard.
        let descs: Vec<JobDescriptor> = descs.into_iter().collect();
        let mut graveyard = Vec::new();
        let handles = {
            let mut counters = self.counters.lock();
            if !self.accepting.load(Ordering::Acquire) {
                return Err(PostError::ShutDown);
            }
            if counters.free() < descs.len() {
                return Err(PostError::CounterPoolExhausted {
                    capacity: counters.capacity(),
                });
            }
            let parent_state = counters
                .get(parent.slot(), parent.id())
                .map(|p| (p.result, p.cancel_queued));
            let mut ready = Vec::new();
            let mut handles = Vec::with_capacity(descs.len());
            for desc in descs {
                let (mut job, handle) = self.register(&mut counters, desc)?;
                match parent_state {
                    Some((JobResult::None, _)) => {
                        trace!(job_id = %job.id, parent = %parent.id(), "continuation parked");
                        counters.slot_mut(job.slot).waiting_on = Some(parent.slot());
                        counters.slot_mut(parent.slot()).continuations.push(job);
                    }
                    Some((JobResult::Cancelled, true)) => {
                        self.cancel_locked(&mut counters, job, true, &mut graveyard);
                    }
                    Some((result, _)) => {
                        job.previous = result;
                        ready.push(job);
                    }
                    // The parent retired and every handle to it is gone.
                    None => ready.push(job),
                }
                handles.push(handle);
            }
            self.push_jobs(ready);
            handles
        };
        if !graveyard.is_empty() {
            self.completed.notify_all();
        }
        drop(graveyard);
        Ok(handles)
    }

    /// Queue jobs and wake workers. May be called with the counters lock
    /// held; takes the queue lock.
    fn push_jobs(&self, jobs: impl IntoIterator<Item = Job>) {
        let mut queue = self.queue.lock();
        let mut pinned = false;
        let mut pushed = 0usize;
        for job in jobs {
            trace!(job_id = %job.id, priority = ?job.priority, "job queued");
            pinned |= queue.push(job);
            pushed += 1;
        }
        drop(queue);
        if pinned || pushed > 1 {
            self.work_available.notify_all();
        } else if pushed == 1 {
            self.work_available.notify_one();
        }
    }

    // ── Cancellation ─────────────────────────────────────────────

    /// Mark a job that has been removed from the queue (or from its
    /// parent) as cancelled, and deal with its continuations.
    fn cancel_locked(
        &self,
        counters: &mut CounterPool,
        job: Job,
        cancel_queued: bool,
        graveyard: &mut Vec<Job>,
    ) {
        let slot = counters.slot_mut(job.slot);
        slot.result = JobResult::Cancelled;
        slot.cancel_queued = cancel_queued;
        slot.waiting_on = None;
        let continuations = std::mem::take(&mut slot.continuations);
        counters.release_scheduler(job.slot);
        MetricCounters::bump(&self.metrics.cancelled, 1);
        trace!(job_id = %job.id, cancel_queued, "job cancelled");
        graveyard.push(job);

        if cancel_queued {
            for child in continuations {
                self.cancel_locked(counters, child, true, graveyard);
            }
        } else if !continuations.is_empty() {
            let mut children = Vec::with_capacity(continuations.len());
            for mut child in continuations {
                counters.slot_mut(child.slot).waiting_on = None;
                child.previous = JobResult::Cancelled;
                children.push(child);
            }
            MetricCounters::bump(&self.metrics.dispatched, children.len() as u64);
            self.push_jobs(children);
        }
    }

    fn cancel(self: &Arc<Self>, handle: &JobHandle, cancel_queued: bool) -> bool {
        if !handle.belongs_to(self) {
            return false;
        }
        let mut graveyard = Vec::new();
        let cancelled = {
            let mut counters = self.counters.lock();
            let Some(slot) = counters.get(handle.slot(), handle.id()) else {
                return false;
            };
            if slot.result.is_terminal() {
                return false;
            }
            let waiting_on = slot.waiting_on;
            let job = match waiting_on {
                Some(parent) => counters.take_continuation(parent, handle.id()),
                None => self.queue.lock().remove(handle.id()),
            };
            match job {
                Some(job) => {
                    self.cancel_locked(&mut counters, job, cancel_queued, &mut graveyard);
                    true
                }
                // Already picked up by a worker.
                None => false,
            }
        };
        if cancelled {
            self.completed.notify_all();
        }
        drop(graveyard);
        cancelled
    }

    // ── Waiting ──────────────────────────────────────────────────

    fn wait(self: &Arc<Self>, handle: &JobHandle, deadline: Option<Instant>) -> JobResult {
        if !handle.belongs_to(self) {
            return JobResult::None;
        }
        let mut counters = self.counters.lock();
        loop {
            match counters.get(handle.slot(), handle.id()) {
                None => return JobResult::None,
                Some(slot) if slot.result.is_terminal() => return slot.result,
                Some(_) => {}
            }
            match deadline {
                None => self.completed.wait(&mut counters),
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return JobResult::Timeout;
                    }
                    self.completed.wait_until(&mut counters, deadline);
                }
            }
        }
    }

    pub(crate) fn result_of(&self, slot: u32, id: JobId) -> JobResult {
        self.counters
            .lock()
            .get(slot, id)
            .map_or(JobResult::None, |s| s.result)
    }

    // ── Worker side ──────────────────────────────────────────────

    /// Block until `worker` has a job to run, or return `None` once it is
    /// told to exit.
    pub(crate) fn next_job(&self, worker: usize) -> Option<Job> {
        let state = &self.workers[worker];
        let mut queue = self.queue.lock();
        loop {
            if state.exit_requested() {
                return None;
            }
            if let Some(job) = queue.pop_for(worker) {
                return Some(job);
            }
            if !state.is_alive() {
                return None;
            }
            self.work_available.wait_for(&mut queue, self.idle_wait);
        }
    }

    /// Record a finished job's result and dispatch its continuations.
    ///
    /// Returns the continuation the calling worker should run next, if one
    /// is eligible to run on `worker`. With `dispatch == false` every
    /// continuation is cancelled instead.
    pub(crate) fn retire(
        &self,
        worker: usize,
        id: JobId,
        slot: u32,
        result: JobResult,
        dispatch: bool,
    ) -> Option<Job> {
        let mut graveyard = Vec::new();
        let mut inline = None;
        {
            let mut counters = self.counters.lock();
            let entry = counters.slot_mut(slot);
            debug_assert_eq!(entry.job, id);
            entry.result = result;
            let mut continuations = std::mem::take(&mut entry.continuations);
            counters.release_scheduler(slot);

            let counter = match result {
                JobResult::Ok => &self.metrics.completed,
                JobResult::Cancelled => &self.metrics.cancelled,
                _ => &self.metrics.failed,
            };
            MetricCounters::bump(counter, 1);

            for child in &mut continuations {
                counters.slot_mut(child.slot).waiting_on = None;
                child.previous = result;
            }

            if !dispatch {
                for child in continuations {
                    self.cancel_locked(&mut counters, child, true, &mut graveyard);
                }
            } else if !continuations.is_empty() {
                let pick = continuations
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.affinity.is_none_or(|w| w == worker))
                    .max_by_key(|(i, c)| (c.priority, std::cmp::Reverse(*i)))
                    .map(|(i, _)| i);
                if let Some(i) = pick {
                    inline = Some(continuations.remove(i));
                    MetricCounters::bump(&self.metrics.inline, 1);
                }
                MetricCounters::bump(&self.metrics.dispatched, continuations.len() as u64);
                self.push_jobs(continuations);
            }
        }
        self.completed.notify_all();
        drop(graveyard);
        inline
    }

    // ── Shutdown ─────────────────────────────────────────────────

    /// Tell every worker to stop. With `kill`, stop accepting jobs and
    /// cancel everything still queued. Returns the number cancelled.
    fn begin_shutdown(&self, kill: bool) -> usize {
        let mut graveyard = Vec::new();
        {
            let mut counters = self.counters.lock();
            if kill {
                self.accepting.store(false, Ordering::Release);
            }
            // Flags flip under the queue lock so no idle worker misses them.
            let mut queue = self.queue.lock();
            for worker in &self.workers {
                if kill {
                    worker.request_exit();
                } else {
                    worker.retire_when_idle();
                }
            }
            let drained = if kill { queue.drain() } else { Vec::new() };
            drop(queue);
            for job in drained {
                self.cancel_locked(&mut counters, job, true, &mut graveyard);
            }
        }
        self.work_available.notify_all();
        self.completed.notify_all();
        let cancelled = graveyard.len();
        drop(graveyard);
        cancelled
    }

    /// After the workers are joined: refuse new work and cancel whatever
    /// is left, such as jobs pinned to a worker that had already exited.
    fn finish_shutdown(&self) -> usize {
        let mut graveyard = Vec::new();
        {
            let mut counters = self.counters.lock();
            self.accepting.store(false, Ordering::Release);
            let drained = self.queue.lock().drain();
            for job in drained {
                self.cancel_locked(&mut counters, job, true, &mut graveyard);
            }
        }
        self.completed.notify_all();
        let cancelled = graveyard.len();
        drop(graveyard);
        cancelled
    }
}

// ── SchedulerHandle ──────────────────────────────────────────────

/// Cloneable, thread-safe access to a running scheduler.
///
/// Every job receives one through [`JobThread::scheduler`], which is how
/// jobs post or chain further work. A handle does not keep worker threads
/// alive; once the owning [`JobScheduler`] has shut down, posting through
/// it yields invalid job handles.
///
/// [`JobThread::scheduler`]: crate::JobThread::scheduler
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Identifier of the scheduler this handle refers to.
    pub fn id(&self) -> SchedulerId {
        self.shared.id
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.shared.workers.len()
    }

    /// Post one job.
    ///
    /// Returns an invalid handle (and logs a warning) if the scheduler has
    /// shut down.
    ///
    /// # Panics
    ///
    /// Panics if the counter pool is exhausted. Use [`try_post`](Self::try_post)
    /// to handle that case.
    pub fn post(&self, desc: JobDescriptor) -> JobHandle {
        match self.try_post(desc) {
            Ok(handle) => handle,
            Err(PostError::ShutDown) => {
                warn!(scheduler = %self.shared.id, "job posted after shutdown, ignored");
                JobHandle::invalid()
            }
            Err(e @ PostError::CounterPoolExhausted { .. }) => panic!("{e}"),
        }
    }

    /// Post one job, reporting failure instead of panicking.
    pub fn try_post(&self, desc: JobDescriptor) -> Result<JobHandle, PostError> {
        let mut handles = self.shared.try_post_all([desc])?;
        Ok(handles.pop().unwrap_or_default())
    }

    /// Post a batch of jobs under a single lock acquisition. Either every
    /// job is queued or none is.
    ///
    /// # Panics
    ///
    /// Panics if the counter pool cannot hold the whole batch.
    pub fn post_all(&self, descs: impl IntoIterator<Item = JobDescriptor>) -> Vec<JobHandle> {
        match self.shared.try_post_all(descs) {
            Ok(handles) => handles,
            Err(PostError::ShutDown) => {
                warn!(scheduler = %self.shared.id, "job batch posted after shutdown, ignored");
                Vec::new()
            }
            Err(e @ PostError::CounterPoolExhausted { .. }) => panic!("{e}"),
        }
    }

    /// Cancel a job that has not started.
    ///
    /// Returns true if the job was still queued (or parked behind its
    /// parent) and is now `Cancelled`. With `cancel_queued`, every
    /// continuation chained after it is cancelled too; otherwise those
    /// continuations are dispatched with `previous_result = Cancelled`.
    /// Returns false for running or finished jobs and for invalid handles.
    pub fn cancel(&self, handle: &JobHandle, cancel_queued: bool) -> bool {
        self.shared.cancel(handle, cancel_queued)
    }

    /// Block until the job finishes and return its result.
    ///
    /// Returns `JobResult::None` for invalid or unknown handles. Waiting on
    /// a job from inside a job occupies that worker; if every worker does
    /// so the scheduler deadlocks.
    pub fn wait(&self, handle: &JobHandle) -> JobResult {
        self.shared.wait(handle, None)
    }

    /// Like [`wait`](Self::wait), but gives up with `JobResult::Timeout`
    /// after `timeout`. The job keeps running.
    pub fn wait_timeout(&self, handle: &JobHandle, timeout: Duration) -> JobResult {
        // A deadline past the clock's range waits forever.
        self.shared.wait(handle, Instant::now().checked_add(timeout))
    }

    /// Wait for every handle. Returns `Fail` if any job failed, else
    /// `Cancelled` if any was cancelled, else `Ok`.
    pub fn wait_all(&self, handles: &[JobHandle]) -> JobResult {
        let mut combined = JobResult::Ok;
        for handle in handles {
            match self.wait(handle) {
                JobResult::Fail => combined = JobResult::Fail,
                JobResult::Cancelled if combined != JobResult::Fail => {
                    combined = JobResult::Cancelled;
                }
                _ => {}
            }
        }
        combined
    }

    /// Chain `desc` to run after `parent` finishes, receiving the parent's
    /// result as `previous_result`.
    ///
    /// If the parent already finished the child is queued immediately. If
    /// the parent was cancelled with `cancel_queued`, the child is
    /// cancelled at once. An invalid parent yields an invalid handle.
    pub fn enqueue_one(&self, parent: &JobHandle, desc: JobDescriptor) -> JobHandle {
        match self.shared.try_enqueue_all(parent, [desc]) {
            Ok(mut handles) => handles.pop().unwrap_or_default(),
            Err(PostError::ShutDown) => {
                warn!(scheduler = %self.shared.id, "continuation posted after shutdown, ignored");
                JobHandle::invalid()
            }
            Err(e @ PostError::CounterPoolExhausted { .. }) => panic!("{e}"),
        }
    }

    /// [`enqueue_one`](Self::enqueue_one) for each descriptor, in order,
    /// under a single lock acquisition.
    ///
    /// Either every child is chained or none is: an invalid parent, a
    /// shut-down scheduler, or a counter pool too small for the whole batch
    /// all yield an empty vector.
    pub fn enqueue_all(
        &self,
        parent: &JobHandle,
        descs: impl IntoIterator<Item = JobDescriptor>,
    ) -> Vec<JobHandle> {
        match self.shared.try_enqueue_all(parent, descs) {
            Ok(handles) => handles,
            Err(e) => {
                warn!(scheduler = %self.shared.id, error = %e, "continuation batch rejected");
                Vec::new()
            }
        }
    }

    /// Current result without blocking: `None` while the job is pending or
    /// running, or for an invalid handle.
    pub fn get_result(&self, handle: &JobHandle) -> JobResult {
        if !handle.belongs_to(&self.shared) {
            return JobResult::None;
        }
        self.shared.result_of(handle.slot(), handle.id())
    }

    /// Jobs waiting in the pending queue. Parked continuations are not
    /// counted.
    pub fn queued_jobs(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Counter slots currently in use.
    pub fn live_counters(&self) -> usize {
        self.shared.counters.lock().live()
    }

    /// Snapshot of cumulative activity.
    pub fn metrics(&self) -> SchedulerMetrics {
        let peak = self.shared.counters.lock().peak();
        self.shared.metrics.snapshot(peak)
    }

    /// Index of the calling worker thread if it belongs to this scheduler.
    pub fn current_worker_index(&self) -> Option<usize> {
        worker::current()
            .filter(|(id, _)| *id == self.shared.id)
            .map(|(_, index)| index)
    }
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("id", &self.shared.id)
            .field("workers", &self.shared.workers.len())
            .finish_non_exhaustive()
    }
}

// ── ShutdownState ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownState {
    Running,
    Stopped,
}

// ── JobScheduler ─────────────────────────────────────────────────

/// A fixed pool of worker threads servicing a priority job queue.
///
/// Dropping the scheduler shuts it down with `kill_awaiting = true`.
///
/// ```
/// use tte_jobs::{JobDescriptor, JobResult, JobScheduler, SchedulerConfig};
///
/// let mut scheduler = JobScheduler::new(SchedulerConfig::with_workers(2)).unwrap();
/// let parent = scheduler.post(JobDescriptor::from_fn(|_, _| JobResult::Fail));
/// let child = scheduler.enqueue_one(&parent, JobDescriptor::from_fn(|_, prev| {
///     assert_eq!(prev, JobResult::Fail);
///     JobResult::Ok
/// }));
/// assert_eq!(scheduler.wait(&child), JobResult::Ok);
/// scheduler.shutdown(false);
/// ```
pub struct JobScheduler {
    handle: SchedulerHandle,
    threads: Vec<JoinHandle<()>>,
    state: ShutdownState,
}

impl JobScheduler {
    /// Validate `config` and start the worker threads.
    pub fn new(config: SchedulerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let workers = config.resolved_worker_count();
        let shared = Arc::new(Shared::new(&config, workers));
        let mut threads = Vec::with_capacity(workers);

        for index in 0..workers {
            let name = format!("{}-{index}", config.thread_name_prefix);
            let worker_shared = Arc::clone(&shared);
            let page_size = config.scratch_page_size;
            let thread_name = name.clone();
            let spawned = thread::Builder::new()
                .name(name)
                .spawn(move || worker::run(worker_shared, index, thread_name, page_size));
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    error!(worker = index, error = %e, "failed to spawn job worker");
                    let mut partial = Self {
                        handle: SchedulerHandle::from_shared(shared),
                        threads,
                        state: ShutdownState::Running,
                    };
                    partial.shutdown(true);
                    return Err(ConfigError::ThreadSpawn {
                        reason: e.to_string(),
                    });
                }
            }
        }

        debug!(
            scheduler = %shared.id,
            workers,
            counter_capacity = config.counter_capacity,
            "job scheduler started"
        );
        Ok(Self {
            handle: SchedulerHandle::from_shared(shared),
            threads,
            state: ShutdownState::Running,
        })
    }

    /// A cloneable handle for posting from other threads.
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Identifier of this scheduler.
    pub fn id(&self) -> SchedulerId {
        self.handle.id()
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.handle.worker_count()
    }

    /// Whether the calling thread is a worker of any scheduler.
    pub fn is_worker_thread() -> bool {
        worker::current().is_some()
    }

    /// See [`SchedulerHandle::post`].
    pub fn post(&self, desc: JobDescriptor) -> JobHandle {
        self.handle.post(desc)
    }

    /// See [`SchedulerHandle::try_post`].
    pub fn try_post(&self, desc: JobDescriptor) -> Result<JobHandle, PostError> {
        self.handle.try_post(desc)
    }

    /// See [`SchedulerHandle::post_all`].
    pub fn post_all(&self, descs: impl IntoIterator<Item = JobDescriptor>) -> Vec<JobHandle> {
        self.handle.post_all(descs)
    }

    /// See [`SchedulerHandle::cancel`].
    pub fn cancel(&self, handle: &JobHandle, cancel_queued: bool) -> bool {
        self.handle.cancel(handle, cancel_queued)
    }

    /// See [`SchedulerHandle::wait`].
    pub fn wait(&self, handle: &JobHandle) -> JobResult {
        self.handle.wait(handle)
    }

    /// See [`SchedulerHandle::wait_timeout`].
    pub fn wait_timeout(&self, handle: &JobHandle, timeout: Duration) -> JobResult {
        self.handle.wait_timeout(handle, timeout)
    }

    /// See [`SchedulerHandle::wait_all`].
    pub fn wait_all(&self, handles: &[JobHandle]) -> JobResult {
        self.handle.wait_all(handles)
    }

    /// See [`SchedulerHandle::enqueue_one`].
    pub fn enqueue_one(&self, parent: &JobHandle, desc: JobDescriptor) -> JobHandle {
        self.handle.enqueue_one(parent, desc)
    }

    /// See [`SchedulerHandle::enqueue_all`].
    pub fn enqueue_all(
        &self,
        parent: &JobHandle,
        descs: impl IntoIterator<Item = JobDescriptor>,
    ) -> Vec<JobHandle> {
        self.handle.enqueue_all(parent, descs)
    }

    /// See [`SchedulerHandle::get_result`].
    pub fn get_result(&self, handle: &JobHandle) -> JobResult {
        self.handle.get_result(handle)
    }

    /// See [`SchedulerHandle::queued_jobs`].
    pub fn queued_jobs(&self) -> usize {
        self.handle.queued_jobs()
    }

    /// See [`SchedulerHandle::live_counters`].
    pub fn live_counters(&self) -> usize {
        self.handle.live_counters()
    }

    /// See [`SchedulerHandle::metrics`].
    pub fn metrics(&self) -> SchedulerMetrics {
        self.handle.metrics()
    }

    /// Stop the worker threads and join them.
    ///
    /// With `kill_awaiting`, posting is refused from now on, every queued
    /// or parked job becomes `Cancelled`, and workers exit after their
    /// current job; continuations of those jobs are cancelled rather than
    /// dispatched. Without it, workers keep running until the queue is
    /// empty, including work posted by running jobs.
    ///
    /// Either way, waiters are released: every outstanding job ends with a
    /// terminal result. Calling this again returns an empty report.
    ///
    /// Called from inside one of this scheduler's jobs, the calling worker
    /// cannot join itself. It is reported in
    /// [`ShutdownReport::workers_detached`] and exits after the job returns.
    pub fn shutdown(&mut self, kill_awaiting: bool) -> ShutdownReport {
        if self.state == ShutdownState::Stopped {
            return ShutdownReport::default();
        }
        self.state = ShutdownState::Stopped;
        let start = Instant::now();
        let shared = &self.handle.shared;

        let mut jobs_cancelled = shared.begin_shutdown(kill_awaiting);

        let current = thread::current().id();
        let mut workers_joined = 0;
        let mut workers_detached = 0;
        for handle in self.threads.drain(..) {
            if handle.thread().id() == current {
                warn!(scheduler = %shared.id, "scheduler shut down from its own worker, not joining it");
                workers_detached += 1;
                continue;
            }
            match handle.join() {
                Ok(()) => workers_joined += 1,
                Err(_) => error!(scheduler = %shared.id, "job worker panicked outside a job"),
            }
        }

        jobs_cancelled += shared.finish_shutdown();
        let total_ms = start.elapsed().as_millis() as u64;
        debug!(
            scheduler = %shared.id,
            total_ms,
            workers_joined,
            workers_detached,
            jobs_cancelled,
            killed = kill_awaiting,
            "job scheduler shut down"
        );
        ShutdownReport {
            total_ms,
            workers_joined,
            workers_detached,
            jobs_cancelled,
            killed: kill_awaiting,
        }
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.shutdown(true);
    }
}

impl fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobScheduler")
            .field("id", &self.handle.shared.id)
            .field("workers", &self.threads.len())
            .field("state", &self.state)
            .finish()
    }
}

// Compile-time assertion: scheduler and handles must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<JobScheduler>();
    assert::<SchedulerHandle>();
    assert::<JobHandle>();
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobPriority;
    use tte_test_utils::sync::Gate;

    fn scheduler(workers: usize) -> JobScheduler {
        JobScheduler::new(SchedulerConfig::with_workers(workers)).unwrap()
    }

    fn blocker(gate: &Gate) -> JobDescriptor {
        let gate = gate.clone();
        JobDescriptor::from_fn(move |_, _| {
            gate.wait();
            JobResult::Ok
        })
    }

    #[test]
    fn ids_are_monotonic_from_one() {
        let sched = scheduler(1);
        let a = sched.post(JobDescriptor::from_fn(|_, _| JobResult::Ok));
        let b = sched.post(JobDescriptor::from_fn(|_, _| JobResult::Ok));
        assert_eq!(a.id(), JobId(1));
        assert_eq!(b.id(), JobId(2));
        assert_eq!(sched.wait_all(&[a, b]), JobResult::Ok);
    }

    #[test]
    fn stale_id_does_not_see_reused_slot() {
        let mut config = SchedulerConfig::with_workers(1);
        config.counter_capacity = 1;
        let sched = JobScheduler::new(config).unwrap();

        let first = sched.post(JobDescriptor::from_fn(|_, _| JobResult::Fail));
        assert_eq!(sched.wait(&first), JobResult::Fail);
        let (id, slot) = (first.id(), first.slot());
        drop(first);

        let second = sched.post(JobDescriptor::from_fn(|_, _| JobResult::Ok));
        assert_eq!(second.slot(), slot);
        assert_eq!(sched.wait(&second), JobResult::Ok);
        assert_eq!(sched.handle.shared.result_of(slot, id), JobResult::None);
    }

    #[test]
    fn exhausted_pool_reports_capacity() {
        let mut config = SchedulerConfig::with_workers(1);
        config.counter_capacity = 2;
        let sched = JobScheduler::new(config).unwrap();
        let gate = Gate::new();

        let running = sched.post(blocker(&gate));
        let queued = sched.post(JobDescriptor::from_fn(|_, _| JobResult::Ok));
        match sched.try_post(JobDescriptor::from_fn(|_, _| JobResult::Ok)) {
            Err(PostError::CounterPoolExhausted { capacity: 2 }) => {}
            other => panic!("expected CounterPoolExhausted, got {other:?}"),
        }
        gate.open();
        assert_eq!(sched.wait_all(&[running, queued]), JobResult::Ok);
    }

    #[test]
    fn failed_batch_leaves_no_slots_behind() {
        let mut config = SchedulerConfig::with_workers(1);
        config.counter_capacity = 2;
        let sched = JobScheduler::new(config).unwrap();
        let batch = (0..3).map(|_| JobDescriptor::from_fn(|_, _| JobResult::Ok));
        assert!(matches!(
            sched.handle.shared.try_post_all(batch),
            Err(PostError::CounterPoolExhausted { .. })
        ));
        assert_eq!(sched.live_counters(), 0);
        assert_eq!(sched.metrics().jobs_completed, 0);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let mut sched = scheduler(2);
        let first = sched.shutdown(false);
        assert_eq!(first.workers_joined, 2);
        assert_eq!(first.workers_detached, 0);
        assert!(!first.killed);
        assert_eq!(sched.shutdown(true), ShutdownReport::default());
    }

    #[test]
    fn post_after_shutdown_returns_invalid_handle() {
        let mut sched = scheduler(1);
        sched.shutdown(true);
        let handle = sched.post(JobDescriptor::from_fn(|_, _| JobResult::Ok));
        assert!(!handle.is_valid());
        assert_eq!(
            sched.try_post(JobDescriptor::from_fn(|_, _| JobResult::Ok)),
            Err(PostError::ShutDown)
        );
        assert!(sched.post_all([JobDescriptor::from_fn(|_, _| JobResult::Ok)]).is_empty());
    }

    #[test]
    fn enqueue_all_after_shutdown_is_empty() {
        let mut sched = scheduler(1);
        let parent = sched.post(JobDescriptor::from_fn(|_, _| JobResult::Ok));
        assert_eq!(sched.wait(&parent), JobResult::Ok);
        sched.shutdown(false);

        let children = sched.enqueue_all(
            &parent,
            (0..3).map(|_| JobDescriptor::from_fn(|_, _| JobResult::Ok)),
        );
        assert!(children.is_empty());
        assert!(!sched
            .enqueue_one(&parent, JobDescriptor::from_fn(|_, _| JobResult::Ok))
            .is_valid());
    }

    #[test]
    fn enqueue_all_chains_nothing_when_the_pool_is_short() {
        let mut config = SchedulerConfig::with_workers(1);
        config.counter_capacity = 3;
        let sched = JobScheduler::new(config).unwrap();
        let gate = Gate::new();
        let parent = sched.post(blocker(&gate));

        let rejected = sched.enqueue_all(
            &parent,
            (0..3).map(|_| JobDescriptor::from_fn(|_, _| JobResult::Ok)),
        );
        assert!(rejected.is_empty());
        assert_eq!(sched.live_counters(), 1);
        assert_eq!(sched.metrics().jobs_posted, 1);

        let accepted = sched.enqueue_all(
            &parent,
            (0..2).map(|_| JobDescriptor::from_fn(|_, _| JobResult::Ok)),
        );
        assert_eq!(accepted.len(), 2);
        gate.open();
        assert_eq!(sched.wait_all(&accepted), JobResult::Ok);
        let metrics = sched.metrics();
        assert_eq!(metrics.continuations_inline + metrics.continuations_dispatched, 2);
    }

    #[test]
    fn handles_from_another_scheduler_are_unknown() {
        let a = scheduler(1);
        let b = scheduler(1);
        let handle = a.post(JobDescriptor::from_fn(|_, _| JobResult::Ok));
        assert_eq!(a.wait(&handle), JobResult::Ok);
        assert_eq!(b.get_result(&handle), JobResult::None);
        assert_eq!(b.wait(&handle), JobResult::None);
        assert!(!b.cancel(&handle, true));
    }

    #[test]
    fn out_of_range_affinity_is_ignored() {
        let sched = scheduler(2);
        let handle = sched.post(
            JobDescriptor::from_fn(|_, _| JobResult::Ok)
                .with_affinity(99)
                .with_priority(JobPriority::High),
        );
        assert_eq!(sched.wait(&handle), JobResult::Ok);
    }

    #[test]
    fn slots_return_to_pool_when_handles_drop() {
        let sched = scheduler(1);
        let handle = sched.post(JobDescriptor::from_fn(|_, _| JobResult::Ok));
        assert_eq!(sched.wait(&handle), JobResult::Ok);
        assert_eq!(sched.live_counters(), 1);
        let copy = handle.clone();
        drop(handle);
        assert_eq!(sched.get_result(&copy), JobResult::Ok);
        drop(copy);
        assert_eq!(sched.live_counters(), 0);
    }

    #[test]
    fn current_worker_index_is_scoped_to_scheduler() {
        let sched = scheduler(2);
        assert_eq!(sched.handle().current_worker_index(), None);
        assert!(!JobScheduler::is_worker_thread());

        let handle = sched.post(JobDescriptor::from_fn(|thread, _| {
            let index = thread.scheduler().current_worker_index();
            (index == Some(thread.index()) && JobScheduler::is_worker_thread()).into()
        }));
        assert_eq!(sched.wait(&handle), JobResult::Ok);
    }
}

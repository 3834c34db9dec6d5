//! Job vocabulary: priorities, results, user arguments, and descriptors.
//!
//! A [`JobDescriptor`] is what callers hand to the scheduler. It carries
//! either a plain function pointer with two opaque [`UserArg`] words, or a
//! boxed closure. Once posted it becomes an internal [`Job`], which is
//! move-only and flows through the priority queue to exactly one worker.

use std::cmp::Ordering;
use std::fmt;

use crate::worker::JobThread;

// ── JobPriority ────────────────────────────────────────────────────

/// Scheduling priority. Higher values are serviced first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum JobPriority {
    /// Background work.
    #[default]
    Normal = 0,
    /// Ahead of normal work.
    High = 1,
    /// Ahead of high work.
    VeryHigh = 2,
    /// Serviced before everything else.
    Highest = 3,
}

// ── JobResult ──────────────────────────────────────────────────────

/// Outcome of a job, or of waiting on one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum JobResult {
    /// No handle, unknown job, or not finished yet.
    #[default]
    None,
    /// The job function reported success.
    Ok,
    /// The job function reported failure (or panicked).
    Fail,
    /// The job was cancelled before it started.
    Cancelled,
    /// A wait gave up before the job finished. Never stored for a job.
    Timeout,
}

impl JobResult {
    /// Whether this is a final job outcome (`Ok`, `Fail`, or `Cancelled`).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ok | Self::Fail | Self::Cancelled)
    }
}

impl From<bool> for JobResult {
    fn from(ok: bool) -> Self {
        if ok {
            Self::Ok
        } else {
            Self::Fail
        }
    }
}

impl fmt::Display for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Ok => "ok",
            Self::Fail => "fail",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

// ── JobId ──────────────────────────────────────────────────────────

/// Scheduler-unique job identifier. Ids increase monotonically from 1;
/// `JobId(0)` is the invalid sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl JobId {
    /// The "no job" sentinel carried by invalid handles.
    pub const INVALID: JobId = JobId(0);
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── UserArg ────────────────────────────────────────────────────────

/// An opaque pointer-sized argument passed through to a [`JobFn`].
///
/// The scheduler neither owns nor frees what a `UserArg` refers to; keeping
/// the target alive until the job has run is the poster's responsibility.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct UserArg(usize);

impl UserArg {
    /// A null argument.
    pub const NULL: UserArg = UserArg(0);

    /// Wrap a raw pointer.
    pub fn from_ptr<T>(ptr: *mut T) -> Self {
        Self(ptr.expose_provenance())
    }

    /// Recover the raw pointer. Dereferencing it is up to the caller.
    pub fn as_ptr<T>(self) -> *mut T {
        std::ptr::with_exposed_provenance_mut(self.0)
    }

    /// Wrap a plain integer payload.
    pub fn from_usize(value: usize) -> Self {
        Self(value)
    }

    /// The argument as an integer.
    pub fn as_usize(self) -> usize {
        self.0
    }

    /// Whether this is [`UserArg::NULL`].
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

// ── Task ───────────────────────────────────────────────────────────

/// Function-pointer job body: `(thread, previous_result, arg_a, arg_b)`.
///
/// `previous_result` is the parent's outcome for a continuation and
/// [`JobResult::None`] for a directly posted job.
pub type JobFn = fn(&JobThread, JobResult, UserArg, UserArg) -> JobResult;

type BoxedJob = Box<dyn FnOnce(&JobThread, JobResult) -> JobResult + Send + 'static>;

pub(crate) enum Task {
    Raw {
        function: JobFn,
        arg_a: UserArg,
        arg_b: UserArg,
    },
    Boxed(BoxedJob),
}

impl Task {
    pub(crate) fn run(self, thread: &JobThread, previous: JobResult) -> JobResult {
        match self {
            Self::Raw {
                function,
                arg_a,
                arg_b,
            } => function(thread, previous, arg_a, arg_b),
            Self::Boxed(f) => f(thread, previous),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw { arg_a, arg_b, .. } => f
                .debug_struct("Raw")
                .field("arg_a", arg_a)
                .field("arg_b", arg_b)
                .finish_non_exhaustive(),
            Self::Boxed(_) => f.write_str("Boxed(..)"),
        }
    }
}

// ── JobDescriptor ──────────────────────────────────────────────────

/// Caller-facing description of a job to post.
///
/// ```
/// use tte_jobs::{JobDescriptor, JobPriority, JobResult};
///
/// let desc = JobDescriptor::from_fn(|_thread, _prev| JobResult::Ok)
///     .with_priority(JobPriority::High);
/// assert_eq!(desc.priority(), JobPriority::High);
/// ```
#[derive(Debug)]
pub struct JobDescriptor {
    priority: JobPriority,
    affinity: Option<usize>,
    task: Task,
}

impl JobDescriptor {
    /// Describe a function-pointer job with two opaque arguments.
    pub fn new(function: JobFn, arg_a: UserArg, arg_b: UserArg) -> Self {
        Self {
            priority: JobPriority::Normal,
            affinity: None,
            task: Task::Raw {
                function,
                arg_a,
                arg_b,
            },
        }
    }

    /// Describe a closure job. The closure is dropped unrun if the job is
    /// cancelled.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce(&JobThread, JobResult) -> JobResult + Send + 'static,
    {
        Self {
            priority: JobPriority::Normal,
            affinity: None,
            task: Task::Boxed(Box::new(f)),
        }
    }

    /// Set the scheduling priority.
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Pin the job to one worker thread by index.
    pub fn with_affinity(mut self, worker: usize) -> Self {
        self.affinity = Some(worker);
        self
    }

    /// The scheduling priority.
    pub fn priority(&self) -> JobPriority {
        self.priority
    }

    /// The pinned worker index, if any.
    pub fn affinity(&self) -> Option<usize> {
        self.affinity
    }
}

// ── Job ────────────────────────────────────────────────────────────

/// A posted job. Owned by exactly one place at a time: the pending queue,
/// a parent's continuation list, or the worker running it.
#[derive(Debug)]
pub(crate) struct Job {
    pub(crate) id: JobId,
    pub(crate) slot: u32,
    pub(crate) priority: JobPriority,
    pub(crate) affinity: Option<usize>,
    /// Arrival order in the pending queue; assigned on push.
    pub(crate) seq: u64,
    pub(crate) previous: JobResult,
    pub(crate) task: Task,
}

impl Job {
    pub(crate) fn new(id: JobId, slot: u32, desc: JobDescriptor, previous: JobResult) -> Self {
        Self {
            id,
            slot,
            priority: desc.priority,
            affinity: desc.affinity,
            seq: 0,
            previous,
            task: desc.task,
        }
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap on priority; earlier arrivals first within a level.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &JobThread, prev: JobResult, _: UserArg, _: UserArg) -> JobResult {
        prev
    }

    fn job(id: u64, priority: JobPriority, seq: u64) -> Job {
        let mut job = Job::new(
            JobId(id),
            0,
            JobDescriptor::new(noop, UserArg::NULL, UserArg::NULL).with_priority(priority),
            JobResult::None,
        );
        job.seq = seq;
        job
    }

    #[test]
    fn priority_order_matches_numeric_value() {
        assert!(JobPriority::Highest > JobPriority::VeryHigh);
        assert!(JobPriority::VeryHigh > JobPriority::High);
        assert!(JobPriority::High > JobPriority::Normal);
        assert_eq!(JobPriority::Highest as u8, 3);
    }

    #[test]
    fn job_ordering_prefers_priority_then_arrival() {
        let early_normal = job(1, JobPriority::Normal, 0);
        let late_normal = job(2, JobPriority::Normal, 1);
        let high = job(3, JobPriority::High, 2);
        assert!(high > early_normal);
        assert!(early_normal > late_normal);
    }

    #[test]
    fn terminal_results() {
        assert!(JobResult::Ok.is_terminal());
        assert!(JobResult::Fail.is_terminal());
        assert!(JobResult::Cancelled.is_terminal());
        assert!(!JobResult::None.is_terminal());
        assert!(!JobResult::Timeout.is_terminal());
        assert_eq!(JobResult::from(false), JobResult::Fail);
    }

    #[test]
    fn user_arg_round_trips_pointers_and_integers() {
        let mut value = 17u32;
        let arg = UserArg::from_ptr(&mut value as *mut u32);
        assert_eq!(arg.as_ptr::<u32>(), &mut value as *mut u32);
        assert_eq!(UserArg::from_usize(9).as_usize(), 9);
        assert!(UserArg::NULL.is_null());
    }

    #[test]
    fn descriptor_builders() {
        let desc = JobDescriptor::from_fn(|_, _| JobResult::Ok)
            .with_priority(JobPriority::VeryHigh)
            .with_affinity(2);
        assert_eq!(desc.priority(), JobPriority::VeryHigh);
        assert_eq!(desc.affinity(), Some(2));
        assert!(format!("{desc:?}").contains("Boxed"));
    }
}

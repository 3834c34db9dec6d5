//! Priority job scheduler with continuations and ref-counted handles.
//!
//! A [`JobScheduler`] owns a fixed pool of worker threads that service one
//! priority queue. Posting a [`JobDescriptor`] returns a [`JobHandle`] that
//! can be waited on (optionally with a timeout), cancelled while queued, or
//! used as the parent of continuation jobs that start once it finishes and
//! receive its [`JobResult`].
//!
//! # Architecture
//!
//! ```text
//! JobScheduler ── SchedulerHandle (Arc<Shared>, cloneable, handed to jobs)
//! Shared
//! ├── CounterPool (fixed slots: result, handle refs, parked continuations)
//! ├── JobQueue (shared max-heap + one heap per worker for pinned jobs)
//! └── WorkerState[] (alive / force-exit flags)
//! Worker thread → JobThread (index, name, scratch LinearHeap)
//! ```
//!
//! # Lifecycle of a job
//!
//! 1. `post` / `enqueue_one` assigns a [`JobId`] and a counter slot.
//! 2. The job waits in the queue (or parked behind its parent).
//! 3. A worker runs it; panics are caught and reported as `Fail`.
//! 4. The result is stored, waiters wake, and continuations are dispatched.
//!    One of them may run immediately on the same worker.
//! 5. The slot is recycled once the job is retired and no handle remains.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
mod counter;
pub mod handle;
pub mod job;
pub mod metrics;
mod queue;
pub mod scheduler;
pub mod worker;

pub use config::{ConfigError, SchedulerConfig};
pub use handle::JobHandle;
pub use job::{JobDescriptor, JobFn, JobId, JobPriority, JobResult, UserArg};
pub use metrics::SchedulerMetrics;
pub use scheduler::{JobScheduler, PostError, SchedulerHandle, SchedulerId, ShutdownReport};
pub use worker::JobThread;

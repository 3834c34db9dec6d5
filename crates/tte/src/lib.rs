//! TTE runtime: transient memory and background work for the toolchain.
//!
//! This is the facade crate that re-exports the public API of the TTE
//! runtime sub-crates. For most users, adding `tte` as a single dependency
//! is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use tte::prelude::*;
//!
//! // A per-frame heap: allocate freely, roll back at the frame boundary.
//! let mut frame = LinearHeap::new(64 * 1024);
//! let names = frame.new_array_with(4, |i| format!("entry_{i}"));
//! assert_eq!(names[3], "entry_3");
//! frame.rollback();
//!
//! // A scheduler: decode an entry, then index it once decoding succeeded.
//! let mut scheduler = JobScheduler::new(SchedulerConfig::with_workers(2)).unwrap();
//! let decode = scheduler.post(
//!     JobDescriptor::from_fn(|thread, _| {
//!         let buffer = thread.scratch().new_array_no_destruct::<u8>(4096);
//!         (buffer.len() == 4096).into()
//!     })
//!     .with_priority(JobPriority::High),
//! );
//! let index = scheduler.enqueue_one(
//!     &decode,
//!     JobDescriptor::from_fn(|_, previous| previous),
//! );
//! assert_eq!(scheduler.wait(&index), JobResult::Ok);
//! scheduler.shutdown(false);
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`heap`] | `tte-heap` | `LinearHeap`, page and context bookkeeping |
//! | [`jobs`] | `tte-jobs` | `JobScheduler`, handles, descriptors, metrics |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Paged linear heap with context-scoped destructors (`tte-heap`).
///
/// [`heap::LinearHeap`] is the only type most users need; it is also in the
/// [`prelude`].
pub use tte_heap as heap;

/// Priority job scheduler (`tte-jobs`).
///
/// [`jobs::JobScheduler`] owns the worker pool; [`jobs::SchedulerHandle`]
/// posts from other threads and from inside jobs.
pub use tte_jobs as jobs;

/// Common imports for typical TTE runtime usage.
///
/// ```rust
/// use tte::prelude::*;
/// ```
pub mod prelude {
    // Heap
    pub use tte_heap::{HeapConfig, HeapError, LinearHeap};

    // Scheduler
    pub use tte_jobs::{
        JobDescriptor, JobHandle, JobPriority, JobResult, JobScheduler, JobThread,
        SchedulerConfig, SchedulerHandle, UserArg,
    };
}

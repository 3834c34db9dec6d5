//! Paged linear heap with context-scoped destructors.
//!
//! A [`LinearHeap`] serves transient allocations (per-frame render data,
//! per-job scratch memory, temporary parse buffers) by bumping a cursor
//! through large pages, and frees them in bulk. This crate is the only one
//! in the workspace that contains `unsafe` code, confined to `raw.rs` and
//! the typed placement helpers in `heap.rs`.
//!
//! # Architecture
//!
//! ```text
//! LinearHeap
//! ├── PageList → Page[] (zeroed blocks, reused in order after rollback)
//! └── ContextStack → ContextFrame[] (base frame + pushed frames)
//!     └── DropEntry[] (type-erased deferred destructors)
//! ```
//!
//! # Lifetimes
//!
//! - **Tracked** values (`new_object`, `new_array*`) are dropped in creation
//!   order when their context pops, or innermost-first at rollback.
//! - **No-destruct** values (`new_no_destruct*`, interned strings, raw
//!   bytes) are never dropped by the heap.
//! - `rollback` keeps pages for reuse; `release_all` (and `Drop`) frees
//!   them.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod config;
mod context;
pub mod error;
pub mod heap;
pub mod page;
mod raw;

pub use config::HeapConfig;
pub use error::HeapError;
pub use heap::{HeapStats, LinearHeap, MAX_ALIGN};

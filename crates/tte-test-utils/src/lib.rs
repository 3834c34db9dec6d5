//! Test fixtures for TTE runtime development.
//!
//! Provides drop recorders for checking destructor order and count
//! ([`DropLog`], [`DropCounter`]) and blocking primitives for holding
//! worker threads in a known state ([`Gate`], [`Latch`]).

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod drops;
pub mod sync;

pub use drops::{CountedDrop, DropCounter, DropLog, Tracked};
pub use sync::{Gate, Latch};

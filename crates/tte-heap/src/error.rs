//! Heap-specific error types.

use std::error::Error;
use std::fmt;

/// Errors reported by fallible heap operations.
///
/// Out-of-memory is not represented here: a failed page allocation goes
/// straight to [`std::alloc::handle_alloc_error`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeapError {
    /// The heap configuration is invalid.
    InvalidConfig {
        /// Human-readable description of the problem.
        reason: String,
    },
    /// An allocation request whose size (after alignment padding) cannot
    /// be represented in a single page.
    SizeOverflow {
        /// Number of bytes requested.
        requested: usize,
    },
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { reason } => write!(f, "invalid heap config: {reason}"),
            Self::SizeOverflow { requested } => {
                write!(f, "allocation of {requested} bytes exceeds the maximum page size")
            }
        }
    }
}

impl Error for HeapError {}

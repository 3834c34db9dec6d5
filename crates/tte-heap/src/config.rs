//! Linear heap configuration parameters.

use crate::error::HeapError;

/// Configuration for a [`LinearHeap`](crate::LinearHeap).
///
/// Validated at construction; immutable afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeapConfig {
    /// Minimum size of each page in bytes.
    ///
    /// Allocations larger than this get a dedicated page of exactly their
    /// size. Default: 1 MiB.
    pub page_size: u32,
}

impl HeapConfig {
    /// Default page size: 1 MiB.
    pub const DEFAULT_PAGE_SIZE: u32 = 0x10_0000;

    /// Largest page size accepted by [`validate`](Self::validate): 1 GiB.
    pub const MAX_PAGE_SIZE: u32 = 1 << 30;

    /// Create a config with the given page size.
    pub fn new(page_size: u32) -> Self {
        Self { page_size }
    }

    /// Check the config for values the heap cannot operate with.
    pub fn validate(&self) -> Result<(), HeapError> {
        if self.page_size == 0 {
            return Err(HeapError::InvalidConfig {
                reason: "page_size must be non-zero".into(),
            });
        }
        if self.page_size > Self::MAX_PAGE_SIZE {
            return Err(HeapError::InvalidConfig {
                reason: format!(
                    "page_size {} exceeds maximum {}",
                    self.page_size,
                    Self::MAX_PAGE_SIZE
                ),
            });
        }
        Ok(())
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PAGE_SIZE)
    }
}

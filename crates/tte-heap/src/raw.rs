//! Low-level primitives for page memory.
//!
//! This is the only module in the crate that may contain `unsafe` code
//! besides the typed placement helpers in [`heap`](crate::heap), which call
//! into the functions below. Every unsafe operation carries a `// SAFETY:`
//! comment stating the invariant it relies on.

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::ffi::CStr;
use std::ptr::{self, NonNull};

use crate::error::HeapError;

/// Alignment of every page base address.
///
/// Offsets inside a page are aligned relative to the base, so any
/// alignment up to this value holds for absolute addresses too.
pub(crate) const PAGE_ALIGN: usize = 16;

/// An owned, zero-initialised block of raw memory backing one page.
pub(crate) struct RawBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl RawBlock {
    /// Allocate a zeroed block of `size` bytes aligned to [`PAGE_ALIGN`].
    ///
    /// Returns `SizeOverflow` if `size` cannot form a valid layout. A null
    /// return from the system allocator is fatal.
    pub(crate) fn zeroed(size: usize) -> Result<Self, HeapError> {
        let layout = Layout::from_size_align(size.max(1), PAGE_ALIGN)
            .map_err(|_| HeapError::SizeOverflow { requested: size })?;
        // SAFETY: `layout` has non-zero size (clamped to at least 1 above).
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        match NonNull::new(raw) {
            Some(ptr) => Ok(Self { ptr, layout }),
            None => alloc::handle_alloc_error(layout),
        }
    }

    /// Usable size of the block in bytes.
    pub(crate) fn len(&self) -> usize {
        self.layout.size()
    }

    /// Pointer to `offset` bytes past the base.
    ///
    /// # Panics
    ///
    /// Panics if `offset` lies beyond the end of the block.
    pub(crate) fn at(&self, offset: usize) -> NonNull<u8> {
        assert!(offset <= self.len(), "offset {offset} outside block");
        // SAFETY: `offset <= len`, so the result stays within (or one past)
        // the allocation, and a non-null base plus an in-bounds offset is
        // non-null.
        unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(offset)) }
    }

    /// Zero `len` bytes starting at `offset`.
    ///
    /// Callers must hold exclusive access to the range: no live reference
    /// may point into it.
    pub(crate) fn zero(&mut self, offset: usize, len: usize) {
        let end = offset.checked_add(len).unwrap_or(usize::MAX);
        assert!(end <= self.len(), "zero range {offset}..{end} outside block");
        // SAFETY: the range was bounds-checked above and `&mut self`
        // guarantees no other writer through this block handle.
        unsafe { ptr::write_bytes(self.ptr.as_ptr().add(offset), 0, len) };
    }

    /// Whether `addr` lies inside this block.
    pub(crate) fn contains(&self, addr: usize) -> bool {
        let base = self.ptr.as_ptr() as usize;
        addr >= base && addr < base + self.len()
    }
}

impl Drop for RawBlock {
    fn drop(&mut self) {
        // SAFETY: `ptr` was returned by `alloc_zeroed` with exactly `layout`
        // and is freed only here.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// View `len` freshly reserved bytes at `ptr` as a mutable slice.
///
/// # Safety
///
/// `ptr..ptr + len` must lie inside a live page, be initialised, and not be
/// reachable through any other live reference for `'a`.
pub(crate) unsafe fn bytes_mut<'a>(ptr: NonNull<u8>, len: usize) -> &'a mut [u8] {
    // SAFETY: forwarded to the caller.
    unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), len) }
}

/// Move `value` into the reserved slot at `ptr`.
///
/// # Safety
///
/// `ptr` must be aligned for `T`, point at `size_of::<T>()` reserved bytes
/// inside a live page (or be dangling for a zero-sized `T`), and not alias
/// any other live reference for `'a`.
pub(crate) unsafe fn write_value<'a, T>(ptr: NonNull<u8>, value: T) -> &'a mut T {
    let slot = ptr.cast::<T>();
    // SAFETY: forwarded to the caller.
    unsafe {
        slot.as_ptr().write(value);
        &mut *slot.as_ptr()
    }
}

/// Write `value` into element `index` of the reserved array at `ptr`.
///
/// # Safety
///
/// Same as [`write_value`], for an array of at least `index + 1` elements.
pub(crate) unsafe fn write_element<T>(ptr: NonNull<u8>, index: usize, value: T) {
    // SAFETY: forwarded to the caller.
    unsafe { ptr.cast::<T>().as_ptr().add(index).write(value) };
}

/// View `len` initialised elements at `ptr` as a mutable slice.
///
/// # Safety
///
/// All `len` elements must have been written, and the memory must not
/// alias any other live reference for `'a`.
pub(crate) unsafe fn slice_mut<'a, T>(ptr: NonNull<u8>, len: usize) -> &'a mut [T] {
    // SAFETY: forwarded to the caller.
    unsafe { std::slice::from_raw_parts_mut(ptr.cast::<T>().as_ptr(), len) }
}

/// Reinterpret bytes copied from a `&str` as a `&str`.
///
/// # Safety
///
/// `bytes` must be a byte-for-byte copy of a valid `&str`.
pub(crate) unsafe fn str_from_copy(bytes: &[u8]) -> &str {
    debug_assert!(std::str::from_utf8(bytes).is_ok());
    // SAFETY: forwarded to the caller.
    unsafe { std::str::from_utf8_unchecked(bytes) }
}

/// Reinterpret bytes copied from a `&CStr`, terminator included.
///
/// # Safety
///
/// `bytes` must be a byte-for-byte copy of a `&CStr` including its single
/// trailing NUL.
pub(crate) unsafe fn c_str_from_copy(bytes: &[u8]) -> &CStr {
    debug_assert!(CStr::from_bytes_with_nul(bytes).is_ok());
    // SAFETY: forwarded to the caller.
    unsafe { CStr::from_bytes_with_nul_unchecked(bytes) }
}

/// A type-erased deferred destructor for `len` values of one type.
pub(crate) struct DropEntry {
    ptr: NonNull<u8>,
    len: usize,
    drop_fn: unsafe fn(NonNull<u8>, usize),
}

impl DropEntry {
    /// Record that `len` values of `T` at `ptr` must be dropped later.
    ///
    /// # Safety
    ///
    /// `ptr` must point at `len` initialised values of `T` that nothing
    /// else will drop, and the memory must stay valid until [`run`] is
    /// called.
    ///
    /// [`run`]: DropEntry::run
    pub(crate) unsafe fn new<T>(ptr: NonNull<T>, len: usize) -> Self {
        Self {
            ptr: ptr.cast(),
            len,
            drop_fn: drop_slice::<T>,
        }
    }

    /// Number of values this entry destroys.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Run the destructors, in forward index order.
    pub(crate) fn run(self) {
        // SAFETY: the contract of `DropEntry::new` guarantees the values are
        // live and owned by this entry, and `self` is consumed so they are
        // dropped at most once.
        unsafe { (self.drop_fn)(self.ptr, self.len) }
    }
}

unsafe fn drop_slice<T>(ptr: NonNull<u8>, len: usize) {
    let slice = ptr::slice_from_raw_parts_mut(ptr.cast::<T>().as_ptr(), len);
    // SAFETY: upheld by `DropEntry::new`.
    unsafe { ptr::drop_in_place(slice) }
}

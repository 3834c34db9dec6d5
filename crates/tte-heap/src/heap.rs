//! The linear heap: typed allocation over a [`PageList`] with
//! context-scoped deferred destructors.
//!
//! Allocation takes `&self` and hands out references tied to that borrow.
//! Everything that reclaims memory (`pop_context`, `rollback`,
//! `release_all`) takes `&mut self`, so the borrow checker guarantees no
//! reference into the heap survives the reclamation of its memory.

use std::alloc::Layout;
use std::cell::RefCell;
use std::ffi::CStr;
use std::fmt;
use std::mem;
use std::ptr::NonNull;

use tracing::{debug, trace};

use crate::config::HeapConfig;
use crate::context::ContextStack;
use crate::error::HeapError;
use crate::page::PageList;
use crate::raw::{self, DropEntry, PAGE_ALIGN};

/// Largest alignment accepted by [`LinearHeap::alloc`].
pub const MAX_ALIGN: usize = 8;

/// Point-in-time telemetry for a [`LinearHeap`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Pages currently owned.
    pub page_count: usize,
    /// Sum of page sizes in bytes.
    pub total_bytes: usize,
    /// Bytes skipped at page ends since the last rollback.
    pub fragmented_bytes: usize,
    /// Open contexts, not counting the base context.
    pub context_depth: usize,
    /// Values whose destructor is still pending.
    pub tracked_objects: usize,
}

/// A paged bump allocator with nested destructor scopes.
///
/// The heap is single-thread owned (`!Send`, `!Sync`). A context opened
/// with [`push_context`](Self::push_context) collects the destructors of
/// every tracked value allocated while it is innermost, and runs them in
/// creation order at the matching [`pop_context`](Self::pop_context).
///
/// ```
/// use tte_heap::LinearHeap;
///
/// let mut heap = LinearHeap::new(4096);
/// heap.push_context();
/// let names = heap.new_array_with(3, |i| format!("bone_{i}"));
/// assert_eq!(names[2], "bone_2");
/// heap.pop_context(); // the three strings are dropped here
/// ```
pub struct LinearHeap {
    config: HeapConfig,
    pages: RefCell<PageList>,
    contexts: RefCell<ContextStack>,
}

impl LinearHeap {
    /// Create a heap whose pages are at least `page_size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `page_size` fails [`HeapConfig::validate`].
    pub fn new(page_size: u32) -> Self {
        match Self::with_config(HeapConfig::new(page_size)) {
            Ok(heap) => heap,
            Err(e) => panic!("{e}"),
        }
    }

    /// Create a heap from a validated config.
    pub fn with_config(config: HeapConfig) -> Result<Self, HeapError> {
        config.validate()?;
        Ok(Self {
            pages: RefCell::new(PageList::new(config.page_size)),
            contexts: RefCell::new(ContextStack::new()),
            config,
        })
    }

    /// The configuration this heap was built with.
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    // ── Raw allocation ──────────────────────────────────────────

    /// Bump-allocate `size` zeroed bytes aligned to `align`.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two in `1..=8`, or if `size`
    /// cannot be represented as a page. Out-of-memory aborts via
    /// [`std::alloc::handle_alloc_error`].
    #[allow(clippy::mut_from_ref)]
    pub fn alloc(&self, size: usize, align: usize) -> &mut [u8] {
        match self.try_alloc(size, align) {
            Ok(bytes) => bytes,
            Err(e) => panic!("{e}"),
        }
    }

    /// Like [`alloc`](Self::alloc) but reports an unrepresentable size as
    /// [`HeapError::SizeOverflow`] instead of panicking.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two in `1..=8`.
    #[allow(clippy::mut_from_ref, unsafe_code)]
    pub fn try_alloc(&self, size: usize, align: usize) -> Result<&mut [u8], HeapError> {
        assert!(
            align.is_power_of_two() && align <= MAX_ALIGN,
            "alignment {align} must be a power of two in 1..={MAX_ALIGN}"
        );
        if size == 0 {
            return Ok(&mut []);
        }
        let layout = Layout::from_size_align(size, align)
            .map_err(|_| HeapError::SizeOverflow { requested: size })?;
        let ptr = self.pages.borrow_mut().alloc(layout)?;
        // SAFETY: the page list just reserved and zeroed `size` bytes at
        // `ptr`; nothing else refers to them until this context closes.
        Ok(unsafe { raw::bytes_mut(ptr, size) })
    }

    fn reserve<T>(&self, count: usize) -> NonNull<u8> {
        assert!(
            mem::align_of::<T>() <= PAGE_ALIGN,
            "{} requires alignment above {PAGE_ALIGN}",
            std::any::type_name::<T>()
        );
        let layout = match Layout::array::<T>(count) {
            Ok(layout) => layout,
            Err(_) => panic!(
                "array of {count} {} overflows",
                std::any::type_name::<T>()
            ),
        };
        match self.pages.borrow_mut().alloc(layout) {
            Ok(ptr) => ptr,
            Err(e) => panic!("{e}"),
        }
    }

    // ── Typed allocation ────────────────────────────────────────

    /// Move `value` into the heap. Its destructor runs when the current
    /// context is popped, or at rollback.
    ///
    /// Tracked values must be `'static` because their destructor runs after
    /// the borrow that created them has ended.
    #[allow(clippy::mut_from_ref, unsafe_code)]
    pub fn new_object<T: 'static>(&self, value: T) -> &mut T {
        let ptr = self.reserve::<T>(1);
        // SAFETY: `ptr` is a fresh, suitably aligned slot for one `T`.
        let slot = unsafe { raw::write_value(ptr, value) };
        if mem::needs_drop::<T>() {
            // SAFETY: the slot holds an initialised `T` that only this
            // entry will drop; the page outlives the context.
            let entry = unsafe { DropEntry::new(ptr.cast::<T>(), 1) };
            self.contexts.borrow_mut().register(entry);
        }
        slot
    }

    /// Allocate `count` clones of `value` as one contiguous array. All
    /// elements are destroyed in index order when the context pops.
    #[allow(clippy::mut_from_ref)]
    pub fn new_array<T: Clone + 'static>(&self, count: usize, value: T) -> &mut [T] {
        self.new_array_with(count, |_| value.clone())
    }

    /// Allocate `count` elements built by `init(index)`.
    ///
    /// `init` may itself allocate from this heap. If it panics, the
    /// elements built so far are leaked, not dropped.
    #[allow(clippy::mut_from_ref, unsafe_code)]
    pub fn new_array_with<T: 'static>(
        &self,
        count: usize,
        init: impl FnMut(usize) -> T,
    ) -> &mut [T] {
        let ptr = self.construct(count, init);
        if mem::needs_drop::<T>() && count > 0 {
            // SAFETY: `construct` initialised all `count` elements.
            let entry = unsafe { DropEntry::new(ptr.cast::<T>(), count) };
            self.contexts.borrow_mut().register(entry);
        }
        // SAFETY: all elements are initialised and exclusively ours.
        unsafe { raw::slice_mut(ptr, count) }
    }

    /// Move `value` into the heap without registering a destructor. The
    /// heap never drops it; the caller owns its lifetime.
    #[allow(clippy::mut_from_ref, unsafe_code)]
    pub fn new_no_destruct<T>(&self, value: T) -> &mut T {
        let ptr = self.reserve::<T>(1);
        // SAFETY: `ptr` is a fresh, suitably aligned slot for one `T`.
        unsafe { raw::write_value(ptr, value) }
    }

    /// Allocate `count` default values without registering destructors.
    #[allow(clippy::mut_from_ref, unsafe_code)]
    pub fn new_array_no_destruct<T: Default>(&self, count: usize) -> &mut [T] {
        let ptr = self.construct(count, |_| T::default());
        // SAFETY: all elements are initialised and exclusively ours.
        unsafe { raw::slice_mut(ptr, count) }
    }

    #[allow(unsafe_code)]
    fn construct<T>(&self, count: usize, mut init: impl FnMut(usize) -> T) -> NonNull<u8> {
        let ptr = self.reserve::<T>(count);
        for index in 0..count {
            let value = init(index);
            // SAFETY: `index < count` and the array slot is reserved for us.
            unsafe { raw::write_element(ptr, index, value) };
        }
        ptr
    }

    // ── Strings ─────────────────────────────────────────────────

    /// Copy `bytes` into the heap followed by a NUL terminator. The
    /// returned slice excludes the terminator.
    pub fn intern_bytes(&self, bytes: &[u8]) -> &[u8] {
        let buf = self.alloc(bytes.len() + 1, 1);
        buf[..bytes.len()].copy_from_slice(bytes);
        &buf[..bytes.len()]
    }

    /// Copy a string into the heap followed by a NUL terminator.
    #[allow(unsafe_code)]
    pub fn intern_str(&self, s: &str) -> &str {
        let bytes = self.intern_bytes(s.as_bytes());
        // SAFETY: `bytes` is a verbatim copy of `s`.
        unsafe { raw::str_from_copy(bytes) }
    }

    /// Copy a C string, terminator included, into the heap.
    #[allow(unsafe_code)]
    pub fn intern_c_str(&self, s: &CStr) -> &CStr {
        let src = s.to_bytes_with_nul();
        let buf = self.alloc(src.len(), 1);
        buf.copy_from_slice(src);
        // SAFETY: `buf` is a verbatim copy of `s` with its terminator.
        unsafe { raw::c_str_from_copy(buf) }
    }

    // ── Contexts ────────────────────────────────────────────────

    /// Open a destructor scope.
    pub fn push_context(&mut self) {
        let mark = self.pages.get_mut().mark();
        let contexts = self.contexts.get_mut();
        contexts.push(mark);
        trace!(depth = contexts.depth(), "heap context pushed");
    }

    /// Close the innermost scope: run its destructors in creation order and
    /// rewind the cursor to where the scope was opened.
    ///
    /// Returns `false` (and does nothing) when no scope is open.
    pub fn pop_context(&mut self) -> bool {
        match self.contexts.get_mut().pop() {
            Some(mark) => {
                self.pages.get_mut().restore(mark);
                trace!(depth = self.contexts.get_mut().depth(), "heap context popped");
                true
            }
            None => false,
        }
    }

    /// Run `f` inside a fresh context that is popped when `f` returns.
    pub fn scoped<R>(&mut self, f: impl FnOnce(&LinearHeap) -> R) -> R {
        self.push_context();
        let out = f(self);
        self.pop_context();
        out
    }

    /// Number of open contexts, not counting the base context.
    pub fn context_depth(&self) -> usize {
        self.contexts.borrow().depth()
    }

    // ── Reset ───────────────────────────────────────────────────

    /// Pop every context (running all pending destructors, innermost
    /// first), zero the pages, and rewind to the start of the first page.
    /// Pages stay allocated for reuse.
    pub fn rollback(&mut self) {
        let destroyed = self.contexts.get_mut().unwind_all();
        let pages = self.pages.get_mut();
        pages.rollback();
        trace!(destroyed, pages = pages.page_count(), "heap rolled back");
    }

    /// Roll back, then return every page to the system allocator.
    pub fn release_all(&mut self) {
        self.rollback();
        let pages = self.pages.get_mut();
        if pages.page_count() > 0 {
            debug!(
                pages = pages.page_count(),
                bytes = pages.total_bytes(),
                "heap pages released"
            );
        }
        pages.release();
    }

    // ── Telemetry ───────────────────────────────────────────────

    /// Bytes skipped at page ends since the last rollback.
    pub fn fragmented_bytes(&self) -> usize {
        self.pages.borrow().fragmented_bytes()
    }

    /// Fragmented bytes as a percentage of all page memory.
    pub fn fragmentation_factor(&self) -> f32 {
        let pages = self.pages.borrow();
        match pages.total_bytes() {
            0 => 0.0,
            total => pages.fragmented_bytes() as f32 / total as f32 * 100.0,
        }
    }

    /// Bytes left in the current page, or the page size while no page has
    /// been allocated yet.
    pub fn current_page_bytes_free(&self) -> usize {
        self.pages.borrow().current_free()
    }

    /// Sum of page sizes in bytes.
    pub fn total_bytes(&self) -> usize {
        self.pages.borrow().total_bytes()
    }

    /// Pages currently owned.
    pub fn page_count(&self) -> usize {
        self.pages.borrow().page_count()
    }

    /// Whether `ptr` points into memory owned by this heap.
    pub fn contains<T: ?Sized>(&self, ptr: *const T) -> bool {
        self.pages.borrow().contains(ptr.cast::<u8>() as usize)
    }

    /// Snapshot of all telemetry counters.
    pub fn stats(&self) -> HeapStats {
        let pages = self.pages.borrow();
        let contexts = self.contexts.borrow();
        HeapStats {
            page_count: pages.page_count(),
            total_bytes: pages.total_bytes(),
            fragmented_bytes: pages.fragmented_bytes(),
            context_depth: contexts.depth(),
            tracked_objects: contexts.tracked(),
        }
    }
}

impl Default for LinearHeap {
    fn default() -> Self {
        Self::new(HeapConfig::DEFAULT_PAGE_SIZE)
    }
}

impl Drop for LinearHeap {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl fmt::Debug for LinearHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinearHeap")
            .field("page_size", &self.config.page_size)
            .field("stats", &self.stats())
            .finish()
    }
}

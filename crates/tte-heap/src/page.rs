//! Pages and the ordered page list the heap bump-allocates from.
//!
//! A [`Page`] is a contiguous zeroed block. A [`PageList`] keeps pages in
//! allocation order together with the bump cursor. When the current page
//! cannot fit a request, the list walks forward looking for a later page
//! large enough to reuse, and only appends a new page when none fits.

use std::alloc::Layout;
use std::ptr::NonNull;

use tracing::debug;

use crate::error::HeapError;
use crate::raw::{RawBlock, PAGE_ALIGN};

/// A single page of heap memory.
///
/// Pages are owned by one heap and freed only on release.
pub struct Page {
    block: RawBlock,
    /// Highest offset ever handed out since the page was last cleared.
    high_water: usize,
}

impl Page {
    fn new(size: usize) -> Result<Self, HeapError> {
        Ok(Self {
            block: RawBlock::zeroed(size)?,
            high_water: 0,
        })
    }

    /// Page size in bytes.
    pub fn size(&self) -> usize {
        self.block.len()
    }

    /// Bytes ever used since the last clear.
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Zero the used prefix of the page.
    fn clear(&mut self) {
        self.block.zero(0, self.high_water);
        self.high_water = 0;
    }

    /// Zero and claim `offset..offset + len`.
    fn claim(&mut self, offset: usize, len: usize) -> NonNull<u8> {
        self.block.zero(offset, len);
        self.high_water = self.high_water.max(offset + len);
        self.block.at(offset)
    }
}

/// A saved allocation position: page index plus byte offset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageMark {
    /// Index into the page list.
    pub page: usize,
    /// Byte offset within that page.
    pub offset: usize,
}

/// Ordered list of pages with a bump cursor.
pub struct PageList {
    pages: Vec<Page>,
    page_size: usize,
    current: usize,
    cursor: usize,
    fragmented: usize,
    total: usize,
}

impl PageList {
    /// Create an empty list. No memory is reserved until the first
    /// allocation.
    pub fn new(page_size: u32) -> Self {
        Self {
            pages: Vec::new(),
            page_size: page_size as usize,
            current: 0,
            cursor: 0,
            fragmented: 0,
            total: 0,
        }
    }

    /// Reserve zeroed memory for `layout`.
    ///
    /// Zero-sized layouts never touch a page and yield a dangling pointer
    /// aligned to `layout.align()`.
    pub fn alloc(&mut self, layout: Layout) -> Result<NonNull<u8>, HeapError> {
        debug_assert!(layout.align() <= PAGE_ALIGN);
        let size = layout.size();
        if size == 0 {
            return Ok(dangling(layout.align()));
        }
        if self.pages.is_empty() {
            self.append_page(size)?;
        }

        let page_size = self.pages[self.current].size();
        let aligned = align_up(self.cursor, layout.align());
        let offset = match aligned.checked_add(size) {
            Some(end) if end <= page_size => aligned,
            _ => {
                self.fragmented += page_size.saturating_sub(self.cursor);
                self.advance(size)?;
                0
            }
        };

        let ptr = self.pages[self.current].claim(offset, size);
        self.cursor = offset + size;
        Ok(ptr)
    }

    /// Move to the first later page that fits `size` bytes, appending a new
    /// page if none does. Skipped pages count as fragmented.
    fn advance(&mut self, size: usize) -> Result<(), HeapError> {
        for next in self.current + 1..self.pages.len() {
            let page = &mut self.pages[next];
            if page.size() >= size {
                page.clear();
                self.current = next;
                self.cursor = 0;
                return Ok(());
            }
            self.fragmented += page.size();
        }
        self.append_page(size)
    }

    fn append_page(&mut self, size: usize) -> Result<(), HeapError> {
        let page = Page::new(size.max(self.page_size))?;
        debug!(
            page_size = page.size(),
            page_index = self.pages.len(),
            "linear heap page allocated"
        );
        self.total += page.size();
        self.pages.push(page);
        self.current = self.pages.len() - 1;
        self.cursor = 0;
        Ok(())
    }

    /// Current allocation position.
    pub fn mark(&self) -> PageMark {
        PageMark {
            page: self.current,
            offset: self.cursor,
        }
    }

    /// Rewind the cursor to a position previously returned by [`mark`](Self::mark).
    pub fn restore(&mut self, mark: PageMark) {
        if mark.page < self.pages.len() {
            self.current = mark.page;
            self.cursor = mark.offset;
        } else {
            self.current = 0;
            self.cursor = 0;
        }
    }

    /// Zero every page, rewind to the first one, and reset fragmentation.
    pub fn rollback(&mut self) {
        for page in &mut self.pages {
            page.clear();
        }
        self.current = 0;
        self.cursor = 0;
        self.fragmented = 0;
    }

    /// Free every page.
    pub fn release(&mut self) {
        self.pages.clear();
        self.current = 0;
        self.cursor = 0;
        self.fragmented = 0;
        self.total = 0;
    }

    /// Bytes left in the current page. Before the first page exists this
    /// is the configured page size, which the first allocation will get.
    pub fn current_free(&self) -> usize {
        self.pages
            .get(self.current)
            .map_or(self.page_size, |page| page.size() - self.cursor)
    }

    /// Whether `addr` lies inside any page.
    pub fn contains(&self, addr: usize) -> bool {
        self.pages.iter().any(|page| page.block.contains(addr))
    }

    /// Pages in allocation order.
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Number of pages held.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Sum of all page sizes in bytes.
    pub fn total_bytes(&self) -> usize {
        self.total
    }

    /// Bytes skipped at page ends since the last rollback.
    pub fn fragmented_bytes(&self) -> usize {
        self.fragmented
    }
}

fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

fn dangling(align: usize) -> NonNull<u8> {
    NonNull::new(std::ptr::without_provenance_mut(align)).unwrap_or(NonNull::dangling())
}

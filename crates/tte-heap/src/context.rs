//! Destructor scopes.
//!
//! Each frame remembers where the cursor was when it was opened and the
//! deferred destructors registered while it was the innermost frame. Frame 0
//! is the base context and is never popped, only drained.

use smallvec::SmallVec;

use crate::page::PageMark;
use crate::raw::DropEntry;

pub(crate) struct ContextFrame {
    mark: PageMark,
    drops: SmallVec<[DropEntry; 8]>,
}

impl ContextFrame {
    fn new(mark: PageMark) -> Self {
        Self {
            mark,
            drops: SmallVec::new(),
        }
    }

    /// Run every deferred destructor in registration order.
    fn run_destructors(&mut self) -> usize {
        let mut values = 0;
        for entry in self.drops.drain(..) {
            values += entry.len();
            entry.run();
        }
        values
    }
}

pub(crate) struct ContextStack {
    frames: Vec<ContextFrame>,
}

impl ContextStack {
    pub(crate) fn new() -> Self {
        Self {
            frames: vec![ContextFrame::new(PageMark::default())],
        }
    }

    pub(crate) fn push(&mut self, mark: PageMark) {
        self.frames.push(ContextFrame::new(mark));
    }

    /// Close the innermost pushed frame, returning where its cursor was.
    ///
    /// Returns `None` when only the base context is open.
    pub(crate) fn pop(&mut self) -> Option<PageMark> {
        if self.frames.len() <= 1 {
            return None;
        }
        let mut frame = self.frames.pop()?;
        frame.run_destructors();
        Some(frame.mark)
    }

    /// Close every pushed frame innermost first, then drain the base frame.
    /// Returns the number of values destroyed.
    pub(crate) fn unwind_all(&mut self) -> usize {
        let mut values = 0;
        while let Some(mut frame) = self.frames.pop() {
            values += frame.run_destructors();
        }
        self.frames.push(ContextFrame::new(PageMark::default()));
        values
    }

    pub(crate) fn register(&mut self, entry: DropEntry) {
        if self.frames.is_empty() {
            self.frames.push(ContextFrame::new(PageMark::default()));
        }
        if let Some(frame) = self.frames.last_mut() {
            frame.drops.push(entry);
        }
    }

    /// Pushed frames, not counting the base context.
    pub(crate) fn depth(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }

    /// Values with a pending destructor across all frames.
    pub(crate) fn tracked(&self) -> usize {
        self.frames
            .iter()
            .flat_map(|frame| frame.drops.iter())
            .map(DropEntry::len)
            .sum()
    }
}

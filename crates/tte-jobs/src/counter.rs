//! Fixed-capacity pool of job counters.
//!
//! Every posted job owns one slot for as long as the scheduler still has to
//! run or retire it, or any [`JobHandle`](crate::JobHandle) refers to it.
//! Slots are found through an availability bitset. A slot is addressed by
//! `(index, JobId)`: because ids are never reused, a lookup with an id that
//! no longer matches the slot's occupant is simply "unknown", which keeps
//! stale handles from observing a later job's result.

use smallvec::SmallVec;

use crate::job::{Job, JobId, JobResult};

/// Bookkeeping for one job.
#[derive(Debug)]
pub(crate) struct CounterSlot {
    pub(crate) job: JobId,
    /// Live `JobHandle`s referring to this job.
    pub(crate) handle_refs: u32,
    /// The scheduler still has to run or retire the job.
    pub(crate) scheduled: bool,
    /// `None` until the job reaches a terminal result.
    pub(crate) result: JobResult,
    /// Set when the job was cancelled with `cancel_queued = true`.
    pub(crate) cancel_queued: bool,
    /// Parent slot while the job is parked as a continuation.
    pub(crate) waiting_on: Option<u32>,
    pub(crate) continuations: SmallVec<[Job; 1]>,
}

impl CounterSlot {
    fn vacant() -> Self {
        Self {
            job: JobId::INVALID,
            handle_refs: 0,
            scheduled: false,
            result: JobResult::None,
            cancel_queued: false,
            waiting_on: None,
            continuations: SmallVec::new(),
        }
    }
}

pub(crate) struct CounterPool {
    slots: Vec<CounterSlot>,
    /// One bit per slot; set means free.
    available: Vec<u64>,
    /// Word index where the next search starts.
    hint: usize,
    live: usize,
    peak: usize,
}

impl CounterPool {
    pub(crate) fn new(capacity: usize) -> Self {
        let words = capacity.div_ceil(64);
        let mut available = vec![u64::MAX; words];
        let tail = capacity % 64;
        if tail != 0 {
            if let Some(last) = available.last_mut() {
                *last = (1u64 << tail) - 1;
            }
        }
        Self {
            slots: (0..capacity).map(|_| CounterSlot::vacant()).collect(),
            available,
            hint: 0,
            live: 0,
            peak: 0,
        }
    }

    /// Claim a free slot for `job` with one handle reference and the
    /// scheduler's reference. Returns `None` when the pool is exhausted.
    pub(crate) fn acquire(&mut self, job: JobId) -> Option<u32> {
        let words = self.available.len();
        let word = (0..words)
            .map(|i| (self.hint + i) % words)
            .find(|&w| self.available[w] != 0)?;
        let bit = self.available[word].trailing_zeros() as usize;
        self.available[word] &= !(1u64 << bit);
        self.hint = word;

        let index = word * 64 + bit;
        let slot = &mut self.slots[index];
        *slot = CounterSlot::vacant();
        slot.job = job;
        slot.handle_refs = 1;
        slot.scheduled = true;

        self.live += 1;
        self.peak = self.peak.max(self.live);
        Some(index as u32)
    }

    pub(crate) fn get(&self, index: u32, job: JobId) -> Option<&CounterSlot> {
        self.slots
            .get(index as usize)
            .filter(|slot| job != JobId::INVALID && slot.job == job)
    }

    pub(crate) fn get_mut(&mut self, index: u32, job: JobId) -> Option<&mut CounterSlot> {
        self.slots
            .get_mut(index as usize)
            .filter(|slot| job != JobId::INVALID && slot.job == job)
    }

    /// Slot by index, without an id check. Only for slots the caller
    /// knows are occupied (e.g. the slot of a job it holds).
    pub(crate) fn slot_mut(&mut self, index: u32) -> &mut CounterSlot {
        &mut self.slots[index as usize]
    }

    /// Add a handle reference. Returns false for an unknown job.
    pub(crate) fn add_ref(&mut self, index: u32, job: JobId) -> bool {
        match self.get_mut(index, job) {
            Some(slot) => {
                slot.handle_refs += 1;
                true
            }
            None => false,
        }
    }

    /// Drop a handle reference, freeing the slot if nothing else holds it.
    pub(crate) fn release_ref(&mut self, index: u32, job: JobId) {
        if let Some(slot) = self.get_mut(index, job) {
            slot.handle_refs = slot.handle_refs.saturating_sub(1);
            self.free_if_unreferenced(index);
        }
    }

    /// Drop the scheduler's reference once the job is retired or cancelled.
    pub(crate) fn release_scheduler(&mut self, index: u32) {
        self.slots[index as usize].scheduled = false;
        self.free_if_unreferenced(index);
    }

    fn free_if_unreferenced(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        if slot.handle_refs > 0 || slot.scheduled {
            return;
        }
        debug_assert!(slot.continuations.is_empty());
        slot.job = JobId::INVALID;
        slot.result = JobResult::None;
        let index = index as usize;
        self.available[index / 64] |= 1u64 << (index % 64);
        self.live -= 1;
    }

    /// Remove parked continuation `job` from the parent at `parent`.
    pub(crate) fn take_continuation(&mut self, parent: u32, job: JobId) -> Option<Job> {
        let list = &mut self.slots.get_mut(parent as usize)?.continuations;
        let pos = list.iter().position(|c| c.id == job)?;
        Some(list.remove(pos))
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn free(&self) -> usize {
        self.slots.len() - self.live
    }

    pub(crate) fn live(&self) -> usize {
        self.live
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak
    }
}

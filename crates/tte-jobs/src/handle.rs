//! Reference-counted job handles.
//!
//! A [`JobHandle`] names one posted job. Cloning adds a reference to the
//! job's counter slot and dropping removes it; once the last handle is gone
//! and the job has retired, the slot returns to the pool and the job's
//! result is no longer queryable.
//!
//! Handles hold only a weak reference to their scheduler, so they can
//! outlive it; every operation on a handle whose scheduler is gone (or that
//! belongs to a different scheduler) reports [`JobResult::None`].
//!
//! [`JobResult::None`]: crate::JobResult::None

use std::fmt;
use std::sync::{Arc, Weak};

use crate::job::JobId;
use crate::scheduler::Shared;

/// A ticket for querying, waiting on, cancelling, or chaining after a job.
///
/// The default handle is invalid and refers to no job.
pub struct JobHandle {
    id: JobId,
    slot: u32,
    owner: Weak<Shared>,
}

impl JobHandle {
    /// A handle that refers to no job.
    pub fn invalid() -> Self {
        Self {
            id: JobId::INVALID,
            slot: 0,
            owner: Weak::new(),
        }
    }

    /// Wrap a slot reference that the counter pool has already counted.
    pub(crate) fn adopt(id: JobId, slot: u32, owner: &Arc<Shared>) -> Self {
        Self {
            id,
            slot,
            owner: Arc::downgrade(owner),
        }
    }

    /// Whether this handle refers to a job.
    pub fn is_valid(&self) -> bool {
        self.id != JobId::INVALID
    }

    /// The job's id, or [`JobId::INVALID`].
    pub fn id(&self) -> JobId {
        self.id
    }

    pub(crate) fn slot(&self) -> u32 {
        self.slot
    }

    /// Release this reference and make the handle invalid.
    pub fn reset(&mut self) {
        *self = Self::invalid();
    }

    pub(crate) fn belongs_to(&self, shared: &Arc<Shared>) -> bool {
        self.is_valid() && std::ptr::eq(self.owner.as_ptr(), Arc::as_ptr(shared))
    }
}

impl Default for JobHandle {
    fn default() -> Self {
        Self::invalid()
    }
}

impl Clone for JobHandle {
    fn clone(&self) -> Self {
        if self.is_valid() {
            if let Some(shared) = self.owner.upgrade() {
                shared.retain(self.slot, self.id);
            }
        }
        Self {
            id: self.id,
            slot: self.slot,
            owner: self.owner.clone(),
        }
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        if !self.is_valid() {
            return;
        }
        if let Some(shared) = self.owner.upgrade() {
            shared.release(self.slot, self.id);
        }
    }
}

impl PartialEq for JobHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Weak::ptr_eq(&self.owner, &other.owner)
    }
}

impl Eq for JobHandle {}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("slot", &self.slot)
            .finish()
    }
}

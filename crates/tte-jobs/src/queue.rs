//! Pending-job priority queue.
//!
//! Unpinned jobs share one max-heap; jobs pinned to a worker go into that
//! worker's own heap. A worker pops whichever of the two tops ranks higher,
//! so affinity never lets a lower-priority job jump ahead of higher-priority
//! work that worker could run.

use std::collections::BinaryHeap;

use crate::job::{Job, JobId};

pub(crate) struct JobQueue {
    shared: BinaryHeap<Job>,
    pinned: Vec<BinaryHeap<Job>>,
    next_seq: u64,
}

impl JobQueue {
    pub(crate) fn new(workers: usize) -> Self {
        Self {
            shared: BinaryHeap::new(),
            pinned: (0..workers).map(|_| BinaryHeap::new()).collect(),
            next_seq: 0,
        }
    }

    /// Queue a job. Returns true if it is pinned to a specific worker.
    pub(crate) fn push(&mut self, mut job: Job) -> bool {
        job.seq = self.next_seq;
        self.next_seq += 1;
        match job.affinity.and_then(|w| self.pinned.get_mut(w)) {
            Some(heap) => {
                heap.push(job);
                true
            }
            None => {
                self.shared.push(job);
                false
            }
        }
    }

    /// Pop the highest-ranked job `worker` may run.
    pub(crate) fn pop_for(&mut self, worker: usize) -> Option<Job> {
        let own_top = self.pinned.get(worker).and_then(BinaryHeap::peek);
        let take_pinned = match (self.shared.peek(), own_top) {
            (Some(shared), Some(pinned)) => pinned > shared,
            (None, Some(_)) => true,
            _ => false,
        };
        if take_pinned {
            self.pinned.get_mut(worker).and_then(BinaryHeap::pop)
        } else {
            self.shared.pop()
        }
    }

    /// Remove a specific queued job.
    pub(crate) fn remove(&mut self, id: JobId) -> Option<Job> {
        std::iter::once(&mut self.shared)
            .chain(self.pinned.iter_mut())
            .find_map(|heap| take_from(heap, id))
    }

    /// Remove every queued job.
    pub(crate) fn drain(&mut self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.shared.drain().collect();
        for heap in &mut self.pinned {
            jobs.extend(heap.drain());
        }
        jobs
    }

    pub(crate) fn len(&self) -> usize {
        self.shared.len() + self.pinned.iter().map(BinaryHeap::len).sum::<usize>()
    }
}

fn take_from(heap: &mut BinaryHeap<Job>, id: JobId) -> Option<Job> {
    if !heap.iter().any(|job| job.id == id) {
        return None;
    }
    let mut jobs = std::mem::take(heap).into_vec();
    let taken = jobs
        .iter()
        .position(|job| job.id == id)
        .map(|pos| jobs.swap_remove(pos));
    *heap = BinaryHeap::from(jobs);
    taken
}

//! Blocking primitives for driving worker threads into known states.
//!
//! A [`Gate`] parks any number of threads until it is opened once. A
//! [`Latch`] counts down to zero and releases waiters when it gets there.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct GateState {
    open: Mutex<bool>,
    cond: Condvar,
}

/// One-shot gate. Cloning shares the same gate.
#[derive(Clone, Debug, Default)]
pub struct Gate {
    state: Arc<GateState>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Release every current and future waiter.
    pub fn open(&self) {
        *self.state.open.lock() = true;
        self.state.cond.notify_all();
    }

    pub fn is_open(&self) -> bool {
        *self.state.open.lock()
    }

    /// Block until the gate opens.
    pub fn wait(&self) {
        let mut open = self.state.open.lock();
        while !*open {
            self.state.cond.wait(&mut open);
        }
    }

    /// Block until the gate opens or `timeout` elapses. Returns whether the
    /// gate is open.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut open = self.state.open.lock();
        while !*open {
            if self.state.cond.wait_until(&mut open, deadline).timed_out() {
                break;
            }
        }
        *open
    }
}

#[derive(Debug)]
struct LatchState {
    remaining: Mutex<usize>,
    cond: Condvar,
}

/// Countdown latch. Cloning shares the same latch.
#[derive(Clone, Debug)]
pub struct Latch {
    state: Arc<LatchState>,
}

impl Latch {
    pub fn new(count: usize) -> Self {
        Self {
            state: Arc::new(LatchState {
                remaining: Mutex::new(count),
                cond: Condvar::new(),
            }),
        }
    }

    pub fn count_down(&self) {
        let mut remaining = self.state.remaining.lock();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.state.cond.notify_all();
        }
    }

    pub fn remaining(&self) -> usize {
        *self.state.remaining.lock()
    }

    /// Block until the count reaches zero or `timeout` elapses. Returns
    /// whether it reached zero.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut remaining = self.state.remaining.lock();
        while *remaining > 0 {
            if self.state.cond.wait_until(&mut remaining, deadline).timed_out() {
                break;
            }
        }
        *remaining == 0
    }
}

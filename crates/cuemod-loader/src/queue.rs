//! Cancellation and drain tracking for the worker pool.
//!
//! The token here is the same one the registry, cache, and selector check;
//! the loader hands it down through the locator so in-flight registry and
//! cache I/O stops too. Pending queue tasks are drained without execution;
//! packages not yet marked imports-loaded keep their partial state and the
//! whole load fails with `LoadError::Cancelled`.

use parking_lot::{Condvar, Mutex};

pub use cuemod_cache::CancelToken;

/// Counts outstanding queue tasks; the pool drains when it reaches zero.
pub(crate) struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    pub fn new() -> Pending {
        Pending {
            count: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    pub fn inc(&self) {
        *self.count.lock() += 1;
    }

    pub fn dec(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    /// Block until no task remains. Tasks are free to enqueue further
    /// tasks, so the count may rise again before it finally drains.
    pub fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }
}

// Copyright 2015-2016 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Wakes threads that called `retry` when some transaction commits.
///
/// Writers bump a generation counter on every commit. A retrying thread
/// remembers the generation it started at and sleeps until it changes.
pub struct ControlBlock {
    generation: AtomicUsize,

    /// Number of sleeping threads. Committers skip the mutex while it is 0.
    waiters: AtomicUsize,

    /// a lock needed for the condition variable
    lock: Mutex<()>,

    /// condition variable that is used for pausing and
    /// waking the thread
    wait_cvar: Condvar,
}

impl Default for ControlBlock {
    fn default() -> ControlBlock {
        ControlBlock::new()
    }
}

impl ControlBlock {
    pub fn new() -> ControlBlock {
        ControlBlock {
            generation: AtomicUsize::new(0),
            waiters: AtomicUsize::new(0),
            lock: Mutex::new(()),
            wait_cvar: Condvar::new(),
        }
    }

    #[inline]
    pub fn generation(&self) -> usize {
        self.generation.load(Ordering::SeqCst)
    }

    /// Inform waiting threads that a transaction has committed.
    pub fn set_changed(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) > 0 {
            let _guard = self.lock.lock();
            self.wait_cvar.notify_all();
        }
    }

    /// Block until the generation differs from `seen`, or `timeout` passed.
    ///
    /// Returns true if a commit happened.
    pub fn wait(&self, seen: usize, timeout: Duration) -> bool {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.lock.lock();
        while self.generation() == seen {
            if self.wait_cvar.wait_for(&mut guard, timeout).timed_out() {
                break;
            }
        }
        drop(guard);
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        self.generation() != seen
    }
}

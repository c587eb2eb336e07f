// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Registered threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::Backoff;
use parking_lot::RwLock;

use crate::error::Error;
use crate::metadata::ThreadId;

/// The part of a thread's state other threads look at.
///
/// `epoch` is odd while the thread runs a transaction. Algorithm switches
/// and irrevocable transactions wait for it to become even; the allocator
/// compares snapshots of it to decide when freed memory is unreachable.
#[derive(Debug)]
pub(crate) struct ThreadSlot {
    id: ThreadId,
    epoch: AtomicUsize,
}

impl ThreadSlot {
    pub fn id(&self) -> ThreadId {
        self.id
    }

    #[inline]
    pub fn epoch(&self) -> usize {
        self.epoch.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn in_tx(&self) -> bool {
        self.epoch() & 1 == 1
    }

    /// Mark the thread as inside a transaction.
    #[inline]
    pub fn enter(&self) {
        let prev = self.epoch.fetch_add(1, Ordering::SeqCst);
        debug_assert_eq!(prev & 1, 0, "thread entered a transaction twice");
    }

    #[inline]
    pub fn leave(&self) {
        let prev = self.epoch.fetch_add(1, Ordering::SeqCst);
        debug_assert_eq!(prev & 1, 1, "thread left a transaction it was not in");
    }
}

/// Table of registered threads, indexed by id - 1.
pub(crate) struct Registry {
    slots: RwLock<Vec<Option<Arc<ThreadSlot>>>>,
    max_threads: usize,
}

impl Registry {
    pub fn new(max_threads: usize) -> Registry {
        Registry { slots: RwLock::new(Vec::new()), max_threads }
    }

    /// Give the caller the lowest free id.
    pub fn register(&self) -> Result<Arc<ThreadSlot>, Error> {
        let mut slots = self.slots.write();
        let index = match slots.iter().position(Option::is_none) {
            Some(i) => i,
            None if slots.len() < self.max_threads => {
                slots.push(None);
                slots.len() - 1
            }
            None => return Err(Error::TooManyThreads(self.max_threads)),
        };

        let slot = Arc::new(ThreadSlot {
            id: ThreadId::new(index as u32 + 1),
            epoch: AtomicUsize::new(0),
        });
        slots[index] = Some(slot.clone());
        Ok(slot)
    }

    pub fn unregister(&self, id: ThreadId) {
        let mut slots = self.slots.write();
        if let Some(entry) = slots.get_mut(id.slot()) {
            *entry = None;
        }
    }

    pub fn len(&self) -> usize {
        self.slots.read().iter().flatten().count()
    }

    /// All registered threads.
    pub fn snapshot(&self) -> Vec<Arc<ThreadSlot>> {
        self.slots.read().iter().flatten().cloned().collect()
    }

    /// Spin until no registered thread other than `except` is inside a
    /// transaction.
    pub fn wait_for_quiescence(&self, except: Option<ThreadId>) {
        for slot in self.snapshot() {
            if Some(slot.id) == except {
                continue;
            }
            let backoff = Backoff::new();
            while slot.in_tx() {
                backoff.snooze();
            }
        }
    }
}

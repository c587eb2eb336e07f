// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Reader-writer locks with one reader byte per thread (TLRW bytelocks).

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use super::{ReaderWriterLock, ThreadId};

/// Number of reader bytes. Together with the owner word a lock fills one
/// cache line, so only threads `1..=60` can use bytelock algorithms.
pub const BYTELOCK_READERS: usize = 60;

/// A writer id plus a visible reader byte per thread.
///
/// Readers publish their byte and then look at the owner, writers publish
/// the owner and then look at the reader bytes. Both sides use sequentially
/// consistent accesses so at least one of them sees the other.
pub struct ByteLock {
    owner: AtomicU32,
    readers: [AtomicU8; BYTELOCK_READERS],
}

impl Default for ByteLock {
    fn default() -> ByteLock {
        ByteLock {
            owner: AtomicU32::new(0),
            readers: std::array::from_fn(|_| AtomicU8::new(0)),
        }
    }
}

impl ByteLock {
    /// Id of the writer, 0 if none.
    #[inline]
    pub fn owner(&self) -> u32 {
        self.owner.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_owned_by(&self, id: ThreadId) -> bool {
        self.owner.load(Ordering::Relaxed) == id.get()
    }

    #[inline]
    pub fn try_acquire(&self, id: ThreadId) -> bool {
        self.owner
            .compare_exchange(0, id.get(), Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    pub fn release(&self) {
        self.owner.store(0, Ordering::Release);
    }

    #[inline]
    pub fn set_reader(&self, slot: usize) {
        self.readers[slot].store(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn clear_reader(&self, slot: usize) {
        self.readers[slot].store(0, Ordering::Release);
    }

    /// True if the thread in `slot` holds a read lease.
    #[inline]
    pub fn has_reader(&self, slot: usize) -> bool {
        self.readers[slot].load(Ordering::SeqCst) != 0
    }
}

impl ReaderWriterLock for ByteLock {
    const READER_SLOTS: usize = BYTELOCK_READERS;

    fn is_owned_by(&self, id: ThreadId) -> bool {
        ByteLock::is_owned_by(self, id)
    }

    fn is_free(&self) -> bool {
        self.owner() == 0
    }

    fn try_acquire(&self, id: ThreadId) -> bool {
        ByteLock::try_acquire(self, id)
    }

    fn release(&self) {
        ByteLock::release(self)
    }

    fn set_reader(&self, slot: usize) {
        ByteLock::set_reader(self, slot)
    }

    fn clear_reader(&self, slot: usize) {
        ByteLock::clear_reader(self, slot)
    }

    fn has_reader(&self, slot: usize) -> bool {
        ByteLock::has_reader(self, slot)
    }

    fn readers_drained(&self) -> bool {
        self.readers.iter().all(|r| r.load(Ordering::SeqCst) == 0)
    }
}

// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Reader-writer locks with a reader bitmap (bitlocks).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::{ReaderWriterLock, ThreadId};

/// Upper bound on registered threads, and the width of a reader record.
pub const MAX_THREADS: usize = 256;

const BITS: usize = u64::BITS as usize;
const BUCKETS: usize = MAX_THREADS / BITS;

/// Reader record: one bit per thread slot.
#[derive(Debug, Default)]
pub struct RRec {
    bits: [AtomicU64; BUCKETS],
}

#[inline]
fn locate(slot: usize) -> (usize, u64) {
    (slot / BITS, 1 << (slot % BITS))
}

impl RRec {
    #[inline]
    pub fn set_bit(&self, slot: usize) {
        let (bucket, mask) = locate(slot);
        if self.bits[bucket].load(Ordering::Relaxed) & mask == 0 {
            self.bits[bucket].fetch_or(mask, Ordering::SeqCst);
        }
    }

    #[inline]
    pub fn get_bit(&self, slot: usize) -> bool {
        let (bucket, mask) = locate(slot);
        self.bits[bucket].load(Ordering::SeqCst) & mask != 0
    }

    #[inline]
    pub fn unset_bit(&self, slot: usize) {
        let (bucket, mask) = locate(slot);
        if self.bits[bucket].load(Ordering::Relaxed) & mask != 0 {
            self.bits[bucket].fetch_and(!mask, Ordering::Release);
        }
    }

    /// Raw content of one 64-slot bucket.
    #[inline]
    pub fn bucket(&self, bucket: usize) -> u64 {
        self.bits[bucket].load(Ordering::SeqCst)
    }

    pub const fn buckets() -> usize {
        BUCKETS
    }

    pub fn is_empty(&self) -> bool {
        (0..BUCKETS).all(|b| self.bucket(b) == 0)
    }
}

/// A writer id plus a reader record.
#[derive(Debug, Default)]
pub struct BitLock {
    owner: AtomicUsize,
    pub readers: RRec,
}

impl BitLock {
    #[inline]
    pub fn owner(&self) -> usize {
        self.owner.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_owned_by(&self, id: ThreadId) -> bool {
        self.owner.load(Ordering::Relaxed) == id.get() as usize
    }

    #[inline]
    pub fn try_acquire(&self, id: ThreadId) -> bool {
        self.owner
            .compare_exchange(0, id.get() as usize, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    pub fn release(&self) {
        self.owner.store(0, Ordering::Release);
    }
}

impl ReaderWriterLock for BitLock {
    const READER_SLOTS: usize = MAX_THREADS;

    fn is_owned_by(&self, id: ThreadId) -> bool {
        BitLock::is_owned_by(self, id)
    }

    fn is_free(&self) -> bool {
        self.owner() == 0
    }

    fn try_acquire(&self, id: ThreadId) -> bool {
        BitLock::try_acquire(self, id)
    }

    fn release(&self) {
        BitLock::release(self)
    }

    fn set_reader(&self, slot: usize) {
        self.readers.set_bit(slot)
    }

    fn clear_reader(&self, slot: usize) {
        self.readers.unset_bit(slot)
    }

    fn has_reader(&self, slot: usize) -> bool {
        self.readers.get_bit(slot)
    }

    fn readers_drained(&self) -> bool {
        self.readers.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bits_span_buckets() {
        let r = RRec::default();
        r.set_bit(0);
        r.set_bit(64);
        r.set_bit(255);
        assert!(r.get_bit(0) && r.get_bit(64) && r.get_bit(255));
        assert!(!r.get_bit(1));
        assert_eq!(r.bucket(1), 1);

        r.unset_bit(0);
        r.unset_bit(64);
        r.unset_bit(255);
        assert!(r.is_empty());
    }

    #[test]
    fn owner_and_readers() {
        let lock = BitLock::default();
        let a = ThreadId::new(3);
        assert!(ReaderWriterLock::is_free(&lock));
        assert!(lock.try_acquire(a));
        assert!(!lock.try_acquire(ThreadId::new(4)));
        assert!(lock.is_owned_by(a));

        lock.set_reader(a.slot());
        assert!(!lock.readers_drained());
        lock.clear_reader(a.slot());
        assert!(lock.readers_drained());
        lock.release();
        assert_eq!(lock.owner(), 0);
    }
}

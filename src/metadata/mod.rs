// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Conflict detection metadata.
//!
//! Every heap address maps to one cell of each table through a fixed hash.
//! Several addresses share a cell, which only causes false conflicts. The
//! tables never grow and the mapping never changes, so a cell index can be
//! stored in a transaction's logs and looked up again later.

pub mod bitlock;
pub mod bytelock;
pub mod orec;

use std::fmt;

use crate::memory::Addr;

pub use self::bitlock::{BitLock, RRec, MAX_THREADS};
pub use self::bytelock::{ByteLock, BYTELOCK_READERS};
pub use self::orec::{Orec, OrecWord, LOCK_BIT};

/// Identifier of a registered thread. Ids start at 1, 0 means "nobody".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(u32);

impl ThreadId {
    pub(crate) fn new(id: u32) -> ThreadId {
        debug_assert!(id > 0, "thread ids start at 1");
        ThreadId(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Zero-based slot used for reader bytes and bits.
    #[inline]
    pub(crate) fn slot(self) -> usize {
        (self.0 - 1) as usize
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The operations visible-reader algorithms need from a lock cell.
///
/// A cell has at most one writer (`owner`) and a read lease per thread
/// slot. Readers set their lease and then check the owner; writers take
/// the owner and then wait for the leases to drain.
pub trait ReaderWriterLock: Default + Send + Sync {
    /// Number of thread slots the cell has a lease for.
    const READER_SLOTS: usize;

    fn is_owned_by(&self, id: ThreadId) -> bool;

    /// True if no thread owns the cell.
    fn is_free(&self) -> bool;

    fn try_acquire(&self, id: ThreadId) -> bool;

    fn release(&self);

    fn set_reader(&self, slot: usize);

    fn clear_reader(&self, slot: usize);

    fn has_reader(&self, slot: usize) -> bool;

    /// True if no read lease is held.
    fn readers_drained(&self) -> bool;
}

/// A fixed-size hashed array of metadata cells.
pub struct LockTable<L> {
    cells: Box<[L]>,
    shift: u32,
}

impl<L: Default> LockTable<L> {
    /// Create a table of `len` cells. `shift` drops low address bits before
    /// hashing so that neighbouring words share a cell.
    pub fn new(len: usize, shift: u32) -> LockTable<L> {
        let cells = (0..len.max(1)).map(|_| L::default()).collect();
        LockTable { cells, shift }
    }
}

impl<L> LockTable<L> {
    /// Index of the cell covering `addr`.
    #[inline]
    pub fn index_of(&self, addr: Addr) -> usize {
        (addr.index() >> self.shift) % self.cells.len()
    }

    /// The cell covering `addr`.
    #[inline]
    pub fn get_lock_for(&self, addr: Addr) -> &L {
        &self.cells[self.index_of(addr)]
    }

    #[inline]
    pub fn get(&self, index: usize) -> &L {
        &self.cells[index]
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &L> {
        self.cells.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mapping_is_stable() {
        let table: LockTable<Orec> = LockTable::new(64, 0);
        let a = Addr::new(1234);
        assert_eq!(table.index_of(a), table.index_of(a));
        assert!(std::ptr::eq(table.get_lock_for(a), table.get(table.index_of(a))));
    }

    #[test]
    fn addresses_collide_modulo_len() {
        let table: LockTable<Orec> = LockTable::new(16, 0);
        assert_eq!(table.index_of(Addr::new(3)), table.index_of(Addr::new(19)));
        assert_ne!(table.index_of(Addr::new(3)), table.index_of(Addr::new(4)));
    }

    #[test]
    fn shift_groups_neighbours() {
        let table: LockTable<Orec> = LockTable::new(16, 2);
        assert_eq!(table.index_of(Addr::new(4)), table.index_of(Addr::new(7)));
        assert_ne!(table.index_of(Addr::new(4)), table.index_of(Addr::new(8)));
    }
}

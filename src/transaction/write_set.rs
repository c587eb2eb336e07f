// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Redo log of lazy algorithms.

use rustc_hash::FxHashMap;

use crate::memory::{Addr, Heap, Word};

/// A buffered write: the bits of `val` selected by `mask` go to `addr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSetEntry {
    pub addr: Addr,
    pub val: Word,
    pub mask: Word,
}

impl WriteSetEntry {
    pub fn new(addr: Addr, val: Word, mask: Word) -> WriteSetEntry {
        WriteSetEntry { addr, val, mask }
    }

    /// Merge a later write to the same address.
    #[inline]
    fn update(&mut self, val: Word, mask: Word) {
        self.val = (self.val & !mask) | (val & mask);
        self.mask |= mask;
    }

    #[inline]
    pub fn writeback(&self, heap: &Heap) {
        heap.store_masked(self.addr, self.val, self.mask);
    }
}

/// Result of looking up an address in the write set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// The address was not written.
    Miss,
    /// Every requested bit was written; this is the value.
    Hit(Word),
    /// Only some bits were written. The caller has to read memory and
    /// overlay the entry.
    Partial(WriteSetEntry),
}

/// Address -> pending value. Later writes to an address replace the bits
/// they cover, and write-back happens in first-write order.
#[derive(Debug, Default)]
pub struct WriteSet {
    index: FxHashMap<Addr, usize>,
    entries: Vec<WriteSetEntry>,
}

impl WriteSet {
    pub fn new() -> WriteSet {
        WriteSet::default()
    }

    pub fn insert(&mut self, entry: WriteSetEntry) {
        match self.index.get(&entry.addr) {
            Some(&i) => self.entries[i].update(entry.val, entry.mask),
            None => {
                self.index.insert(entry.addr, self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    #[inline]
    pub fn find(&self, addr: Addr, mask: Word) -> Lookup {
        if self.entries.is_empty() {
            return Lookup::Miss;
        }
        match self.index.get(&addr) {
            None => Lookup::Miss,
            Some(&i) => {
                let entry = self.entries[i];
                if entry.mask & mask == mask {
                    Lookup::Hit(entry.val)
                } else {
                    Lookup::Partial(entry)
                }
            }
        }
    }

    /// Value of `addr` as the transaction sees it, given what memory holds.
    pub fn overlay(entry: &WriteSetEntry, memory: Word) -> Word {
        (memory & !entry.mask) | (entry.val & entry.mask)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, WriteSetEntry> {
        self.entries.iter()
    }

    /// Copy every buffered value to memory.
    pub fn writeback(&self, heap: &Heap) {
        for entry in &self.entries {
            entry.writeback(heap);
        }
    }

    pub fn reset(&mut self) {
        self.index.clear();
        self.entries.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::memory::FULL_MASK;

    fn full(addr: Addr, val: Word) -> WriteSetEntry {
        WriteSetEntry::new(addr, val, FULL_MASK)
    }

    #[test]
    fn last_writer_wins() {
        let mut ws = WriteSet::new();
        let a = Addr::new(3);
        ws.insert(full(a, 1));
        ws.insert(full(a, 2));
        assert_eq!(ws.len(), 1);
        assert_eq!(ws.find(a, FULL_MASK), Lookup::Hit(2));
        assert_eq!(ws.find(Addr::new(4), FULL_MASK), Lookup::Miss);
    }

    #[test]
    fn partial_writes_merge() {
        let mut ws = WriteSet::new();
        let a = Addr::new(1);
        ws.insert(WriteSetEntry::new(a, 0x00AA, 0x00FF));
        assert_eq!(ws.find(a, 0x00FF), Lookup::Hit(0x00AA));

        let entry = match ws.find(a, FULL_MASK) {
            Lookup::Partial(e) => e,
            other => panic!("expected partial hit, got {:?}", other),
        };
        assert_eq!(WriteSet::overlay(&entry, 0x1234), 0x12AA);

        ws.insert(WriteSetEntry::new(a, 0xBB00, 0xFF00));
        assert_eq!(ws.find(a, 0xFFFF), Lookup::Hit(0xBBAA));
    }

    #[test]
    fn writeback_in_first_write_order() {
        let heap = Heap::new(8);
        let mut ws = WriteSet::new();
        ws.insert(full(Addr::new(2), 20));
        ws.insert(full(Addr::new(1), 10));
        let order: Vec<Addr> = ws.iter().map(|e| e.addr).collect();
        assert_eq!(order, vec![Addr::new(2), Addr::new(1)]);

        ws.writeback(&heap);
        assert_eq!(heap.load(Addr::new(1)), 10);
        assert_eq!(heap.load(Addr::new(2)), 20);

        ws.reset();
        assert!(ws.is_empty());
        assert_eq!(ws.find(Addr::new(1), FULL_MASK), Lookup::Miss);
    }
}

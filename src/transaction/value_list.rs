// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::memory::{Addr, Heap, Word};

/// A value a transaction read and depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueListEntry {
    pub addr: Addr,
    pub val: Word,
    pub mask: Word,
}

impl ValueListEntry {
    /// Does memory still hold the value that was read?
    #[inline]
    pub fn is_valid(&self, heap: &Heap) -> bool {
        (heap.load(self.addr) ^ self.val) & self.mask == 0
    }
}

/// Read log of value-based validation.
#[derive(Debug, Default)]
pub struct ValueList {
    entries: Vec<ValueListEntry>,
}

impl ValueList {
    pub fn new() -> ValueList {
        ValueList::default()
    }

    #[inline]
    pub fn insert(&mut self, addr: Addr, val: Word, mask: Word) {
        self.entries.push(ValueListEntry { addr, val, mask });
    }

    /// Re-read every logged address and compare.
    pub fn is_valid(&self, heap: &Heap) -> bool {
        self.entries.iter().all(|e| e.is_valid(heap))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::memory::FULL_MASK;

    #[test]
    fn detects_changed_values() {
        let heap = Heap::new(4);
        let mut vl = ValueList::new();
        heap.store(Addr::new(1), 5);
        vl.insert(Addr::new(1), 5, FULL_MASK);
        assert!(vl.is_valid(&heap));

        heap.store(Addr::new(1), 6);
        assert!(!vl.is_valid(&heap));
    }

    #[test]
    fn ignores_bits_outside_the_mask() {
        let heap = Heap::new(4);
        let mut vl = ValueList::new();
        heap.store(Addr::new(1), 0x0F);
        vl.insert(Addr::new(1), 0x0F, 0x0F);
        heap.store(Addr::new(1), 0xFF);
        assert!(vl.is_valid(&heap));
    }
}

// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::memory::{Addr, Heap, Word};

/// Old content of a word overwritten in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoLogEntry {
    pub addr: Addr,
    pub val: Word,
    pub mask: Word,
}

/// Undo log of eager algorithms.
#[derive(Debug, Default)]
pub struct UndoLog {
    entries: Vec<UndoLogEntry>,
}

impl UndoLog {
    pub fn new() -> UndoLog {
        UndoLog::default()
    }

    /// Record the bits of `old` under `mask` before `addr` is overwritten.
    #[inline]
    pub fn insert(&mut self, addr: Addr, old: Word, mask: Word) {
        self.entries.push(UndoLogEntry { addr, val: old, mask });
    }

    /// Restore memory, newest entry first.
    pub fn undo(&self, heap: &Heap) {
        for entry in self.entries.iter().rev() {
            heap.store_masked(entry.addr, entry.val, entry.mask);
        }
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

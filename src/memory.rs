// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The shared heap transactions operate on.
//!
//! Memory is an array of atomic machine words. Transactions name locations
//! by `Addr`, a word index into that array, so every access the algorithms
//! perform (in-place writes, undo, write-back, racy reads of doomed
//! transactions) is an atomic operation on a live word.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::Error;

/// The unit of transactional memory.
pub type Word = usize;

/// Mask selecting every bit of a word.
pub const FULL_MASK: Word = !0;

/// Address of a word in the transactional heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Addr(usize);

impl Addr {
    /// The null address. The heap never hands it out.
    pub const NULL: Addr = Addr(0);

    pub const fn new(index: usize) -> Addr {
        Addr(index)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }

    /// Address of the word `words` after `self`.
    #[inline]
    pub const fn offset(self, words: usize) -> Addr {
        Addr(self.0 + words)
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Values that fit into a single heap word.
pub trait WordValue: Copy + Send + Sync + 'static {
    fn into_word(self) -> Word;
    fn from_word(word: Word) -> Self;
}

macro_rules! word_value_int {
    ($($t:ty),*) => {
        $(
            impl WordValue for $t {
                #[inline]
                fn into_word(self) -> Word {
                    self as Word
                }

                #[inline]
                fn from_word(word: Word) -> Self {
                    word as $t
                }
            }
        )*
    };
}

word_value_int!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

impl WordValue for bool {
    #[inline]
    fn into_word(self) -> Word {
        self as Word
    }

    #[inline]
    fn from_word(word: Word) -> Self {
        word != 0
    }
}

impl WordValue for Addr {
    #[inline]
    fn into_word(self) -> Word {
        self.0
    }

    #[inline]
    fn from_word(word: Word) -> Self {
        Addr(word)
    }
}

/// Bookkeeping of the heap allocator.
///
/// Only touched by allocation and reclamation, never by the read and write
/// barriers.
struct HeapState {
    /// First never-allocated word.
    next: usize,

    /// Start index -> length of every live block.
    live: FxHashMap<usize, usize>,

    /// Released blocks, by length.
    free: BTreeMap<usize, Vec<usize>>,
}

/// Fixed-capacity array of words plus a block allocator.
pub struct Heap {
    words: Box<[AtomicUsize]>,
    state: Mutex<HeapState>,
}

impl Heap {
    /// Create a heap with room for `capacity` words.
    ///
    /// Word 0 backs `Addr::NULL` and is never allocated.
    pub fn new(capacity: usize) -> Heap {
        let words = (0..capacity.max(1)).map(|_| AtomicUsize::new(0)).collect();
        Heap {
            words,
            state: Mutex::new(HeapState {
                next: 1,
                live: FxHashMap::default(),
                free: BTreeMap::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.words.len()
    }

    #[inline]
    fn word(&self, addr: Addr) -> &AtomicUsize {
        match self.words.get(addr.0) {
            Some(w) => w,
            None => panic!("STM: address {} outside of the heap", addr),
        }
    }

    /// Read a word.
    #[inline]
    pub fn load(&self, addr: Addr) -> Word {
        self.word(addr).load(Ordering::Acquire)
    }

    /// Write a whole word.
    #[inline]
    pub fn store(&self, addr: Addr, val: Word) {
        self.word(addr).store(val, Ordering::Release);
    }

    /// Replace the bits of `addr` selected by `mask` with those of `val`.
    #[inline]
    pub fn store_masked(&self, addr: Addr, val: Word, mask: Word) {
        if mask == FULL_MASK {
            self.store(addr, val);
        } else {
            let _ = self.word(addr).fetch_update(Ordering::Release, Ordering::Relaxed, |old| {
                Some((old & !mask) | (val & mask))
            });
        }
    }

    /// Allocate a zeroed block of `words` words.
    pub fn allocate(&self, words: usize) -> Result<Addr, Error> {
        let words = words.max(1);
        let mut state = self.state.lock();

        let reused = state.free.get_mut(&words).and_then(Vec::pop);
        let start = match reused {
            Some(start) => {
                for i in start..start + words {
                    self.words[i].store(0, Ordering::Release);
                }
                start
            }
            None => {
                if state.next + words > self.words.len() {
                    return Err(Error::OutOfMemory { requested: words });
                }
                let start = state.next;
                state.next += words;
                start
            }
        };

        state.live.insert(start, words);
        Ok(Addr(start))
    }

    /// Return a block to the allocator. Returns its length.
    pub fn release(&self, addr: Addr) -> Result<usize, Error> {
        let mut state = self.state.lock();
        let words = state.live.remove(&addr.0).ok_or(Error::InvalidFree(addr))?;
        state.free.entry(words).or_default().push(addr.0);
        Ok(words)
    }

    /// Returns true if `addr` is the start of a live block.
    pub fn is_allocated(&self, addr: Addr) -> bool {
        self.state.lock().live.contains_key(&addr.0)
    }

    /// Number of words in live blocks.
    pub fn allocated_words(&self) -> usize {
        self.state.lock().live.values().sum()
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Heap")
            .field("capacity", &self.capacity())
            .field("allocated", &self.allocated_words())
            .finish()
    }
}

// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Transactional allocation with epoch-based reclamation.
//!
//! Blocks allocated by a transaction are returned to the heap if it aborts.
//! Blocks it frees are kept until it commits, and then parked in a limbo
//! list, because concurrent transactions may still be reading them. A limbo
//! batch remembers the epoch of every thread that was inside a transaction
//! when the batch was created, and is reclaimed once all of them moved on.

use std::collections::VecDeque;
use std::sync::Arc;

use crossbeam_utils::Backoff;
use tracing::warn;

use crate::error::Error;
use crate::memory::{Addr, Heap};
use crate::metadata::ThreadId;
use crate::registry::{Registry, ThreadSlot};

struct Limbo {
    blocks: Vec<Addr>,
    /// Threads that were in a transaction, with the epoch they were in.
    active: Vec<(Arc<ThreadSlot>, usize)>,
}

impl Limbo {
    fn is_safe(&self) -> bool {
        self.active.iter().all(|(slot, epoch)| slot.epoch() != *epoch)
    }
}

#[derive(Default)]
pub(crate) struct TxAllocator {
    allocs: Vec<Addr>,
    frees: Vec<Addr>,
    limbo: VecDeque<Limbo>,
}

fn release(heap: &Heap, addr: Addr) {
    if let Err(e) = heap.release(addr) {
        warn!("dropping deferred free: {}", e);
    }
}

impl TxAllocator {
    pub fn new() -> TxAllocator {
        TxAllocator::default()
    }

    pub fn alloc(&mut self, heap: &Heap, words: usize) -> Result<Addr, Error> {
        let addr = heap.allocate(words)?;
        self.allocs.push(addr);
        Ok(addr)
    }

    pub fn free(&mut self, addr: Addr) {
        self.frees.push(addr);
    }

    /// Undo the transaction's allocations and forget its frees.
    pub fn on_abort(&mut self, heap: &Heap) {
        for addr in self.allocs.drain(..) {
            release(heap, addr);
        }
        self.frees.clear();
    }

    /// Keep the transaction's allocations and schedule its frees.
    ///
    /// With `immediate` no other transaction can hold a reference, so the
    /// frees happen right away.
    pub fn on_commit(&mut self, heap: &Heap, registry: &Registry, me: ThreadId, immediate: bool) {
        self.allocs.clear();

        if !self.frees.is_empty() {
            if immediate {
                for addr in self.frees.drain(..) {
                    release(heap, addr);
                }
            } else {
                let active = registry
                    .snapshot()
                    .into_iter()
                    .filter(|slot| slot.id() != me)
                    .filter_map(|slot| {
                        let epoch = slot.epoch();
                        (epoch & 1 == 1).then(|| (slot, epoch))
                    })
                    .collect();
                let blocks = std::mem::take(&mut self.frees);
                self.limbo.push_back(Limbo { blocks, active });
            }
        }

        self.reclaim(heap);
    }

    /// Release every limbo batch that is no longer reachable.
    pub fn reclaim(&mut self, heap: &Heap) {
        while self.limbo.front().map_or(false, Limbo::is_safe) {
            if let Some(batch) = self.limbo.pop_front() {
                for addr in batch.blocks {
                    release(heap, addr);
                }
            }
        }
    }

    /// Wait for all limbo batches to become reclaimable and release them.
    pub fn flush(&mut self, heap: &Heap) {
        let backoff = Backoff::new();
        while !self.limbo.is_empty() {
            self.reclaim(heap);
            backoff.snooze();
        }
    }

    /// Blocks waiting in limbo.
    pub fn pending(&self) -> usize {
        self.limbo.iter().map(|l| l.blocks.len()).sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn abort_returns_allocations() {
        let heap = Heap::new(32);
        let mut a = TxAllocator::new();
        a.alloc(&heap, 4).unwrap();
        assert_eq!(heap.allocated_words(), 4);
        a.on_abort(&heap);
        assert_eq!(heap.allocated_words(), 0);
    }

    #[test]
    fn frees_wait_for_active_readers() {
        let heap = Heap::new(32);
        let registry = Registry::new(4);
        let me = registry.register().unwrap();
        let other = registry.register().unwrap();

        let block = heap.allocate(2).unwrap();
        let mut a = TxAllocator::new();

        other.enter();
        a.free(block);
        a.on_commit(&heap, &registry, me.id(), false);
        assert_eq!(a.pending(), 1);
        assert!(heap.is_allocated(block));

        other.leave();
        a.reclaim(&heap);
        assert_eq!(a.pending(), 0);
        assert!(!heap.is_allocated(block));
    }

    #[test]
    fn immediate_commit_frees_at_once() {
        let heap = Heap::new(32);
        let registry = Registry::new(4);
        let me = registry.register().unwrap();
        let block = heap.allocate(2).unwrap();

        let mut a = TxAllocator::new();
        a.free(block);
        a.on_commit(&heap, &registry, me.id(), true);
        assert!(!heap.is_allocated(block));
    }

    #[test]
    fn abort_forgets_frees() {
        let heap = Heap::new(32);
        let block = heap.allocate(1).unwrap();
        let mut a = TxAllocator::new();
        a.free(block);
        a.on_abort(&heap);
        assert!(heap.is_allocated(block));
    }
}

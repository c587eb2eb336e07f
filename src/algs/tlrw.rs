// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Visible readers: ByteEager and BitEager.
//!
//! A reader takes a read lease on the lock cell before it trusts memory, a
//! writer takes the owner field and waits until every lease is gone, then
//! writes in place with an undo log. Readers are never invalidated, so
//! nothing is validated. Every wait is bounded by a spin limit; running
//! out of it aborts, which also breaks reader/writer deadlocks.
//!
//! The two algorithms differ only in the lock cell.

use std::time::{Duration, Instant};

use crossbeam_utils::Backoff;
use rand::Rng;

use super::{Algorithm, AlgorithmKind};
use crate::config::LockTimeouts;
use crate::globals::Globals;
use crate::memory::{Addr, Word};
use crate::metadata::{BitLock, ByteLock, LockTable, ReaderWriterLock, ThreadId};
use crate::result::{StmError, StmResult};
use crate::stm::Shared;
use crate::transaction::descriptor::{Mode, TxThread};

pub(crate) struct Tlrw<L: 'static> {
    kind: AlgorithmKind,
    table: fn(&Shared) -> &LockTable<L>,
    timeouts: fn(&Shared) -> LockTimeouts,
}

fn bytelocks(shared: &Shared) -> &LockTable<ByteLock> {
    &shared.bytelocks
}

fn bytelock_timeouts(shared: &Shared) -> LockTimeouts {
    shared.config.bytelock_timeouts
}

fn bitlocks(shared: &Shared) -> &LockTable<BitLock> {
    &shared.bitlocks
}

fn bitlock_timeouts(shared: &Shared) -> LockTimeouts {
    shared.config.bitlock_timeouts
}

pub(crate) static BYTE_EAGER: Tlrw<ByteLock> = Tlrw {
    kind: AlgorithmKind::ByteEager,
    table: bytelocks,
    timeouts: bytelock_timeouts,
};

pub(crate) static BIT_EAGER: Tlrw<BitLock> = Tlrw {
    kind: AlgorithmKind::BitEager,
    table: bitlocks,
    timeouts: bitlock_timeouts,
};

/// Spin until `done` holds, at most `limit` times.
fn spin_until<F: Fn() -> bool>(limit: u32, done: F) -> StmResult<()> {
    let backoff = Backoff::new();
    let mut tries = 0;
    while !done() {
        tries += 1;
        if tries > limit {
            return Err(StmError::Conflict);
        }
        backoff.spin();
    }
    Ok(())
}

/// Randomized exponential backoff after an abort, so that threads which
/// keep timing out on each other's locks drift apart.
fn backoff_after_abort(tx: &mut TxThread, min: u32, max: u32) {
    let bits = tx.consec_aborts.saturating_add(min).min(max);
    let nanos = tx.rng.gen_range(0..1u64 << bits);
    let deadline = Instant::now() + Duration::from_nanos(nanos);
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}

impl<L: ReaderWriterLock + 'static> Tlrw<L> {
    fn release_all(&self, tx: &TxThread, shared: &Shared) {
        let table = (self.table)(shared);
        let slot = tx.id.slot();
        for &index in &tx.w_rwlocks {
            table.get(index).release();
        }
        for &index in &tx.r_rwlocks {
            table.get(index).clear_reader(slot);
        }
    }
}

impl<L: ReaderWriterLock + 'static> Algorithm for Tlrw<L> {
    fn kind(&self) -> AlgorithmKind {
        self.kind
    }

    fn privatization_safe(&self) -> bool {
        true
    }

    fn admits(&self, id: ThreadId) -> bool {
        id.slot() < L::READER_SLOTS
    }

    fn begin(&self, _tx: &mut TxThread, _shared: &Shared) {}

    fn read(&self, tx: &mut TxThread, shared: &Shared, addr: Addr, _mask: Word) -> StmResult<Word> {
        let index = (self.table)(shared).index_of(addr);
        let lock = (self.table)(shared).get(index);
        let slot = tx.id.slot();

        if lock.is_owned_by(tx.id) || lock.has_reader(slot) {
            return Ok(shared.heap.load(addr));
        }

        tx.r_rwlocks.push(index);
        let limit = (self.timeouts)(shared).read;
        loop {
            lock.set_reader(slot);
            if lock.is_free() {
                return Ok(shared.heap.load(addr));
            }
            // let the writer finish
            lock.clear_reader(slot);
            spin_until(limit, || lock.is_free())?;
        }
    }

    fn write(&self, tx: &mut TxThread, shared: &Shared, addr: Addr, val: Word, mask: Word) -> StmResult<()> {
        let index = (self.table)(shared).index_of(addr);
        let lock = (self.table)(shared).get(index);

        if !lock.is_owned_by(tx.id) {
            let timeouts = (self.timeouts)(shared);
            spin_until(timeouts.acquire, || lock.try_acquire(tx.id))?;
            tx.w_rwlocks.push(index);
            lock.clear_reader(tx.id.slot());
            spin_until(timeouts.drain, || lock.readers_drained())?;
        }

        tx.undo_log.insert(addr, shared.heap.load(addr), mask);
        shared.heap.store_masked(addr, val, mask);
        tx.mode = Mode::Writing;
        Ok(())
    }

    fn commit(&self, tx: &mut TxThread, shared: &Shared) -> StmResult<()> {
        self.release_all(tx, shared);
        Ok(())
    }

    fn rollback(&self, tx: &mut TxThread, shared: &Shared) {
        tx.undo_log.undo(&shared.heap);
        self.release_all(tx, shared);
        let config = &shared.config;
        backoff_after_abort(tx, config.backoff_min, config.backoff_max);
    }

    fn on_switch_to(&self, _globals: &Globals) {}
}

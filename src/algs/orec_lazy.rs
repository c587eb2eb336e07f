// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! OrecLazy: commit-time locking with a redo log.

use std::sync::atomic::Ordering;

use crossbeam_utils::Backoff;

use super::{orecs_valid, read_rw, Algorithm, AlgorithmKind, Irrevocability};
use crate::globals::Globals;
use crate::memory::{Addr, Word};
use crate::metadata::OrecWord;
use crate::result::{StmError, StmResult};
use crate::stm::Shared;
use crate::transaction::descriptor::{Mode, TxThread};
use crate::transaction::write_set::WriteSetEntry;

pub(crate) struct OrecLazy;

fn read_memory(tx: &mut TxThread, shared: &Shared, addr: Addr) -> StmResult<Word> {
    let index = shared.orecs.index_of(addr);
    let orec = shared.orecs.get(index);
    let backoff = Backoff::new();
    loop {
        let val = shared.heap.load(addr);
        let raw = orec.raw();

        if raw <= tx.start_time {
            tx.r_orecs.push(index);
            return Ok(val);
        }

        // a committer is writing back
        if OrecWord::is_locked(raw) {
            backoff.snooze();
            continue;
        }

        // too new: extend the snapshot and try again
        let now = shared.globals.timestamp.load(Ordering::Acquire);
        if !orecs_valid(tx, &shared.orecs, tx.start_time) {
            return Err(StmError::Conflict);
        }
        tx.start_time = now;
    }
}

/// Lock the orecs of the write set.
pub(crate) fn acquire_write_set(tx: &mut TxThread, shared: &Shared) -> StmResult<()> {
    for entry in tx.writes.iter() {
        let index = shared.orecs.index_of(entry.addr);
        let orec = shared.orecs.get(index);
        let raw = orec.raw();
        if raw <= tx.start_time {
            if !orec.try_lock(raw, tx.my_lock) {
                return Err(StmError::Conflict);
            }
            orec.save_previous(raw);
            tx.locks.push(index);
        } else if raw != tx.my_lock {
            return Err(StmError::Conflict);
        }
    }
    Ok(())
}

/// Unlock every acquired orec at its previous version.
pub(crate) fn release_locks(tx: &TxThread, shared: &Shared) {
    for &index in &tx.locks {
        shared.orecs.get(index).restore();
    }
}

impl Algorithm for OrecLazy {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::OrecLazy
    }

    fn privatization_safe(&self) -> bool {
        false
    }

    fn irrevocability(&self) -> Irrevocability {
        Irrevocability::InFlight
    }

    fn begin(&self, tx: &mut TxThread, shared: &Shared) {
        tx.start_time = shared.globals.timestamp.load(Ordering::Acquire);
    }

    fn read(&self, tx: &mut TxThread, shared: &Shared, addr: Addr, mask: Word) -> StmResult<Word> {
        if tx.mode == Mode::ReadOnly {
            return read_memory(tx, shared, addr);
        }
        read_rw(tx, addr, mask, |tx| read_memory(tx, shared, addr))
    }

    fn write(&self, tx: &mut TxThread, _shared: &Shared, addr: Addr, val: Word, mask: Word) -> StmResult<()> {
        tx.writes.insert(WriteSetEntry::new(addr, val, mask));
        tx.mode = Mode::Writing;
        Ok(())
    }

    fn commit(&self, tx: &mut TxThread, shared: &Shared) -> StmResult<()> {
        if tx.writes.is_empty() {
            return Ok(());
        }

        acquire_write_set(tx, shared)?;
        if !orecs_valid(tx, &shared.orecs, tx.start_time) {
            return Err(StmError::Conflict);
        }

        tx.writes.writeback(&shared.heap);
        let end_time = 1 + shared.globals.timestamp.fetch_add(1, Ordering::AcqRel);
        for &index in &tx.locks {
            shared.orecs.get(index).set_version(end_time);
        }
        Ok(())
    }

    fn rollback(&self, tx: &mut TxThread, shared: &Shared) {
        release_locks(tx, shared);
    }

    /// Every other thread is outside a transaction: if the reads are still
    /// valid, the buffered writes can go to memory right away.
    fn irrevoc(&self, tx: &mut TxThread, shared: &Shared) -> bool {
        if !orecs_valid(tx, &shared.orecs, tx.start_time) {
            return false;
        }
        tx.writes.writeback(&shared.heap);
        tx.clear_logs();
        true
    }

    fn on_switch_to(&self, globals: &Globals) {
        globals.timestamp.store(globals.max_version(), Ordering::Release);
    }
}

// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! OrecELA: OrecLazy made privatization safe.
//!
//! Transactions start at `last_complete` instead of `timestamp`, and leave
//! commit in the order they incremented the timestamp, advancing
//! `last_complete` behind them. A privatizer therefore never sees memory
//! an older committer has not finished writing back. Readers poll the
//! timestamp and validate whenever someone committed, so a doomed reader
//! stops before it can act on privatized data.

use std::sync::atomic::Ordering;

use crossbeam_utils::Backoff;

use super::orec_lazy::{acquire_write_set, release_locks};
use super::{complete_empty, orecs_valid, publish, read_rw, wait_for_turn, Algorithm, AlgorithmKind};
use crate::globals::Globals;
use crate::memory::{Addr, Word};
use crate::metadata::OrecWord;
use crate::result::{StmError, StmResult};
use crate::stm::Shared;
use crate::transaction::descriptor::{Mode, TxThread};
use crate::transaction::write_set::WriteSetEntry;

pub(crate) struct OrecEla;

/// Validate and move the start time to the newest point that is both
/// committed (`now`) and written back (`last_complete`).
fn extend(tx: &mut TxThread, shared: &Shared, now: usize) -> StmResult<()> {
    if !orecs_valid(tx, &shared.orecs, tx.start_time) {
        return Err(StmError::Conflict);
    }
    let complete = shared.globals.last_complete.load(Ordering::Acquire);
    tx.start_time = now.min(complete);
    Ok(())
}

fn read_memory(tx: &mut TxThread, shared: &Shared, addr: Addr) -> StmResult<Word> {
    let index = shared.orecs.index_of(addr);
    let orec = shared.orecs.get(index);
    let backoff = Backoff::new();
    loop {
        let val = shared.heap.load(addr);
        let raw = orec.raw();

        if raw <= tx.start_time {
            tx.r_orecs.push(index);
            let now = shared.globals.timestamp.load(Ordering::Acquire);
            if now != tx.start_time {
                extend(tx, shared, now)?;
            }
            return Ok(val);
        }

        if OrecWord::is_locked(raw) {
            backoff.snooze();
            continue;
        }

        let now = shared.globals.timestamp.load(Ordering::Acquire);
        extend(tx, shared, now)?;
    }
}

impl Algorithm for OrecEla {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::OrecELA
    }

    fn privatization_safe(&self) -> bool {
        true
    }

    fn begin(&self, tx: &mut TxThread, shared: &Shared) {
        tx.start_time = shared.globals.last_complete.load(Ordering::Acquire);
        tx.end_time = 0;
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

        // From here on the slot `end_time` must be completed, even on abort.
        tx.end_time = 1 + shared.globals.timestamp.fetch_add(1, Ordering::AcqRel);
        if tx.end_time != tx.start_time + 1 && !orecs_valid(tx, &shared.orecs, tx.start_time) {
            return Err(StmError::Conflict);
        }

        tx.writes.writeback(&shared.heap);
        for &index in &tx.locks {
            shared.orecs.get(index).set_version(tx.end_time);
        }

        let end_time = tx.end_time;
        wait_for_turn(&shared.globals, end_time);
        publish(tx, &shared.globals, end_time);
        tx.end_time = 0;
        Ok(())
    }

    fn rollback(&self, tx: &mut TxThread, shared: &Shared) {
        release_locks(tx, shared);
        let end_time = tx.end_time;
        if end_time != 0 {
            complete_empty(tx, &shared.globals, end_time);
            tx.end_time = 0;
        }
    }

    fn on_switch_to(&self, globals: &Globals) {
        let v = globals.max_version();
        globals.timestamp.store(v, Ordering::Release);
        globals.last_complete.store(v, Ordering::Release);
    }
}

// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! OrecEager: encounter-time locking with in-place writes and an undo log.

use std::sync::atomic::Ordering;

use super::{orecs_valid, Algorithm, AlgorithmKind};
use crate::globals::Globals;
use crate::memory::{Addr, Word};
use crate::metadata::OrecWord;
use crate::result::{StmError, StmResult};
use crate::stm::Shared;
use crate::transaction::descriptor::{Mode, TxThread};

pub(crate) struct OrecEager;

/// Revalidate the read set and move the start time up to the current
/// timestamp.
#[inline]
fn extend(tx: &mut TxThread, shared: &Shared) -> StmResult<()> {
    let now = shared.globals.timestamp.load(Ordering::Acquire);
    if !orecs_valid(tx, &shared.orecs, tx.start_time) {
        return Err(StmError::Conflict);
    }
    tx.start_time = now;
    Ok(())
}

impl Algorithm for OrecEager {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::OrecEager
    }

    fn privatization_safe(&self) -> bool {
        false
    }

    fn begin(&self, tx: &mut TxThread, shared: &Shared) {
        tx.start_time = shared.globals.timestamp.load(Ordering::Acquire);
    }

    fn read(&self, tx: &mut TxThread, shared: &Shared, addr: Addr, _mask: Word) -> StmResult<Word> {
        let index = shared.orecs.index_of(addr);
        let orec = shared.orecs.get(index);
        loop {
            let pre = orec.raw();
            let val = shared.heap.load(addr);

            // our own in-place write
            if pre == tx.my_lock {
                return Ok(val);
            }

            let post = orec.raw();
            if pre == post && pre <= tx.start_time {
                tx.r_orecs.push(index);
                return Ok(val);
            }
            if OrecWord::is_locked(pre) {
                return Err(StmError::Conflict);
            }
            extend(tx, shared)?;
        }
    }

    fn write(&self, tx: &mut TxThread, shared: &Shared, addr: Addr, val: Word, mask: Word) -> StmResult<()> {
        let index = shared.orecs.index_of(addr);
        let orec = shared.orecs.get(index);
        loop {
            let raw = orec.raw();
            if raw <= tx.start_time {
                if !orec.try_lock(raw, tx.my_lock) {
                    return Err(StmError::Conflict);
                }
                orec.save_previous(raw);
                tx.locks.push(index);
                break;
            }
            if raw == tx.my_lock {
                break;
            }
            if OrecWord::is_locked(raw) {
                return Err(StmError::Conflict);
            }
            extend(tx, shared)?;
        }

        tx.undo_log.insert(addr, shared.heap.load(addr), mask);
        shared.heap.store_masked(addr, val, mask);
        tx.mode = Mode::Writing;
        Ok(())
    }

    fn commit(&self, tx: &mut TxThread, shared: &Shared) -> StmResult<()> {
        if tx.locks.is_empty() {
            return Ok(());
        }

        let end_time = 1 + shared.globals.timestamp.fetch_add(1, Ordering::AcqRel);
        // Nobody committed since we started: the read set is still valid.
        if end_time != tx.start_time + 1 && !orecs_valid(tx, &shared.orecs, tx.start_time) {
            return Err(StmError::Conflict);
        }

        for &index in &tx.locks {
            shared.orecs.get(index).set_version(end_time);
        }
        Ok(())
    }

    /// Undo the in-place writes, then unlock each orec one version past the
    /// one it had. A reader that saw a dirty value and the old version then
    /// fails its post-read check instead of accepting the value.
    fn rollback(&self, tx: &mut TxThread, shared: &Shared) {
        tx.undo_log.undo(&shared.heap);

        let mut max = 0;
        for &index in &tx.locks {
            let orec = shared.orecs.get(index);
            let version = orec.previous() + 1;
            orec.set_version(version);
            max = max.max(version);
        }
        if max > 0 {
            shared.globals.timestamp.fetch_max(max, Ordering::AcqRel);
        }
    }

    fn on_switch_to(&self, globals: &Globals) {
        globals.timestamp.store(globals.max_version(), Ordering::Release);
    }
}

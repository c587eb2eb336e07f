// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! NOrec: one global sequence lock and value-based validation.
//!
//! Reads are logged with the value they returned. Whenever the sequence
//! lock moved since the last check, the transaction re-reads its value list
//! and continues only if every value is still the same. Writes are
//! buffered; commit takes the sequence lock (odd), writes back and
//! releases it at the next even value.

use std::sync::atomic::Ordering;

use crossbeam_utils::Backoff;

use super::{read_rw, Algorithm, AlgorithmKind, Irrevocability};
use crate::globals::Globals;
use crate::memory::{Addr, Word};
use crate::result::{StmError, StmResult};
use crate::stm::Shared;
use crate::transaction::descriptor::{Mode, TxThread};
use crate::transaction::write_set::WriteSetEntry;

pub(crate) struct NOrec;

/// Wait for an even sequence number at which the value list is valid, and
/// return it.
fn validate(tx: &TxThread, shared: &Shared) -> StmResult<usize> {
    let ts = &shared.globals.timestamp;
    let backoff = Backoff::new();
    loop {
        let time = ts.load(Ordering::Acquire);
        if time & 1 == 1 {
            backoff.snooze();
            continue;
        }
        if !tx.vlist.is_valid(&shared.heap) {
            return Err(StmError::Conflict);
        }
        if ts.load(Ordering::Acquire) == time {
            return Ok(time);
        }
    }
}

fn read_memory(tx: &mut TxThread, shared: &Shared, addr: Addr, mask: Word) -> StmResult<Word> {
    let mut val = shared.heap.load(addr);
    while shared.globals.timestamp.load(Ordering::Acquire) != tx.start_time {
        tx.start_time = validate(tx, shared)?;
        val = shared.heap.load(addr);
    }
    tx.vlist.insert(addr, val, mask);
    Ok(val)
}

impl Algorithm for NOrec {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::NOrec
    }

    fn privatization_safe(&self) -> bool {
        true
    }

    fn irrevocability(&self) -> Irrevocability {
        Irrevocability::InFlight
    }

    fn begin(&self, tx: &mut TxThread, shared: &Shared) {
        let backoff = Backoff::new();
        loop {
            let time = shared.globals.timestamp.load(Ordering::Acquire);
            if time & 1 == 0 {
                tx.start_time = time;
                return;
            }
            backoff.snooze();
        }
    }

    fn read(&self, tx: &mut TxThread, shared: &Shared, addr: Addr, mask: Word) -> StmResult<Word> {
        if tx.mode == Mode::ReadOnly {
            return read_memory(tx, shared, addr, mask);
        }
        read_rw(tx, addr, mask, |tx| read_memory(tx, shared, addr, mask))
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

        let ts = &shared.globals.timestamp;
        while ts
            .compare_exchange(tx.start_time, tx.start_time + 1, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            tx.start_time = validate(tx, shared)?;
        }

        tx.writes.writeback(&shared.heap);
        ts.store(tx.start_time + 2, Ordering::Release);
        Ok(())
    }

    fn rollback(&self, _tx: &mut TxThread, _shared: &Shared) {}

    /// Validate while holding the sequence lock, write back and continue
    /// uninstrumented. No other transaction runs at this point.
    fn irrevoc(&self, tx: &mut TxThread, shared: &Shared) -> bool {
        let ts = &shared.globals.timestamp;
        let time = ts.load(Ordering::Acquire);
        if time & 1 == 1 || !tx.vlist.is_valid(&shared.heap) {
            return false;
        }
        if ts.compare_exchange(time, time + 1, Ordering::AcqRel, Ordering::Relaxed).is_err() {
            return false;
        }
        tx.writes.writeback(&shared.heap);
        ts.store(time + 2, Ordering::Release);
        tx.clear_logs();
        true
    }

    fn on_switch_to(&self, globals: &Globals) {
        let v = globals.max_version();
        globals.timestamp.store(v + (v & 1), Ordering::Release);
    }
}

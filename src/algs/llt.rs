// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! LLT: commit-time locking with a redo log and a fixed snapshot.
//!
//! Unlike OrecLazy, a read that finds a newer orec aborts instead of
//! extending the snapshot. The orec is read before and after the value, so
//! a single read never needs a retry loop.

use std::sync::atomic::Ordering;

use super::orec_lazy::{acquire_write_set, release_locks};
use super::{orecs_valid, read_rw, Algorithm, AlgorithmKind};
use crate::globals::Globals;
use crate::memory::{Addr, Word};
use crate::result::{StmError, StmResult};
use crate::stm::Shared;
use crate::transaction::descriptor::{Mode, TxThread};
use crate::transaction::write_set::WriteSetEntry;

pub(crate) struct Llt;

fn read_memory(tx: &mut TxThread, shared: &Shared, addr: Addr) -> StmResult<Word> {
    let index = shared.orecs.index_of(addr);
    let orec = shared.orecs.get(index);

    let before = orec.raw();
    let val = shared.heap.load(addr);
    let after = orec.raw();
    if before > tx.start_time || before != after {
        return Err(StmError::Conflict);
    }
    tx.r_orecs.push(index);
    Ok(val)
}

impl Algorithm for Llt {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::LLT
    }

    fn privatization_safe(&self) -> bool {
        false
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
        let end_time = 1 + shared.globals.timestamp.fetch_add(1, Ordering::AcqRel);

        // nobody committed since we started
        if end_time != tx.start_time + 1 && !orecs_valid(tx, &shared.orecs, tx.start_time) {
            return Err(StmError::Conflict);
        }

        tx.writes.writeback(&shared.heap);
        for &index in &tx.locks {
            shared.orecs.get(index).set_version(end_time);
        }
        Ok(())
    }

    fn rollback(&self, tx: &mut TxThread, shared: &Shared) {
        release_locks(tx, shared);
    }

    fn on_switch_to(&self, globals: &Globals) {
        globals.timestamp.store(globals.max_version(), Ordering::Release);
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::Ordering;

    use crate::algs::AlgorithmKind;
    use crate::metadata::OrecWord;
    use crate::test::engine;
    use crate::TransactionControl;

    #[test]
    fn newer_orec_aborts_the_read() {
        let stm = engine(AlgorithmKind::LLT);
        let a = stm.alloc(1).unwrap();
        let b = stm.alloc(1).unwrap();
        let mut reader = stm.thread_init().unwrap();
        let mut writer = stm.thread_init().unwrap();

        let res = reader.with_control(
            |_| TransactionControl::Abort,
            |tx| {
                tx.read(a)?;
                std::thread::scope(|s| {
                    s.spawn(|| writer.atomically(|tx| tx.write(b, 1))).join().unwrap();
                });
                // b changed after the snapshot was taken
                tx.read(b)
            },
        );
        assert_eq!(res, None);
        assert_eq!(reader.stats().aborts, 1);
    }

    #[test]
    fn commit_stamps_orecs_with_end_time() {
        let stm = engine(AlgorithmKind::LLT);
        let addr = stm.alloc(1).unwrap();
        let mut thread = stm.thread_init().unwrap();
        let start = stm.globals().timestamp.load(Ordering::Acquire);

        thread.atomically(|tx| {
            let v = tx.read(addr)?;
            tx.write(addr, v + 3)
        });
        thread.atomically(|tx| tx.read(addr));

        assert_eq!(stm.load(addr), 3);
        assert_eq!(stm.globals().timestamp.load(Ordering::Acquire), start + 1);
        assert_eq!(stm.orec_for(addr), OrecWord::Version(start + 1));
    }

    #[test]
    fn write_after_stale_read_is_rejected() {
        let stm = engine(AlgorithmKind::LLT);
        let a = stm.alloc(1).unwrap();
        let b = stm.alloc(1).unwrap();
        let mut thread = stm.thread_init().unwrap();
        let mut other = stm.thread_init().unwrap();

        let mut attempts = 0;
        thread.atomically(|tx| {
            attempts += 1;
            let v = tx.read(a)?;
            if attempts == 1 {
                std::thread::scope(|s| {
                    s.spawn(|| other.atomically(|tx| tx.write(a, 10))).join().unwrap();
                });
            }
            tx.write(b, v + 1)
        });
        assert_eq!(attempts, 2);
        assert_eq!(stm.load(b), 11);
    }
}

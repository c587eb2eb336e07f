// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Pipeline: every transaction takes its commit order at begin.
//!
//! Commits, including read-only ones, happen strictly in begin order. The
//! oldest transaction in flight cannot be invalidated and skips all
//! checks.

use std::sync::atomic::Ordering;

use super::{
    complete_empty, orecs_valid, publish, read_rw, stamp_and_writeback, wait_for_turn, Algorithm, AlgorithmKind,
    Irrevocability,
};
use crate::globals::Globals;
use crate::memory::{Addr, Word};
use crate::result::{StmError, StmResult};
use crate::stm::Shared;
use crate::transaction::descriptor::{Mode, TxThread};
use crate::transaction::write_set::WriteSetEntry;

pub(crate) struct Pipeline;

/// True if every transaction ordered before `tx` had completed when it
/// began.
#[inline]
fn is_oldest(tx: &TxThread) -> bool {
    tx.order == Some(tx.ts_cache + 1)
}

fn read_memory(tx: &mut TxThread, shared: &Shared, addr: Addr) -> StmResult<Word> {
    let val = shared.heap.load(addr);
    if is_oldest(tx) {
        return Ok(val);
    }

    let index = shared.orecs.index_of(addr);
    if shared.orecs.get(index).raw() > tx.ts_cache {
        return Err(StmError::Conflict);
    }
    tx.r_orecs.push(index);
    Ok(val)
}

impl Algorithm for Pipeline {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Pipeline
    }

    fn privatization_safe(&self) -> bool {
        true
    }

    fn irrevocability(&self) -> Irrevocability {
        Irrevocability::Unsupported
    }

    fn begin(&self, tx: &mut TxThread, shared: &Shared) {
        tx.order = Some(1 + shared.globals.timestamp.fetch_add(1, Ordering::AcqRel));
        tx.ts_cache = shared.globals.last_complete.load(Ordering::Acquire);
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
        let order = match tx.order {
            Some(order) => order,
            None => return Ok(()),
        };

        wait_for_turn(&shared.globals, order);
        if !is_oldest(tx) && !orecs_valid(tx, &shared.orecs, tx.ts_cache) {
            return Err(StmError::Conflict);
        }

        stamp_and_writeback(tx, shared, order);
        publish(tx, &shared.globals, order);
        tx.order = None;
        Ok(())
    }

    fn rollback(&self, tx: &mut TxThread, shared: &Shared) {
        if let Some(order) = tx.order.take() {
            complete_empty(tx, &shared.globals, order);
        }
    }

    fn on_switch_to(&self, globals: &Globals) {
        let v = globals.max_version();
        globals.timestamp.store(v, Ordering::Release);
        globals.last_complete.store(v, Ordering::Release);
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::Ordering;

    use crate::algs::AlgorithmKind;
    use crate::result::StmError;
    use crate::test::{engine, terminates};
    use crate::TransactionControl;

    #[test]
    fn aborted_transactions_complete_their_slot() {
        let stm = engine(AlgorithmKind::Pipeline);
        let addr = stm.alloc(1).unwrap();
        let mut thread = stm.thread_init().unwrap();

        thread.atomically(|tx| tx.write(addr, 1));
        let _ = thread.with_control(|_| TransactionControl::Abort, |tx| {
            tx.write(addr, 2)?;
            Err::<(), _>(StmError::Conflict)
        });
        assert_eq!(thread.atomically(|tx| tx.read(addr)), 1);
        assert_eq!(thread.last_commit_order(), Some(3));
        assert_eq!(thread.stats().skipped_orders, 1);

        let globals = stm.globals();
        assert_eq!(globals.last_complete.load(Ordering::Acquire), 3);
        assert_eq!(globals.timestamp.load(Ordering::Acquire), 3);
    }

    #[test]
    fn younger_commit_waits_for_older() {
        let stm = engine(AlgorithmKind::Pipeline);
        let addr = stm.alloc(1).unwrap();
        let mut older = stm.thread_init().unwrap();
        let mut younger = stm.thread_init().unwrap();

        older.atomically(|tx| {
            tx.read(addr)?;
            // the younger transaction cannot commit while we run
            let stm = stm.clone();
            let waited = !terminates(300, move || {
                let mut t = stm.thread_init().unwrap();
                t.atomically(|tx| tx.write(addr, 7));
            });
            assert!(waited);
            tx.write(addr, 1)
        });

        assert!(terminates(1000, move || {
            younger.atomically(|tx| tx.read(addr));
        }));
        assert_eq!(stm.load(addr), 7);
    }
}

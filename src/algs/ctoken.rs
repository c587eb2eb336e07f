// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! CToken and CTokenTurbo: commit order taken at the first write.
//!
//! `timestamp` hands out commit orders, `last_complete` tracks the newest
//! finished one, and orecs hold the order of their last writer. Writers
//! commit strictly in order, so a writer never needs to lock anything.
//!
//! With turbo enabled, a writer whose predecessor has finished is the
//! oldest transaction in flight: it writes its redo log back and continues
//! in turbo mode, writing in place. A turbo transaction can no longer roll
//! back.

use std::sync::atomic::Ordering;

use super::{
    complete_empty, orecs_valid, publish, read_rw, stamp_and_writeback, wait_for_turn, Algorithm, AlgorithmKind,
    Irrevocability,
};
use crate::error::unrecoverable;
use crate::globals::Globals;
use crate::memory::{Addr, Word};
use crate::result::{StmError, StmResult};
use crate::stm::Shared;
use crate::transaction::descriptor::{Mode, TxThread};
use crate::transaction::write_set::WriteSetEntry;

pub(crate) struct CToken {
    kind: AlgorithmKind,
    turbo: bool,
}

pub(crate) static CTOKEN: CToken = CToken { kind: AlgorithmKind::CToken, turbo: false };

pub(crate) static CTOKEN_TURBO: CToken = CToken { kind: AlgorithmKind::CTokenTurbo, turbo: true };

impl CToken {
    /// Check the read set against `ts_cache` and move `ts_cache` to
    /// `finish`. With turbo, a writer that is next in line switches to
    /// turbo mode.
    fn validate(&self, tx: &mut TxThread, shared: &Shared, finish: usize) -> StmResult<()> {
        if !orecs_valid(tx, &shared.orecs, tx.ts_cache) {
            return Err(StmError::Conflict);
        }
        tx.ts_cache = finish;

        if let (true, Some(order)) = (self.turbo, tx.order) {
            if finish == order - 1 {
                stamp_and_writeback(tx, shared, order);
                tx.mode = Mode::Turbo;
            }
        }
        Ok(())
    }

    fn read_memory(&self, tx: &mut TxThread, shared: &Shared, addr: Addr) -> StmResult<Word> {
        let index = shared.orecs.index_of(addr);
        let val = shared.heap.load(addr);
        if shared.orecs.get(index).raw() > tx.ts_cache {
            return Err(StmError::Conflict);
        }
        tx.r_orecs.push(index);

        let complete = shared.globals.last_complete.load(Ordering::Acquire);
        if complete > tx.ts_cache {
            self.validate(tx, shared, complete)?;
        }
        Ok(val)
    }
}

impl Algorithm for CToken {
    fn kind(&self) -> AlgorithmKind {
        self.kind
    }

    fn privatization_safe(&self) -> bool {
        true
    }

    fn irrevocability(&self) -> Irrevocability {
        Irrevocability::Unsupported
    }

    fn is_irrevocable(&self, tx: &TxThread) -> bool {
        tx.mode == Mode::Turbo
    }

    fn begin(&self, tx: &mut TxThread, shared: &Shared) {
        tx.ts_cache = shared.globals.last_complete.load(Ordering::Acquire);
    }

    fn read(&self, tx: &mut TxThread, shared: &Shared, addr: Addr, mask: Word) -> StmResult<Word> {
        match tx.mode {
            Mode::Turbo => Ok(shared.heap.load(addr)),
            Mode::Writing => read_rw(tx, addr, mask, |tx| self.read_memory(tx, shared, addr)),
            _ => self.read_memory(tx, shared, addr),
        }
    }

    fn write(&self, tx: &mut TxThread, shared: &Shared, addr: Addr, val: Word, mask: Word) -> StmResult<()> {
        if tx.mode == Mode::Turbo {
            if let Some(order) = tx.order {
                shared.orecs.get_lock_for(addr).set_version(order);
            }
            shared.heap.store_masked(addr, val, mask);
            return Ok(());
        }

        tx.writes.insert(WriteSetEntry::new(addr, val, mask));
        if tx.order.is_none() {
            tx.order = Some(1 + shared.globals.timestamp.fetch_add(1, Ordering::AcqRel));
            tx.mode = Mode::Writing;
            if self.turbo {
                let complete = shared.globals.last_complete.load(Ordering::Acquire);
                self.validate(tx, shared, complete)?;
            }
        }
        Ok(())
    }

    fn commit(&self, tx: &mut TxThread, shared: &Shared) -> StmResult<()> {
        let order = match tx.order {
            Some(order) => order,
            None => return Ok(()),
        };

        if tx.mode != Mode::Turbo {
            wait_for_turn(&shared.globals, order);
            if !orecs_valid(tx, &shared.orecs, tx.ts_cache) {
                return Err(StmError::Conflict);
            }
            stamp_and_writeback(tx, shared, order);
        }

        publish(tx, &shared.globals, order);
        tx.order = None;
        Ok(())
    }

    fn rollback(&self, tx: &mut TxThread, shared: &Shared) {
        if tx.mode == Mode::Turbo {
            unrecoverable("CTokenTurbo cannot roll back a turbo transaction");
        }
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
    use crate::test::engine;
    use crate::TransactionControl;

    #[test]
    fn reader_sees_ordered_writer() {
        let stm = engine(AlgorithmKind::CTokenTurbo);
        let addr = stm.alloc(1).unwrap();
        let mut reader = stm.thread_init().unwrap();
        let mut writer = stm.thread_init().unwrap();

        let res = reader.with_control(
            |_| TransactionControl::Abort,
            |tx| {
                tx.read(addr)?;
                std::thread::scope(|s| {
                    s.spawn(|| writer.atomically(|tx| tx.write(addr, 1))).join().unwrap();
                });
                tx.read(addr)
            },
        );
        assert_eq!(res, None);
        assert_eq!(stm.load(addr), 1);
    }

    #[test]
    fn every_order_completes() {
        let stm = engine(AlgorithmKind::CTokenTurbo);
        let addr = stm.alloc(1).unwrap();
        let mut thread = stm.thread_init().unwrap();
        let start = stm.globals().last_complete.load(Ordering::Acquire);

        thread.atomically(|tx| tx.write(addr, 1));
        thread.atomically(|tx| tx.read(addr));
        // aborted before the first write: no order taken
        let _ = thread.with_control(|_| TransactionControl::Abort, |tx| {
            tx.read(addr)?;
            Err::<(), _>(StmError::Retry)
        });
        thread.atomically(|tx| tx.write(addr, 2));

        let globals = stm.globals();
        assert_eq!(globals.last_complete.load(Ordering::Acquire), start + 2);
        assert_eq!(globals.timestamp.load(Ordering::Acquire), start + 2);
        assert_eq!(stm.load(addr), 2);
    }

    #[test]
    fn lone_writer_goes_turbo() {
        let stm = engine(AlgorithmKind::CTokenTurbo);
        let addr = stm.alloc(1).unwrap();
        let mut thread = stm.thread_init().unwrap();

        let turbo = thread.atomically(|tx| {
            tx.write(addr, 4)?;
            assert_eq!(stm.load(addr), 4);
            Ok(tx.is_irrevocable())
        });
        assert!(turbo);
    }

    #[test]
    fn without_turbo_writes_wait_for_commit() {
        let stm = engine(AlgorithmKind::CToken);
        let addr = stm.alloc(1).unwrap();
        let mut thread = stm.thread_init().unwrap();
        let start = stm.globals().last_complete.load(Ordering::Acquire);

        let turbo = thread.atomically(|tx| {
            tx.write(addr, 4)?;
            assert_eq!(stm.load(addr), 0);
            Ok(tx.is_irrevocable())
        });
        assert!(!turbo);
        assert_eq!(stm.load(addr), 4);
        assert_eq!(thread.last_commit_order(), Some(start + 1));

        // the order of an aborted writer is completed empty
        let res = thread.with_control(|_| TransactionControl::Abort, |tx| {
            tx.write(addr, 5)?;
            Err::<(), _>(StmError::Conflict)
        });
        assert_eq!(res, None);
        assert_eq!(thread.stats().skipped_orders, 1);
        assert_eq!(stm.globals().last_complete.load(Ordering::Acquire), start + 2);
        assert_eq!(stm.load(addr), 4);
    }
}

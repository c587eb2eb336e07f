// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! TML: transactional mutex lock.
//!
//! `timestamp` is a sequence lock. Readers run optimistically and abort when
//! it moves. The first write makes it odd, after which the writer runs
//! alone and writes in place, so it can never roll back.

use std::sync::atomic::Ordering;

use crossbeam_utils::Backoff;

use super::{Algorithm, AlgorithmKind, Irrevocability};
use crate::error::unrecoverable;
use crate::globals::Globals;
use crate::memory::{Addr, Word};
use crate::result::{StmError, StmResult};
use crate::stm::Shared;
use crate::transaction::descriptor::{Mode, TxThread};

pub(crate) struct Tml;

impl Tml {
    fn acquire(tx: &mut TxThread, shared: &Shared) -> bool {
        let ts = &shared.globals.timestamp;
        if ts
            .compare_exchange(tx.start_time, tx.start_time + 1, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        tx.start_time += 1;
        tx.tml_has_lock = true;
        tx.mode = Mode::Writing;
        true
    }
}

impl Algorithm for Tml {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::TML
    }

    fn privatization_safe(&self) -> bool {
        true
    }

    fn irrevocability(&self) -> Irrevocability {
        Irrevocability::Native
    }

    fn is_irrevocable(&self, tx: &TxThread) -> bool {
        tx.tml_has_lock
    }

    fn begin(&self, tx: &mut TxThread, shared: &Shared) {
        let backoff = Backoff::new();
        loop {
            let ts = shared.globals.timestamp.load(Ordering::Acquire);
            if ts & 1 == 0 {
                tx.start_time = ts;
                return;
            }
            backoff.snooze();
        }
    }

    fn read(&self, tx: &mut TxThread, shared: &Shared, addr: Addr, _mask: Word) -> StmResult<Word> {
        let val = shared.heap.load(addr);
        if tx.tml_has_lock {
            return Ok(val);
        }
        if shared.globals.timestamp.load(Ordering::Acquire) != tx.start_time {
            return Err(StmError::Conflict);
        }
        Ok(val)
    }

    fn write(&self, tx: &mut TxThread, shared: &Shared, addr: Addr, val: Word, mask: Word) -> StmResult<()> {
        if !tx.tml_has_lock && !Tml::acquire(tx, shared) {
            return Err(StmError::Conflict);
        }
        shared.heap.store_masked(addr, val, mask);
        Ok(())
    }

    fn commit(&self, tx: &mut TxThread, shared: &Shared) -> StmResult<()> {
        if tx.tml_has_lock {
            shared.globals.timestamp.store(tx.start_time + 1, Ordering::Release);
            tx.tml_has_lock = false;
        }
        Ok(())
    }

    fn rollback(&self, tx: &mut TxThread, _shared: &Shared) {
        if tx.tml_has_lock {
            unrecoverable("TML cannot roll back a transaction that wrote");
        }
    }

    fn irrevoc(&self, tx: &mut TxThread, shared: &Shared) -> bool {
        tx.tml_has_lock || Tml::acquire(tx, shared)
    }

    fn on_switch_to(&self, globals: &Globals) {
        let v = globals.max_version();
        globals.timestamp.store(v + (v & 1), Ordering::Release);
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::Ordering;

    use crate::algs::AlgorithmKind;
    use crate::result::StmError;
    use crate::test::{aborts_process, engine};
    use crate::TransactionControl;

    #[test]
    fn reader_aborts_when_a_writer_commits() {
        let stm = engine(AlgorithmKind::TML);
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
        assert_eq!(stm.globals().timestamp.load(Ordering::Acquire), 2);
    }

    #[test]
    fn first_write_makes_the_transaction_irrevocable() {
        let stm = engine(AlgorithmKind::TML);
        let addr = stm.alloc(1).unwrap();
        let mut thread = stm.thread_init().unwrap();

        let (before, after) = thread.atomically(|tx| {
            let before = tx.is_irrevocable();
            tx.write(addr, 3)?;
            // in place
            assert_eq!(stm.load(addr), 3);
            Ok((before, tx.is_irrevocable()))
        });
        assert!(!before);
        assert!(after);
    }

    /// A writer that gives up must not leave the sequence lock odd, or the
    /// peer would spin forever.
    #[test]
    fn rollback_after_write_aborts_the_process() {
        let aborted = aborts_process("algs::tml::test::rollback_after_write_aborts_the_process", 5000, || {
            let stm = engine(AlgorithmKind::TML);
            let addr = stm.alloc(1).unwrap();

            let peer = stm.clone();
            std::thread::spawn(move || {
                let mut t = peer.thread_init().unwrap();
                loop {
                    t.atomically(|tx| {
                        let x = tx.read(addr)?;
                        tx.write(addr, x + 1)
                    });
                }
            });

            let mut thread = stm.thread_init().unwrap();
            thread.atomically(|tx| {
                tx.write(addr, 0)?;
                Err::<(), _>(StmError::Conflict)
            });
        });
        assert!(aborted);
    }
}

// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Cohorts and CohortsLI: transactions start together and commit together.
//!
//! A new transaction may only start while no cohort is committing. Once a
//! member reaches commit with writes, the cohort is closed: its writers
//! take commit orders, wait until every member has reached commit and
//! then write back one after another. Nothing is written while a member
//! still runs, so reads need no validation until commit.
//!
//! `started`, `cpending` and `committed` only grow, except for members
//! that leave without writing, which are taken out of `started` again.
//!
//! A cohort can also be sealed early, after a member read or wrote a
//! configured number of locations or aborted too often in a row. Nobody
//! joins a sealed cohort; the seal is lifted once the cohort drained.
//!
//! CohortsLI lets the last running member of a cohort write in place. Its
//! reads saw memory before any member of the cohort wrote back, so it is
//! serialized first, even though it publishes last. The other writers
//! validate against it and the turbo transaction cannot roll back.

use std::sync::atomic::Ordering;

use crossbeam_utils::Backoff;
use tracing::trace;

use super::{
    orecs_valid, publish, read_rw, release_slot, stamp_and_writeback, wait_for_turn, Algorithm, AlgorithmKind,
    Irrevocability,
};
use crate::error::unrecoverable;
use crate::globals::Globals;
use crate::memory::{Addr, Word};
use crate::result::{StmError, StmResult};
use crate::stm::Shared;
use crate::transaction::descriptor::{Mode, TxThread};
use crate::transaction::write_set::WriteSetEntry;

pub(crate) struct Cohorts {
    kind: AlgorithmKind,
    turbo: bool,
}

pub(crate) static COHORTS: Cohorts = Cohorts { kind: AlgorithmKind::Cohorts, turbo: false };

pub(crate) static COHORTS_LI: Cohorts = Cohorts { kind: AlgorithmKind::CohortsLI, turbo: true };

fn read_memory(tx: &mut TxThread, shared: &Shared, addr: Addr) -> Word {
    tx.r_orecs.push(shared.orecs.index_of(addr));
    let val = shared.heap.load(addr);
    if shared.config.cohort_seal.reads == Some(tx.r_orecs.len()) {
        seal(&shared.globals, tx);
    }
    val
}

fn seal(g: &Globals, tx: &TxThread) {
    if !g.sealed.swap(true, Ordering::SeqCst) {
        trace!(thread = %tx.id, "cohort sealed");
    }
}

/// Lift the seal once every member of the cohort is gone.
fn unseal_if_drained(g: &Globals) {
    let committed = g.committed.load(Ordering::SeqCst);
    if g.started.load(Ordering::SeqCst) == committed && g.cpending.load(Ordering::SeqCst) == committed {
        g.sealed.store(false, Ordering::SeqCst);
    }
}

fn closed(g: &Globals) -> bool {
    g.sealed.load(Ordering::SeqCst) || g.inplace.load(Ordering::SeqCst)
}

/// True if every other member of the cohort has reached commit.
fn last_running(g: &Globals) -> bool {
    // cpending first: it only grows, so the difference can only shrink
    // between the two loads.
    let cpending = g.cpending.load(Ordering::SeqCst);
    g.started.load(Ordering::SeqCst).saturating_sub(cpending) == 1
}

impl Cohorts {
    /// Try to switch `tx` to writing in place. Fails while another member
    /// of the cohort still runs.
    fn try_turbo(&self, tx: &mut TxThread, g: &Globals) -> bool {
        if !self.turbo || !last_running(g) {
            return false;
        }
        g.inplace.store(true, Ordering::SeqCst);
        if !last_running(g) {
            g.inplace.store(false, Ordering::SeqCst);
            return false;
        }
        tx.mode = Mode::Turbo;
        trace!(thread = %tx.id, "writing in place");
        true
    }

    fn write_in_place(&self, shared: &Shared, addr: Addr, val: Word, mask: Word) {
        let stamp = shared.globals.last_complete.load(Ordering::Acquire) + 1;
        shared.orecs.get_lock_for(addr).set_version(stamp);
        shared.heap.store_masked(addr, val, mask);
    }

    fn commit_turbo(&self, tx: &mut TxThread, g: &Globals) {
        let order = 1 + g.cpending.fetch_add(1, Ordering::SeqCst);
        wait_for_turn(g, order);
        g.inplace.store(false, Ordering::SeqCst);
        publish(tx, g, order);
        g.committed.fetch_add(1, Ordering::SeqCst);
        unseal_if_drained(g);
    }
}

impl Algorithm for Cohorts {
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
        let g = &shared.globals;
        let backoff = Backoff::new();
        loop {
            // wait until the committing cohort is done
            while g.cpending.load(Ordering::SeqCst) != g.committed.load(Ordering::SeqCst) || closed(g) {
                backoff.snooze();
            }
            g.started.fetch_add(1, Ordering::SeqCst);
            if g.cpending.load(Ordering::SeqCst) <= g.committed.load(Ordering::SeqCst) && !closed(g) {
                break;
            }
            // a commit started in between, or the cohort was closed
            g.started.fetch_sub(1, Ordering::SeqCst);
            unseal_if_drained(g);
        }
        tx.ts_cache = g.last_complete.load(Ordering::Acquire);

        if let Some(limit) = shared.config.cohort_seal.aborts {
            if tx.consec_aborts >= limit {
                seal(g, tx);
            }
        }
    }

    fn read(&self, tx: &mut TxThread, shared: &Shared, addr: Addr, mask: Word) -> StmResult<Word> {
        match tx.mode {
            Mode::Turbo => Ok(shared.heap.load(addr)),
            Mode::Writing => read_rw(tx, addr, mask, |tx| Ok(read_memory(tx, shared, addr))),
            _ => Ok(read_memory(tx, shared, addr)),
        }
    }

    fn write(&self, tx: &mut TxThread, shared: &Shared, addr: Addr, val: Word, mask: Word) -> StmResult<()> {
        if tx.mode == Mode::Turbo {
            self.write_in_place(shared, addr, val, mask);
            return Ok(());
        }
        if tx.mode == Mode::ReadOnly && self.try_turbo(tx, &shared.globals) {
            self.write_in_place(shared, addr, val, mask);
            return Ok(());
        }

        tx.writes.insert(WriteSetEntry::new(addr, val, mask));
        tx.mode = Mode::Writing;
        if shared.config.cohort_seal.writes == Some(tx.writes.len()) {
            seal(&shared.globals, tx);
        }
        Ok(())
    }

    fn commit(&self, tx: &mut TxThread, shared: &Shared) -> StmResult<()> {
        let g = &shared.globals;
        if tx.mode == Mode::Turbo {
            self.commit_turbo(tx, g);
            return Ok(());
        }
        if tx.writes.is_empty() {
            g.started.fetch_sub(1, Ordering::SeqCst);
            unseal_if_drained(g);
            return Ok(());
        }

        let order = 1 + g.cpending.fetch_add(1, Ordering::SeqCst);
        tx.order = Some(order);

        // wait for the rest of the cohort to reach commit
        let backoff = Backoff::new();
        while g.cpending.load(Ordering::SeqCst) < g.started.load(Ordering::SeqCst) {
            backoff.snooze();
        }
        wait_for_turn(g, order);

        // The first writer of the cohort cannot be invalidated, unless a
        // member wrote in place.
        let first = tx.ts_cache == order - 1 && !g.inplace.load(Ordering::SeqCst);
        if !first && !orecs_valid(tx, &shared.orecs, tx.ts_cache) {
            // Complete the slot now. `order` stays set so that rollback
            // knows the thread already left the cohort.
            release_slot(tx, g, order);
            g.committed.fetch_add(1, Ordering::SeqCst);
            unseal_if_drained(g);
            return Err(StmError::Conflict);
        }

        stamp_and_writeback(tx, shared, order);
        publish(tx, g, order);
        g.committed.fetch_add(1, Ordering::SeqCst);
        unseal_if_drained(g);
        tx.order = None;
        Ok(())
    }

    fn rollback(&self, tx: &mut TxThread, shared: &Shared) {
        if tx.mode == Mode::Turbo {
            unrecoverable("CohortsLI cannot roll back a transaction that wrote in place");
        }
        if tx.order.take().is_none() {
            shared.globals.started.fetch_sub(1, Ordering::SeqCst);
            unseal_if_drained(&shared.globals);
        }
    }

    fn on_switch_to(&self, globals: &Globals) {
        let v = globals.max_version();
        globals.timestamp.store(v, Ordering::Release);
        globals.last_complete.store(v, Ordering::Release);
        globals.started.store(v, Ordering::SeqCst);
        globals.cpending.store(v, Ordering::SeqCst);
        globals.committed.store(v, Ordering::SeqCst);
        globals.sealed.store(false, Ordering::SeqCst);
        globals.inplace.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::Ordering;

    use std::sync::mpsc;

    use crate::algs::AlgorithmKind;
    use crate::result::StmError;
    use crate::test::{engine, terminates};
    use crate::{CohortSeal, Config, Stm, TransactionControl};

    fn sealing_engine(seal: CohortSeal) -> Stm {
        let config = Config::default()
            .with_algorithm(AlgorithmKind::Cohorts)
            .with_heap_words(1 << 12)
            .with_table_size(1 << 10)
            .with_cohort_seal(seal);
        Stm::new(config).unwrap()
    }

    #[test]
    fn counters_balance_after_each_transaction() {
        let stm = engine(AlgorithmKind::Cohorts);
        let addr = stm.alloc(1).unwrap();
        let mut thread = stm.thread_init().unwrap();

        thread.atomically(|tx| tx.write(addr, 1));
        thread.atomically(|tx| tx.read(addr));
        let _ = thread.with_control(|_| TransactionControl::Abort, |tx| {
            tx.write(addr, 2)?;
            Err::<(), _>(StmError::Retry)
        });
        thread.atomically(|tx| tx.write(addr, 3));

        let g = stm.globals();
        let started = g.started.load(Ordering::SeqCst);
        assert_eq!(started, g.cpending.load(Ordering::SeqCst));
        assert_eq!(started, g.committed.load(Ordering::SeqCst));
        assert_eq!(g.last_complete.load(Ordering::Acquire), 2);
        assert_eq!(stm.load(addr), 3);
    }

    #[test]
    fn writer_waits_for_its_cohort() {
        let stm = engine(AlgorithmKind::Cohorts);
        let addr = stm.alloc(1).unwrap();
        let mut member = stm.thread_init().unwrap();

        member.atomically(|tx| {
            tx.read(addr)?;
            let other = stm.clone();
            // the writer joined our cohort and cannot write back before
            // we reach commit
            let waited = !terminates(300, move || {
                let mut t = other.thread_init().unwrap();
                t.atomically(|tx| tx.write(addr, 5));
            });
            assert!(waited);
            assert_eq!(stm.load(addr), 0);
            Ok(())
        });

        let check = stm.clone();
        assert!(terminates(1000, move || {
            let backoff = crossbeam_utils::Backoff::new();
            while check.load(addr) != 5 {
                backoff.snooze();
            }
        }));
    }

    #[test]
    fn lone_writer_writes_in_place() {
        let stm = engine(AlgorithmKind::CohortsLI);
        let addr = stm.alloc(1).unwrap();
        let mut thread = stm.thread_init().unwrap();

        let turbo = thread.atomically(|tx| {
            tx.write(addr, 7)?;
            assert_eq!(stm.load(addr), 7);
            assert_eq!(tx.read(addr)?, 7);
            Ok(tx.is_irrevocable())
        });
        assert!(turbo);
        assert_eq!(thread.last_commit_order(), Some(1));

        let g = stm.globals();
        assert!(!g.inplace.load(Ordering::SeqCst));
        assert_eq!(g.started.load(Ordering::SeqCst), g.committed.load(Ordering::SeqCst));
        assert_eq!(g.last_complete.load(Ordering::Acquire), 1);
    }

    #[test]
    fn no_in_place_writes_beside_a_running_member() {
        let stm = engine(AlgorithmKind::CohortsLI);
        let addr = stm.alloc(1).unwrap();
        let mut member = stm.thread_init().unwrap();
        let (send, recv) = mpsc::channel();

        let other = stm.clone();
        let writer = std::thread::spawn(move || {
            let mut t = other.thread_init().unwrap();
            t.atomically(|tx| {
                tx.write(addr, 1)?;
                send.send(tx.is_irrevocable()).unwrap();
                Ok(())
            });
        });

        let turbo = member.atomically(|tx| {
            tx.read(addr)?;
            Ok(recv.recv().unwrap())
        });
        writer.join().unwrap();
        assert!(!turbo);
        assert_eq!(stm.load(addr), 1);
    }

    #[test]
    fn pending_writer_validates_against_in_place_writer() {
        let stm = engine(AlgorithmKind::CohortsLI);
        let x = stm.alloc(1).unwrap();
        let y = stm.alloc(1).unwrap();
        let (started_send, started_recv) = mpsc::channel();
        let (go_send, go_recv) = mpsc::channel::<()>();

        // x = y + 1
        let other = stm.clone();
        let last = std::thread::spawn(move || {
            let mut t = other.thread_init().unwrap();
            t.atomically(|tx| {
                let v = tx.read(y)?;
                started_send.send(()).unwrap();
                go_recv.recv().unwrap();
                tx.write(x, v + 1)?;
                Ok(tx.is_irrevocable())
            })
        });
        started_recv.recv().unwrap();

        // y = x + 10
        let other = stm.clone();
        let pending = std::thread::spawn(move || {
            let mut t = other.thread_init().unwrap();
            t.atomically(|tx| {
                let v = tx.read(x)?;
                tx.write(y, v + 10)
            });
            t.stats().aborts
        });

        let g = stm.globals();
        let backoff = crossbeam_utils::Backoff::new();
        while g.cpending.load(Ordering::SeqCst) == g.committed.load(Ordering::SeqCst) {
            backoff.snooze();
        }
        go_send.send(()).unwrap();

        assert!(last.join().unwrap());
        assert_eq!(pending.join().unwrap(), 1);
        assert_eq!(stm.load(x), 1);
        assert_eq!(stm.load(y), 11);
    }

    #[test]
    fn sealed_cohort_admits_nobody() {
        let stm = sealing_engine(CohortSeal {
            reads: Some(1),
            ..CohortSeal::default()
        });
        let addr = stm.alloc(1).unwrap();
        let mut member = stm.thread_init().unwrap();

        member.atomically(|tx| {
            tx.read(addr)?;
            assert!(stm.globals().sealed.load(Ordering::SeqCst));
            let other = stm.clone();
            let joined = terminates(300, move || {
                let mut t = other.thread_init().unwrap();
                t.atomically(|_| Ok(()));
            });
            assert!(!joined);
            Ok(())
        });
        assert!(!stm.globals().sealed.load(Ordering::SeqCst));

        let other = stm.clone();
        assert!(terminates(1000, move || {
            let mut t = other.thread_init().unwrap();
            t.atomically(|_| Ok(()));
        }));
    }

    #[test]
    fn repeated_aborts_seal_the_cohort() {
        let stm = sealing_engine(CohortSeal {
            aborts: Some(2),
            ..CohortSeal::default()
        });
        let addr = stm.alloc(1).unwrap();
        let mut thread = stm.thread_init().unwrap();

        let mut sealed = Vec::new();
        thread.atomically(|tx| {
            sealed.push(stm.globals().sealed.load(Ordering::SeqCst));
            tx.read(addr)?;
            if sealed.len() < 3 {
                return Err(StmError::Conflict);
            }
            Ok(())
        });
        assert_eq!(sealed, vec![false, false, true]);
        assert!(!stm.globals().sealed.load(Ordering::SeqCst));
    }
}

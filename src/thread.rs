// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The transaction harness of one registered thread.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crossbeam_utils::Backoff;
use tracing::{debug, info, trace};

use crate::error::{unrecoverable, Error};
use crate::metadata::ThreadId;
use crate::result::{StmError, StmResult};
use crate::stm::{Shared, Stm};
use crate::transaction::descriptor::{Mode, ThreadStats, TxThread};
use crate::transaction::{Transaction, TransactionControl, TransactionGuard};

/// A thread registered with an engine.
///
/// The handle owns the thread's transaction descriptor, which is reused by
/// every transaction the thread runs.
pub struct ThreadHandle {
    shared: Arc<Shared>,
    tx: TxThread,
}

impl ThreadHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Result<ThreadHandle, Error> {
        let slot = shared.registry.register()?;
        let alg = shared.current_algorithm();
        if !alg.algorithm().admits(slot.id()) {
            let id = slot.id();
            shared.registry.unregister(id);
            return Err(Error::Unsupported(format!("thread id {} under {}", id, alg)));
        }
        let tx = TxThread::new(slot, alg);
        debug!(thread = %tx.id, "thread registered");
        Ok(ThreadHandle { shared, tx })
    }

    pub fn id(&self) -> ThreadId {
        self.tx.id
    }

    pub fn stats(&self) -> &ThreadStats {
        &self.tx.stats
    }

    /// Commit order of the last transaction this thread ran, if it
    /// committed under an algorithm that orders commits.
    pub fn last_commit_order(&self) -> Option<usize> {
        self.tx.last_order
    }

    /// The engine this thread is registered with.
    pub fn stm(&self) -> Stm {
        Stm::from_shared(self.shared.clone())
    }

    /// Run a function atomically.
    ///
    /// `f` is run again until it commits, so it must not have side effects
    /// besides its transactional accesses.
    pub fn atomically<T, F>(&mut self, f: F) -> T
    where
        F: FnMut(&mut Transaction) -> StmResult<T>,
    {
        match self.with_control(|_| TransactionControl::Retry, f) {
            Some(t) => t,
            None => unreachable!(),
        }
    }

    /// Run a function with a transaction.
    ///
    /// `with_control` takes another control function, that
    /// can steer the control flow and possible terminate early.
    ///
    /// `control` can react to counters, timeouts or external inputs.
    ///
    /// It allows the user to fall back to another strategy, like
    /// an irrevocable run in the case of too much contention.
    ///
    /// When `f` calls `retry`, the thread sleeps until another transaction
    /// commits, or at most `Config::retry_wait`, before running `f` again.
    pub fn with_control<T, F, C>(&mut self, mut control: C, mut f: F) -> Option<T>
    where
        F: FnMut(&mut Transaction) -> StmResult<T>,
        C: FnMut(StmError) -> TransactionControl,
    {
        let _guard = TransactionGuard::new();

        // loop until success
        loop {
            self.begin();

            let shared = &*self.shared;
            let tx = &mut self.tx;
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut trans = Transaction::new(tx, shared);
                f(&mut trans)
            }));

            let result = match result {
                Ok(result) => result,
                Err(payload) => {
                    self.rollback(None);
                    self.abandon();
                    panic::resume_unwind(payload);
                }
            };

            let err = match result {
                Ok(t) => match self.commit() {
                    Ok(()) => return Some(t),
                    Err(e) => e,
                },
                Err(e) => e,
            };

            self.rollback(Some(err));

            // Check if the user wants to abort the transaction.
            if let TransactionControl::Abort = control(err) {
                self.abandon();
                return None;
            }

            // on retry wait for changes
            if let StmError::Retry = err {
                self.wait_for_change();
            }
        }
    }

    fn begin(&mut self) {
        let shared = &*self.shared;
        let tx = &mut self.tx;

        tx.nesting_depth = 1;
        tx.last_order = None;
        tx.commit_seen = shared.commits.generation();

        // Owner of the gate, restarting irrevocably.
        if tx.irrevocable {
            tx.slot.enter();
            tx.mode = Mode::Irrevocable;
            return;
        }

        let backoff = Backoff::new();
        loop {
            tx.slot.enter();
            if !shared.globals.gate_closed() {
                break;
            }
            tx.slot.leave();
            while shared.globals.gate_closed() {
                backoff.snooze();
            }
        }

        let epoch = shared.globals.epoch();
        if tx.epoch != Some(epoch) {
            tx.reset_for_switch(shared.current_algorithm(), epoch);
        }
        if !tx.alg.admits(tx.id) {
            tx.slot.leave();
            unrecoverable(&format!("{} supports no thread with id {}", tx.alg.kind(), tx.id));
        }

        tx.mode = Mode::ReadOnly;
        let alg = tx.alg;
        alg.begin(tx, shared);
    }

    fn commit(&mut self) -> StmResult<()> {
        let shared = &*self.shared;
        let tx = &mut self.tx;

        let wrote = if tx.irrevocable {
            tx.allocator.on_commit(&shared.heap, &shared.registry, tx.id, true);
            tx.irrevocable = false;
            tx.stats.irrevocable += 1;
            shared.globals.open_gate();
            debug!(thread = %tx.id, "irrevocable transaction committed");
            true
        } else {
            let wrote = tx.mode != Mode::ReadOnly;
            let alg = tx.alg;
            alg.commit(tx, shared)?;
            let immediate = alg.reclaims_immediately();
            tx.allocator.on_commit(&shared.heap, &shared.registry, tx.id, immediate);
            wrote
        };

        let callbacks = tx.callbacks.take();
        tx.clear_logs();
        tx.mode = Mode::ReadOnly;
        tx.nesting_depth = 0;
        tx.consec_aborts = 0;
        if wrote {
            tx.stats.commits_rw += 1;
        } else {
            tx.stats.commits_ro += 1;
        }
        tx.slot.leave();

        if wrote {
            shared.commits.set_changed();
        }
        if !callbacks.is_empty() {
            callbacks.run_commit();
        }
        Ok(())
    }

    /// Undo the running transaction. `cause` is `None` for a panic in the
    /// transaction body.
    fn rollback(&mut self, cause: Option<StmError>) {
        if self.tx.mode == Mode::Irrevocable {
            self.tx.slot.leave();
            self.abandon();
            unrecoverable("rollback of an irrevocable transaction");
        }

        let shared = &*self.shared;
        let tx = &mut self.tx;
        let alg = tx.alg;
        alg.rollback(tx, shared);
        tx.allocator.on_abort(&shared.heap);
        let callbacks = tx.callbacks.take();
        tx.clear_logs();
        tx.mode = Mode::ReadOnly;
        tx.nesting_depth = 0;

        tx.stats.aborts += 1;
        if cause == Some(StmError::Retry) {
            tx.stats.retries += 1;
        }
        tx.consec_aborts = tx.consec_aborts.saturating_add(1);
        trace!(thread = %tx.id, alg = %tx.alg.kind(), cause = ?cause, "transaction aborted");

        tx.slot.leave();
        if !callbacks.is_empty() {
            callbacks.run_rollback();
        }
    }

    /// Give up on the transaction after it was rolled back.
    fn abandon(&mut self) {
        if self.tx.irrevocable {
            self.tx.irrevocable = false;
            self.shared.globals.open_gate();
        }
    }

    fn wait_for_change(&mut self) {
        let shared = &*self.shared;
        shared.commits.wait(self.tx.commit_seen, shared.config.retry_wait);
    }

    /// Unregister the thread and return its statistics.
    pub fn shutdown(self) -> ThreadStats {
        self.tx.stats.clone()
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        let shared = &*self.shared;
        self.tx.allocator.flush(&shared.heap);
        shared.registry.unregister(self.tx.id);

        let stats = &self.tx.stats;
        info!(
            thread = %self.tx.id,
            commits_ro = stats.commits_ro,
            commits_rw = stats.commits_rw,
            aborts = stats.aborts,
            retries = stats.retries,
            irrevocable = stats.irrevocable,
            "thread shutdown"
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::algs::AlgorithmKind;
    use crate::test::engine;
    use crate::{guard, retry};

    #[test]
    fn stats_count_commits_and_aborts() {
        let stm = engine(AlgorithmKind::NOrec);
        let addr = stm.alloc(1).unwrap();
        let mut thread = stm.thread_init().unwrap();

        thread.atomically(|tx| tx.read(addr));
        thread.atomically(|tx| tx.write(addr, 1));

        let mut first = true;
        thread.atomically(|tx| {
            tx.write(addr, 2)?;
            if first {
                first = false;
                return Err(StmError::Conflict);
            }
            Ok(())
        });

        let stats = thread.shutdown();
        assert_eq!(stats.commits_ro, 1);
        assert_eq!(stats.commits_rw, 2);
        assert_eq!(stats.aborts, 1);
        assert_eq!(stm.load(addr), 2);
        assert_eq!(stm.registered_threads(), 0);
    }

    #[test]
    fn control_can_abort() {
        let stm = engine(AlgorithmKind::OrecEager);
        let addr = stm.alloc(1).unwrap();
        let mut thread = stm.thread_init().unwrap();

        let r: Option<()> = thread.with_control(
            |e| {
                assert_eq!(e, StmError::Retry);
                TransactionControl::Abort
            },
            |tx| {
                tx.write(addr, 7)?;
                retry()
            },
        );
        assert_eq!(r, None);
        assert_eq!(stm.load(addr), 0);
        assert_eq!(thread.stats().retries, 1);
    }

    #[test]
    fn retry_waits_for_a_commit() {
        let stm = engine(AlgorithmKind::OrecLazy);
        let addr = stm.alloc(1).unwrap();
        let mut thread = stm.thread_init().unwrap();

        let mut runs = 0;
        let r = thread.with_control(
            |_| TransactionControl::Retry,
            |tx| {
                runs += 1;
                let x = tx.read(addr)?;
                if runs < 3 {
                    guard(x == 1)?;
                }
                Ok(x)
            },
        );
        assert_eq!(r, Some(0));
        assert_eq!(thread.stats().retries, 2);
    }

    #[test]
    fn panic_rolls_back() {
        let stm = engine(AlgorithmKind::OrecEager);
        let addr = stm.alloc(1).unwrap();
        let mut thread = stm.thread_init().unwrap();

        let r = panic::catch_unwind(AssertUnwindSafe(|| {
            thread.atomically(|tx| -> StmResult<()> {
                tx.write(addr, 5)?;
                panic!("boom");
            })
        }));
        assert!(r.is_err());
        assert_eq!(stm.load(addr), 0);

        // the thread is still usable
        thread.atomically(|tx| tx.write(addr, 6));
        assert_eq!(stm.load(addr), 6);
    }

    #[test]
    fn allocation_is_undone_on_abort() {
        let stm = engine(AlgorithmKind::NOrec);
        let mut thread = stm.thread_init().unwrap();
        let before = stm.heap().allocated_words();

        let mut first = true;
        let block = thread.atomically(|tx| {
            let block = tx.alloc(4);
            if first {
                first = false;
                return Err(StmError::Conflict);
            }
            Ok(block)
        });
        assert_eq!(stm.heap().allocated_words(), before + 4);

        thread.atomically(|tx| {
            tx.free(block);
            Ok(())
        });
        drop(thread);
        assert_eq!(stm.heap().allocated_words(), before);
    }
}

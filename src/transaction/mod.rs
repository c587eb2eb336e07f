// Copyright 2015-2016 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

pub mod allocator;
pub mod callbacks;
pub mod control_block;
pub mod descriptor;
pub mod undo_log;
pub mod value_list;
pub mod write_set;

use std::cell::Cell;

use tracing::debug;

use self::descriptor::{Mode, TxThread};
use crate::algs::{AlgorithmKind, Irrevocability};
use crate::error::unrecoverable;
use crate::memory::{Addr, Word, FULL_MASK};
use crate::metadata::ThreadId;
use crate::result::{StmError, StmResult};
use crate::stm::Shared;

thread_local!(static TRANSACTION_RUNNING: Cell<bool> = Cell::new(false));

/// `TransactionGuard` checks against nested STM calls.
///
/// Use guard, so that it correctly marks the Transaction as finished.
pub(crate) struct TransactionGuard;

impl TransactionGuard {
    pub fn new() -> TransactionGuard {
        TRANSACTION_RUNNING.with(|t| {
            assert!(!t.get(), "STM: Nested Transaction");
            t.set(true);
        });
        TransactionGuard
    }

    /// Is a transaction running on this OS thread?
    pub fn running() -> bool {
        TRANSACTION_RUNNING.with(Cell::get)
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        TRANSACTION_RUNNING.with(|t| {
            t.set(false);
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionControl {
    Retry,
    Abort,
}

/// The running transaction, as seen by the transaction body.
///
/// Every access goes through the read and write barriers of the algorithm
/// the transaction started with. Once the transaction is irrevocable, the
/// barriers are skipped and memory is accessed directly.
pub struct Transaction<'a> {
    tx: &'a mut TxThread,
    shared: &'a Shared,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(tx: &'a mut TxThread, shared: &'a Shared) -> Transaction<'a> {
        Transaction { tx, shared }
    }

    /// Read a word.
    ///
    /// The value is consistent with every other value this transaction read
    /// so far, or the call returns `StmError::Conflict`.
    #[inline]
    pub fn read(&mut self, addr: Addr) -> StmResult<Word> {
        self.read_masked(addr, FULL_MASK)
    }

    /// Read the bits of `addr` selected by `mask`. The other bits of the
    /// result are unspecified.
    pub fn read_masked(&mut self, addr: Addr, mask: Word) -> StmResult<Word> {
        if self.tx.mode == Mode::Irrevocable {
            return Ok(self.shared.heap.load(addr));
        }
        let alg = self.tx.alg;
        alg.read(self.tx, self.shared, addr, mask)
    }

    /// Write a word.
    ///
    /// Depending on the algorithm the write is buffered until commit or
    /// performed in place and undone on abort.
    #[inline]
    pub fn write(&mut self, addr: Addr, val: Word) -> StmResult<()> {
        self.write_masked(addr, val, FULL_MASK)
    }

    /// Write only the bits of `addr` selected by `mask`.
    pub fn write_masked(&mut self, addr: Addr, val: Word, mask: Word) -> StmResult<()> {
        if self.tx.mode == Mode::Irrevocable {
            self.shared.heap.store_masked(addr, val, mask);
            return Ok(());
        }
        let alg = self.tx.alg;
        alg.write(self.tx, self.shared, addr, val, mask)
    }

    /// Allocate a zeroed block of `words` words.
    ///
    /// The block is returned to the heap if the transaction aborts.
    pub fn alloc(&mut self, words: usize) -> Addr {
        match self.tx.allocator.alloc(&self.shared.heap, words) {
            Ok(addr) => addr,
            Err(e) => unrecoverable(&e.to_string()),
        }
    }

    /// Free a block when the transaction commits.
    ///
    /// The memory is handed back to the heap once no concurrent transaction
    /// can still read it.
    pub fn free(&mut self, addr: Addr) {
        if !self.shared.heap.is_allocated(addr) {
            unrecoverable(&format!("free of unallocated address {}", addr));
        }
        self.tx.allocator.free(addr);
    }

    /// Make the transaction irrevocable: it will commit, and no other
    /// transaction runs until it does.
    ///
    /// Returns `StmError::Conflict` if the transaction must restart first.
    /// The restarted run is irrevocable from its first access.
    pub fn become_irrevocable(&mut self) -> StmResult<()> {
        if self.is_irrevocable() {
            return Ok(());
        }

        let alg = self.tx.alg;
        match alg.irrevocability() {
            Irrevocability::Native => {
                if alg.irrevoc(self.tx, self.shared) {
                    debug!(thread = %self.tx.id, alg = %alg.kind(), "transaction became irrevocable");
                    Ok(())
                } else {
                    Err(StmError::Conflict)
                }
            }
            Irrevocability::Unsupported => {
                unrecoverable(&format!("{} does not support irrevocability", alg.kind()))
            }
            irrevocability => {
                if !self.shared.globals.try_close_gate() {
                    return Err(StmError::Conflict);
                }
                self.tx.irrevocable = true;
                self.shared.registry.wait_for_quiescence(Some(self.tx.id));

                if irrevocability == Irrevocability::InFlight && alg.irrevoc(self.tx, self.shared) {
                    self.tx.mode = Mode::Irrevocable;
                    debug!(thread = %self.tx.id, alg = %alg.kind(), "transaction became irrevocable");
                    Ok(())
                } else {
                    debug!(thread = %self.tx.id, alg = %alg.kind(), "restarting irrevocably");
                    Err(StmError::Conflict)
                }
            }
        }
    }

    /// Run `f` on this thread after the transaction committed.
    ///
    /// Handlers run in registration order once the transaction has left
    /// the runtime, but before `atomically` returns. They must not start a
    /// transaction themselves. A handler registered by an attempt that
    /// aborts is dropped without running.
    pub fn on_commit<F>(&mut self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.callbacks.push_commit(Box::new(f));
    }

    /// Run `f` on this thread after this attempt rolled back, for example
    /// to undo an external side effect. The same restrictions as for
    /// `on_commit` apply.
    pub fn on_rollback<F>(&mut self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.callbacks.push_rollback(Box::new(f));
    }

    pub fn is_irrevocable(&self) -> bool {
        self.tx.mode == Mode::Irrevocable || self.tx.alg.is_irrevocable(self.tx)
    }

    /// Algorithm this transaction runs with.
    pub fn algorithm(&self) -> AlgorithmKind {
        self.tx.alg.kind()
    }

    pub fn thread_id(&self) -> ThreadId {
        self.tx.id
    }

    /// Run `f` as a nested transaction.
    ///
    /// Nesting is flat: `f` shares the logs of the outer transaction and an
    /// abort anywhere restarts the outermost one.
    pub fn atomic<T, F>(&mut self, f: F) -> StmResult<T>
    where
        F: FnOnce(&mut Transaction<'a>) -> StmResult<T>,
    {
        self.tx.nesting_depth += 1;
        let result = f(self);
        self.tx.nesting_depth -= 1;
        result
    }

    pub fn nesting_depth(&self) -> u32 {
        self.tx.nesting_depth
    }
}

// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! This library implements a word-based
//! [software transactional memory](https://en.wikipedia.org/wiki/Software_transactional_memory)
//! runtime, often abbreviated with STM.
//!
//! Threads run transactions against a shared heap of machine words. Each
//! transaction either commits all of its writes at once or none of them;
//! when it collides with another thread it is rolled back and run again.
//! How conflicts are detected is decided by one of several interchangeable
//! algorithms (see `AlgorithmKind`), and the algorithm can be switched
//! while the program runs.
//!
//! # Usage
//!
//! Create an engine with `Stm::new`, register every thread that takes part
//! with `Stm::thread_init` and run transactions with
//! `ThreadHandle::atomically`.
//!
//! ```
//! # use stm_runtime::*;
//! let stm = Stm::new(Config::default().with_heap_words(1024).with_table_size(1024)).unwrap();
//! let var = TVar::new(&stm, 0usize).unwrap();
//!
//! let mut thread = stm.thread_init().unwrap();
//! let x = thread.atomically(|tx| {
//!     var.write(tx, 42)?; // Pass failure to parent.
//!     var.read(tx) // Return the value saved in var.
//! });
//!
//! assert_eq!(x, 42);
//! ```
//!
//! Nested calls to `atomically` are not allowed. A run-time check prevents this.
//! Instead of using atomically internally, add a `&mut Transaction` parameter and
//! return `StmResult`.
//!
//! Use ? on `StmResult`, to propagate a transaction error through the system.
//! Do not handle the error yourself.
//!
//! # Transaction safety
//!
//! * Don't run code with side effects, especially no IO-code.
//! Transactions repeat in failure cases. Using IO would repeat this IO-code.
//! If you really need to, call `Transaction::become_irrevocable` first,
//! where the algorithm supports it.
//! * Don't handle `StmResult` yourself. Always use `?` and
//! never ignore a `StmResult`.
//! * Don't mix locks and transactions. Your code will easily deadlock or slow
//! down unpredictably.
//! * Only touch the heap with `Stm::load` and `Stm::store` while the data is
//! private to the thread. Whether data can be made private by a transaction
//! depends on the algorithm, see `AlgorithmKind::privatization_safe`.
//!
//! Panicking in a transaction aborts it and discards all of its changes. No
//! poisoning or half written transactions happen. The exception are
//! transactions that already wrote in place and cannot be undone: under CGL
//! and TML after the first write, and under CohortsLI and CTokenTurbo once
//! `Transaction::is_irrevocable` returns true. Rolling back such a
//! transaction, by a panic or by returning an error, aborts the process.
//!
//! # Configuration
//!
//! `Stm::from_env` reads the algorithm from `STM_CONFIG` and the table
//! sizes from `STM_HEAP_WORDS`, `STM_NUM_ORECS` and `STM_MAX_THREADS`.
//!
//! # Logging
//!
//! The runtime reports engine creation, algorithm switches, irrevocable
//! transactions, aborts and per-thread statistics through `tracing`.

mod algs;
mod config;
mod error;
mod globals;
mod memory;
mod metadata;
mod registry;
mod result;
mod stm;
mod thread;
mod transaction;
mod tvar;

#[cfg(test)]
mod test;

pub use crate::algs::AlgorithmKind;
pub use crate::config::{CohortSeal, Config, LockTimeouts};
pub use crate::error::Error;
pub use crate::globals::Globals;
pub use crate::memory::{Addr, Heap, Word, WordValue, FULL_MASK};
pub use crate::metadata::{OrecWord, ThreadId};
pub use crate::result::*;
pub use crate::stm::Stm;
pub use crate::thread::ThreadHandle;
pub use crate::transaction::descriptor::ThreadStats;
pub use crate::transaction::{Transaction, TransactionControl};
pub use crate::tvar::TVar;

#[inline]
/// Call `retry` to abort an operation and run the whole transaction again.
///
/// The thread then blocks until another transaction commits, or for at
/// most `Config::retry_wait`, to keep CPU-usage low.
///
/// # Examples
///
/// ```no_run
/// # use stm_runtime::*;
/// let stm = Stm::new(Config::default()).unwrap();
/// let mut thread = stm.thread_init().unwrap();
/// let infinite_retry: i32 = thread.atomically(|_| retry());
/// ```
pub fn retry<T>() -> StmResult<T> {
    Err(StmError::Retry)
}

#[inline]
/// Unwrap `Option` or call retry if it is `None`.
pub fn unwrap_or_retry<T>(option: Option<T>) -> StmResult<T> {
    match option {
        Some(x) => Ok(x),
        None => retry(),
    }
}

#[inline]
/// Retry until `cond` is true.
///
/// # Example
///
/// ```
/// # use stm_runtime::*;
/// let stm = Stm::new(Config::default().with_heap_words(64).with_table_size(64)).unwrap();
/// let mut thread = stm.thread_init().unwrap();
/// let var = TVar::new(&stm, 42).unwrap();
///
/// let x = thread.atomically(|tx| {
///     let v = var.read(tx)?;
///     guard(v == 42)?;
///     // v is now always 42.
///     Ok(v)
/// });
/// assert_eq!(x, 42);
/// ```
pub fn guard(cond: bool) -> StmResult<()> {
    if cond {
        Ok(())
    } else {
        retry()
    }
}

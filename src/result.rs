// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

/// Reason why a single run of a transaction did not complete.
///
/// Both variants are handled by the transaction harness: the transaction is
/// rolled back and run again. They never escape `ThreadHandle::atomically`.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum StmError {
    /// A conflict with another thread was detected: a location the
    /// transaction depends on changed, a lock was held by someone else or
    /// a commit-time validation failed.
    Conflict,

    /// `retry` was called.
    ///
    /// The harness rolls back and waits for another transaction to commit
    /// before running the body again.
    Retry,
}

/// StmResult is a result of a single step of a STM calculation.
///
/// It informs of success or the type of failure. Normally you should not use
/// it directly, but propagate it with `?`. Recovering from an error inside a
/// transaction body would continue running on a view of memory that the
/// runtime already knows to be inconsistent.
pub type StmResult<T> = Result<T, StmError>;

// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Errors of the non-transactional API and the fatal error path.

use thiserror::Error;

use crate::memory::Addr;

/// Errors returned by engine setup, configuration and heap management.
///
/// Conflicts inside a transaction are not errors in this sense; they are
/// reported as `StmError` and handled by the retry loop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unknown STM algorithm `{0}`")]
    UnknownAlgorithm(String),

    #[error("invalid configuration: {key} = {value}")]
    InvalidConfig { key: &'static str, value: String },

    #[error("too many threads registered with the STM (limit {0})")]
    TooManyThreads(usize),

    #[error("transactional heap exhausted while allocating {requested} words")]
    OutOfMemory { requested: usize },

    #[error("address {0} was not allocated from the transactional heap")]
    InvalidFree(Addr),

    #[error("{0} is not supported by the active algorithm")]
    Unsupported(String),
}

/// Report a violated runtime invariant and abort the process.
///
/// Used for rollback of a transaction that cannot be undone, unsupported
/// irrevocability and exhausted resources inside a transaction. At that
/// point the caller may hold a global lock or have written in place, so
/// unwinding would leave other threads blocked or reading a half-written
/// transaction.
#[cold]
#[track_caller]
pub(crate) fn unrecoverable(msg: &str) -> ! {
    let location = std::panic::Location::caller();
    tracing::error!(%location, "STM: {}", msg);
    eprintln!("STM: {} at {}", msg, location);
    std::process::abort()
}

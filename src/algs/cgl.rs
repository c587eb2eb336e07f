// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! CGL: every transaction holds one global lock, kept in `timestamp`.

use std::sync::atomic::Ordering;

use crossbeam_utils::Backoff;

use super::{Algorithm, AlgorithmKind, Irrevocability};
use crate::error::unrecoverable;
use crate::globals::Globals;
use crate::memory::{Addr, Word};
use crate::result::StmResult;
use crate::stm::Shared;
use crate::transaction::descriptor::{Mode, TxThread};

pub(crate) struct Cgl;

impl Algorithm for Cgl {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::CGL
    }

    fn privatization_safe(&self) -> bool {
        true
    }

    fn irrevocability(&self) -> Irrevocability {
        Irrevocability::Native
    }

    fn reclaims_immediately(&self) -> bool {
        true
    }

    fn is_irrevocable(&self, _tx: &TxThread) -> bool {
        true
    }

    fn begin(&self, _tx: &mut TxThread, shared: &Shared) {
        let lock = &shared.globals.timestamp;
        let backoff = Backoff::new();
        loop {
            if lock.load(Ordering::Relaxed) == 0
                && lock.compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed).is_ok()
            {
                return;
            }
            backoff.snooze();
        }
    }

    fn read(&self, _tx: &mut TxThread, shared: &Shared, addr: Addr, _mask: Word) -> StmResult<Word> {
        Ok(shared.heap.load(addr))
    }

    fn write(&self, tx: &mut TxThread, shared: &Shared, addr: Addr, val: Word, mask: Word) -> StmResult<()> {
        tx.mode = Mode::Writing;
        shared.heap.store_masked(addr, val, mask);
        Ok(())
    }

    fn commit(&self, _tx: &mut TxThread, shared: &Shared) -> StmResult<()> {
        shared.globals.timestamp.store(0, Ordering::Release);
        Ok(())
    }

    /// A transaction that only read can give the lock back. One that wrote
    /// has changed memory in place and cannot be undone.
    fn rollback(&self, tx: &mut TxThread, shared: &Shared) {
        if tx.mode != Mode::ReadOnly {
            unrecoverable("CGL cannot roll back a transaction that wrote");
        }
        shared.globals.timestamp.store(0, Ordering::Release);
    }

    fn irrevoc(&self, _tx: &mut TxThread, _shared: &Shared) -> bool {
        true
    }

    /// `timestamp` becomes the lock, so park its value where the other
    /// algorithms find it.
    fn on_switch_to(&self, globals: &Globals) {
        globals.timestamp_max.store(globals.max_version(), Ordering::Release);
        globals.timestamp.store(0, Ordering::Release);
    }
}

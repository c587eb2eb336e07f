// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Concurrency control algorithms.
//!
//! Every algorithm is a stateless unit struct implementing `Algorithm`. All
//! state lives in the thread descriptor (`TxThread`) and in the engine
//! (`Shared`). Inside an algorithm the descriptor's `Mode` selects the
//! barrier set: a transaction starts `ReadOnly`, moves to `Writing` on its
//! first write and back to `ReadOnly` when it commits or rolls back.

mod cgl;
mod cohorts;
mod ctoken;
mod llt;
mod norec;
mod orec_eager;
mod orec_ela;
mod orec_lazy;
mod pipeline;
mod tlrw;
mod tml;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::Ordering;

use crossbeam_utils::Backoff;

use crate::error::Error;
use crate::globals::Globals;
use crate::memory::{Addr, Word};
use crate::metadata::{LockTable, Orec, ThreadId};
use crate::result::StmResult;
use crate::stm::Shared;
use crate::transaction::descriptor::TxThread;
use crate::transaction::write_set::{Lookup, WriteSet};

/// The algorithms this runtime provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AlgorithmKind {
    /// One global lock around every transaction.
    CGL,
    /// Single writer sequence lock, in-place writes.
    TML,
    /// Global sequence lock, value-based validation, redo log.
    NOrec,
    /// Orecs, encounter-time locking, undo log.
    OrecEager,
    /// Orecs, commit-time locking, redo log.
    OrecLazy,
    /// Orecs, commit-time locking, redo log, no snapshot extension.
    LLT,
    /// OrecLazy with in-order completion, privatization safe.
    OrecELA,
    /// Visible readers on bytelocks, in-place writes.
    ByteEager,
    /// Visible readers on bitlocks, in-place writes.
    BitEager,
    /// Cohorts of transactions that start together and commit in order.
    Cohorts,
    /// Cohorts whose last running member writes in place.
    CohortsLI,
    /// Commit order taken at the first write.
    CToken,
    /// CToken with an in-place mode for the oldest writer.
    CTokenTurbo,
    /// Commit order taken at begin.
    Pipeline,
}

impl AlgorithmKind {
    pub const ALL: [AlgorithmKind; 14] = [
        AlgorithmKind::CGL,
        AlgorithmKind::TML,
        AlgorithmKind::NOrec,
        AlgorithmKind::OrecEager,
        AlgorithmKind::OrecLazy,
        AlgorithmKind::LLT,
        AlgorithmKind::OrecELA,
        AlgorithmKind::ByteEager,
        AlgorithmKind::BitEager,
        AlgorithmKind::Cohorts,
        AlgorithmKind::CohortsLI,
        AlgorithmKind::CToken,
        AlgorithmKind::CTokenTurbo,
        AlgorithmKind::Pipeline,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AlgorithmKind::CGL => "CGL",
            AlgorithmKind::TML => "TML",
            AlgorithmKind::NOrec => "NOrec",
            AlgorithmKind::OrecEager => "OrecEager",
            AlgorithmKind::OrecLazy => "OrecLazy",
            AlgorithmKind::LLT => "LLT",
            AlgorithmKind::OrecELA => "OrecELA",
            AlgorithmKind::ByteEager => "ByteEager",
            AlgorithmKind::BitEager => "BitEager",
            AlgorithmKind::Cohorts => "Cohorts",
            AlgorithmKind::CohortsLI => "CohortsLI",
            AlgorithmKind::CToken => "CToken",
            AlgorithmKind::CTokenTurbo => "CTokenTurbo",
            AlgorithmKind::Pipeline => "Pipeline",
        }
    }

    /// Can a transaction privatize data by writing a flag, and then access
    /// it without instrumentation?
    pub fn privatization_safe(self) -> bool {
        self.algorithm().privatization_safe()
    }

    /// Can a transaction of this algorithm become irrevocable?
    pub fn supports_irrevocability(self) -> bool {
        self.algorithm().irrevocability() != Irrevocability::Unsupported
    }

    pub(crate) fn algorithm(self) -> &'static dyn Algorithm {
        match self {
            AlgorithmKind::CGL => &cgl::Cgl,
            AlgorithmKind::TML => &tml::Tml,
            AlgorithmKind::NOrec => &norec::NOrec,
            AlgorithmKind::OrecEager => &orec_eager::OrecEager,
            AlgorithmKind::OrecLazy => &orec_lazy::OrecLazy,
            AlgorithmKind::LLT => &llt::Llt,
            AlgorithmKind::OrecELA => &orec_ela::OrecEla,
            AlgorithmKind::ByteEager => &tlrw::BYTE_EAGER,
            AlgorithmKind::BitEager => &tlrw::BIT_EAGER,
            AlgorithmKind::Cohorts => &cohorts::COHORTS,
            AlgorithmKind::CohortsLI => &cohorts::COHORTS_LI,
            AlgorithmKind::CToken => &ctoken::CTOKEN,
            AlgorithmKind::CTokenTurbo => &ctoken::CTOKEN_TURBO,
            AlgorithmKind::Pipeline => &pipeline::Pipeline,
        }
    }

    pub(crate) fn from_u8(v: u8) -> AlgorithmKind {
        AlgorithmKind::ALL[v as usize]
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AlgorithmKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<AlgorithmKind, Error> {
        let s = s.trim();
        AlgorithmKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownAlgorithm(s.to_string()))
    }
}

/// How an algorithm becomes irrevocable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Irrevocability {
    /// `irrevoc` is called directly, without stopping other threads.
    Native,
    /// Other threads are stopped, then `irrevoc` may keep the transaction
    /// running uninstrumented.
    InFlight,
    /// Other threads are stopped and the transaction restarts irrevocably.
    Restart,
    /// Becoming irrevocable is a fatal error.
    Unsupported,
}

/// The interface every concurrency control algorithm implements.
///
/// `read`, `write` and `commit` report conflicts as `Err(StmError)`. After
/// any error the harness calls `rollback`, which must release everything
/// the transaction holds, whatever point it failed at.
pub(crate) trait Algorithm: Sync {
    fn kind(&self) -> AlgorithmKind;

    fn privatization_safe(&self) -> bool;

    fn irrevocability(&self) -> Irrevocability {
        Irrevocability::Restart
    }

    /// True if frees can be reclaimed at commit without waiting for other
    /// threads.
    fn reclaims_immediately(&self) -> bool {
        false
    }

    /// Can the thread with this id run transactions of this algorithm?
    fn admits(&self, _id: ThreadId) -> bool {
        true
    }

    fn is_irrevocable(&self, _tx: &TxThread) -> bool {
        false
    }

    fn begin(&self, tx: &mut TxThread, shared: &Shared);

    fn read(&self, tx: &mut TxThread, shared: &Shared, addr: Addr, mask: Word) -> StmResult<Word>;

    fn write(&self, tx: &mut TxThread, shared: &Shared, addr: Addr, val: Word, mask: Word) -> StmResult<()>;

    fn commit(&self, tx: &mut TxThread, shared: &Shared) -> StmResult<()>;

    fn rollback(&self, tx: &mut TxThread, shared: &Shared);

    /// Try to turn the running transaction irrevocable. For `InFlight`
    /// algorithms the caller has stopped every other thread.
    fn irrevoc(&self, _tx: &mut TxThread, _shared: &Shared) -> bool {
        false
    }

    /// Reconcile the shared counters when this algorithm is installed. No
    /// transaction runs while this is called.
    fn on_switch_to(&self, globals: &Globals);
}

/// Read with the write set consulted first. `read` fetches memory through
/// the algorithm's read barrier.
#[inline]
pub(crate) fn read_rw<F>(tx: &mut TxThread, addr: Addr, mask: Word, read: F) -> StmResult<Word>
where
    F: FnOnce(&mut TxThread) -> StmResult<Word>,
{
    match tx.writes.find(addr, mask) {
        Lookup::Hit(val) => Ok(val),
        Lookup::Miss => read(tx),
        Lookup::Partial(entry) => Ok(WriteSet::overlay(&entry, read(tx)?)),
    }
}

/// True if every orec in the read set is either unchanged since `time`
/// or held by `tx`.
#[inline]
pub(crate) fn orecs_valid(tx: &TxThread, orecs: &LockTable<Orec>, time: usize) -> bool {
    tx.r_orecs.iter().all(|&i| {
        let raw = orecs.get(i).raw();
        raw <= time || raw == tx.my_lock
    })
}

/// Write back the redo log, stamping each orec with `order` before its
/// location changes.
pub(crate) fn stamp_and_writeback(tx: &TxThread, shared: &Shared, order: usize) {
    for entry in tx.writes.iter() {
        shared.orecs.get_lock_for(entry.addr).set_version(order);
        entry.writeback(&shared.heap);
    }
}

/// Spin until `last_complete` reaches `order - 1`.
pub(crate) fn wait_for_turn(globals: &Globals, order: usize) {
    let backoff = Backoff::new();
    while globals.last_complete.load(Ordering::Acquire) != order - 1 {
        backoff.snooze();
    }
}

/// Mark the commit slot `order` complete after its write-back.
pub(crate) fn publish(tx: &mut TxThread, globals: &Globals, order: usize) {
    globals.last_complete.store(order, Ordering::Release);
    tx.last_order = Some(order);
}

/// Mark the commit slot `order` complete without writing anything. The
/// caller's turn must have come.
pub(crate) fn release_slot(tx: &mut TxThread, globals: &Globals, order: usize) {
    globals.last_complete.store(order, Ordering::Release);
    tx.stats.skipped_orders += 1;
}

/// Wait for the turn of `order`, then complete it empty.
pub(crate) fn complete_empty(tx: &mut TxThread, globals: &Globals, order: usize) {
    wait_for_turn(globals, order);
    release_slot(tx, globals, order);
}

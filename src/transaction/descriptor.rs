// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Per-thread transaction descriptor.

use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use super::allocator::TxAllocator;
use super::callbacks::Callbacks;
use super::undo_log::UndoLog;
use super::value_list::ValueList;
use super::write_set::WriteSet;
use crate::algs::{Algorithm, AlgorithmKind};
use crate::metadata::{OrecWord, ThreadId};
use crate::registry::ThreadSlot;

/// Which barriers are active for the running transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// No write yet.
    ReadOnly,
    /// At least one write.
    Writing,
    /// Oldest writer of an ordered algorithm; reads and writes go straight
    /// to memory and cannot be undone.
    Turbo,
    /// The thread runs alone, uninstrumented.
    Irrevocable,
}

/// Counters of one thread, reported at shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadStats {
    pub commits_ro: u64,
    pub commits_rw: u64,
    pub aborts: u64,
    /// Rollbacks caused by `retry`. Also counted in `aborts`.
    pub retries: u64,
    pub irrevocable: u64,
    /// Commit orders this thread gave up after an abort, completed without
    /// writing.
    pub skipped_orders: u64,
}

impl ThreadStats {
    pub fn commits(&self) -> u64 {
        self.commits_ro + self.commits_rw
    }
}

/// Everything a thread needs to run transactions. Created once per thread
/// and reset, not reallocated, between transactions.
pub(crate) struct TxThread {
    pub id: ThreadId,
    /// This thread's orec lock word.
    pub my_lock: usize,
    pub slot: Arc<ThreadSlot>,

    /// Algorithm of the current transaction and the switch epoch it was
    /// loaded in.
    pub alg: &'static dyn Algorithm,
    pub epoch: Option<usize>,
    pub mode: Mode,

    pub nesting_depth: u32,
    pub start_time: usize,
    pub end_time: usize,
    /// Last `last_complete` value the transaction validated against.
    pub ts_cache: usize,
    /// Commit order of ordered algorithms.
    pub order: Option<usize>,
    /// Commit order the last committed transaction published.
    pub last_order: Option<usize>,
    pub tml_has_lock: bool,
    /// Set from the moment the thread owns the begin gate for an
    /// irrevocable run until that run commits.
    pub irrevocable: bool,

    pub undo_log: UndoLog,
    pub writes: WriteSet,
    pub vlist: ValueList,
    /// Read set of orec algorithms, as orec table indices.
    pub r_orecs: Vec<usize>,
    /// Orecs this transaction locked.
    pub locks: Vec<usize>,
    /// Read and write locks of the bytelock and bitlock algorithms.
    pub r_rwlocks: Vec<usize>,
    pub w_rwlocks: Vec<usize>,

    pub allocator: TxAllocator,
    pub callbacks: Callbacks,
    pub stats: ThreadStats,
    pub consec_aborts: u32,
    pub rng: SmallRng,
    /// Commit signal generation seen at begin, for `retry`.
    pub commit_seen: usize,
}

impl TxThread {
    pub fn new(slot: Arc<ThreadSlot>, alg: AlgorithmKind) -> TxThread {
        let id = slot.id();
        TxThread {
            id,
            my_lock: OrecWord::Locked(id).encode(),
            slot,
            alg: alg.algorithm(),
            epoch: None,
            mode: Mode::ReadOnly,
            nesting_depth: 0,
            start_time: 0,
            end_time: 0,
            ts_cache: 0,
            order: None,
            last_order: None,
            tml_has_lock: false,
            irrevocable: false,
            undo_log: UndoLog::new(),
            writes: WriteSet::new(),
            vlist: ValueList::new(),
            r_orecs: Vec::new(),
            locks: Vec::new(),
            r_rwlocks: Vec::new(),
            w_rwlocks: Vec::new(),
            allocator: TxAllocator::new(),
            callbacks: Callbacks::new(),
            stats: ThreadStats::default(),
            consec_aborts: 0,
            rng: SmallRng::seed_from_u64(0x9E37_79B9_7F4A_7C15 ^ u64::from(id.get())),
            commit_seen: 0,
        }
    }

    /// Adopt the algorithm installed by a switch, dropping any per-algorithm
    /// state from before it.
    pub fn reset_for_switch(&mut self, alg: AlgorithmKind, epoch: usize) {
        self.alg = alg.algorithm();
        self.epoch = Some(epoch);
        self.mode = Mode::ReadOnly;
        self.order = None;
        self.tml_has_lock = false;
        self.end_time = 0;
        self.clear_logs();
    }

    pub fn clear_logs(&mut self) {
        self.undo_log.reset();
        self.writes.reset();
        self.vlist.reset();
        self.r_orecs.clear();
        self.locks.clear();
        self.r_rwlocks.clear();
        self.w_rwlocks.clear();
    }
}

// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Shared counters that order transactions across threads.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

/// Commit and ordering counters of one engine.
///
/// Which counters an algorithm uses, and what they mean, is up to the
/// algorithm. Every algorithm reconciles them in its `on_switch_to`.
#[derive(Debug, Default)]
pub struct Globals {
    /// Global version clock, sequence lock or commit order, depending on
    /// the algorithm.
    pub timestamp: CachePadded<AtomicUsize>,

    /// Highest timestamp seen before an algorithm that resets `timestamp`
    /// was installed.
    pub timestamp_max: CachePadded<AtomicUsize>,

    /// Order of the newest transaction whose write-back is complete.
    pub last_complete: CachePadded<AtomicUsize>,

    /// Cohorts: transactions that entered the current cohort.
    pub started: CachePadded<AtomicUsize>,

    /// Cohorts: transactions of the current cohort that reached commit.
    pub cpending: CachePadded<AtomicUsize>,

    /// Cohorts: transactions of the current cohort that finished commit.
    pub committed: CachePadded<AtomicUsize>,

    /// Cohorts: no transaction may join the current cohort.
    pub sealed: CachePadded<AtomicBool>,

    /// CohortsLI: the last running member of the cohort writes in place.
    pub inplace: CachePadded<AtomicBool>,

    /// Closed while an algorithm switch or an irrevocable transaction runs.
    gate: CachePadded<AtomicBool>,

    /// Bumped by every algorithm switch.
    epoch: CachePadded<AtomicUsize>,
}

impl Globals {
    pub fn new() -> Globals {
        Globals::default()
    }

    /// Largest value any of the version-like counters holds.
    ///
    /// Orecs never hold a version greater than this while no transaction
    /// runs.
    pub fn max_version(&self) -> usize {
        self.timestamp
            .load(Ordering::Acquire)
            .max(self.timestamp_max.load(Ordering::Acquire))
            .max(self.last_complete.load(Ordering::Acquire))
    }

    /// Returns true if no new transaction may start right now.
    #[inline]
    pub fn gate_closed(&self) -> bool {
        self.gate.load(Ordering::SeqCst)
    }

    /// Try to close the gate. Returns false if someone else holds it.
    pub fn try_close_gate(&self) -> bool {
        self.gate
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
    }

    pub fn open_gate(&self) {
        self.gate.store(false, Ordering::SeqCst);
    }

    #[inline]
    pub fn epoch(&self) -> usize {
        self.epoch.load(Ordering::Acquire)
    }

    pub(crate) fn next_epoch(&self) -> usize {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn gate_has_one_holder() {
        let g = Globals::new();
        assert!(!g.gate_closed());
        assert!(g.try_close_gate());
        assert!(!g.try_close_gate());
        assert!(g.gate_closed());
        g.open_gate();
        assert!(g.try_close_gate());
    }

    #[test]
    fn max_version_covers_all_clocks() {
        let g = Globals::new();
        g.timestamp.store(4, Ordering::Relaxed);
        g.timestamp_max.store(9, Ordering::Relaxed);
        g.last_complete.store(7, Ordering::Relaxed);
        assert_eq!(g.max_version(), 9);
    }
}

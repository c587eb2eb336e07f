// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam_utils::Backoff;
use tracing::{debug, info};

use crate::algs::AlgorithmKind;
use crate::config::Config;
use crate::error::Error;
use crate::globals::Globals;
use crate::memory::{Addr, Heap, Word};
use crate::metadata::{BitLock, ByteLock, LockTable, Orec, OrecWord};
use crate::registry::Registry;
use crate::thread::ThreadHandle;
use crate::transaction::control_block::ControlBlock;
use crate::transaction::TransactionGuard;

/// State shared by every thread of one engine.
pub(crate) struct Shared {
    pub config: Config,
    pub heap: Heap,
    pub orecs: LockTable<Orec>,
    pub bytelocks: LockTable<ByteLock>,
    pub bitlocks: LockTable<BitLock>,
    pub globals: Globals,
    pub registry: Registry,
    /// Signalled by every writing commit, for threads blocked in `retry`.
    pub commits: ControlBlock,
    algorithm: AtomicU8,
}

impl Shared {
    /// The installed algorithm. Stable while the caller is inside a
    /// transaction.
    #[inline]
    pub fn current_algorithm(&self) -> AlgorithmKind {
        AlgorithmKind::from_u8(self.algorithm.load(Ordering::Acquire))
    }
}

/// A transactional memory engine: a heap, the conflict detection metadata
/// and the algorithm currently in charge.
///
/// `Stm` is a cheap handle; clones refer to the same engine. Threads take
/// part in transactions through the `ThreadHandle` returned by
/// `thread_init`.
///
/// # Example
///
/// ```
/// use stm_runtime::{AlgorithmKind, Config, Stm, TVar};
///
/// let config = Config::default()
///     .with_algorithm(AlgorithmKind::OrecLazy)
///     .with_heap_words(1024)
///     .with_table_size(1024);
/// let stm = Stm::new(config).unwrap();
/// let var = TVar::new(&stm, 21usize).unwrap();
///
/// let mut thread = stm.thread_init().unwrap();
/// let x = thread.atomically(|tx| {
///     var.modify(tx, |x| x * 2)?;
///     var.read(tx)
/// });
/// assert_eq!(x, 42);
/// ```
#[derive(Clone)]
pub struct Stm {
    shared: Arc<Shared>,
}

impl Stm {
    pub fn new(config: Config) -> Result<Stm, Error> {
        config.validate()?;

        let globals = Globals::new();
        config.algorithm.algorithm().on_switch_to(&globals);

        let shared = Shared {
            heap: Heap::new(config.heap_words),
            orecs: LockTable::new(config.num_orecs, config.stripe_shift),
            bytelocks: LockTable::new(config.num_bytelocks, config.stripe_shift),
            bitlocks: LockTable::new(config.num_bitlocks, config.stripe_shift),
            globals,
            registry: Registry::new(config.max_threads),
            commits: ControlBlock::new(),
            algorithm: AtomicU8::new(config.algorithm as u8),
            config,
        };

        info!(
            algorithm = %shared.config.algorithm,
            heap_words = shared.config.heap_words,
            num_orecs = shared.config.num_orecs,
            max_threads = shared.config.max_threads,
            "stm engine created"
        );
        if !shared.config.cohort_seal.is_unset() {
            debug!(seal = ?shared.config.cohort_seal, "cohort seal thresholds");
        }

        Ok(Stm { shared: Arc::new(shared) })
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Stm {
        Stm { shared }
    }

    /// Create an engine configured by the `STM_*` environment variables.
    pub fn from_env() -> Result<Stm, Error> {
        Stm::new(Config::from_env()?)
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Register the calling thread.
    ///
    /// Fails with `Error::TooManyThreads` once `max_threads` handles are
    /// alive. Dropping the handle frees its id.
    pub fn thread_init(&self) -> Result<ThreadHandle, Error> {
        ThreadHandle::new(self.shared.clone())
    }

    pub fn algorithm(&self) -> AlgorithmKind {
        self.shared.current_algorithm()
    }

    /// Install another algorithm.
    ///
    /// Blocks new transactions, waits for the running ones to finish, lets
    /// the new algorithm adjust the shared counters and reopens.
    ///
    /// # Panics
    ///
    /// Panics when called from inside a transaction.
    pub fn set_algorithm(&self, kind: AlgorithmKind) {
        assert!(!TransactionGuard::running(), "STM: set_algorithm inside a transaction");

        let shared = &*self.shared;
        let backoff = Backoff::new();
        while !shared.globals.try_close_gate() {
            backoff.snooze();
        }
        shared.registry.wait_for_quiescence(None);

        let previous = shared.current_algorithm();
        kind.algorithm().on_switch_to(&shared.globals);
        shared.algorithm.store(kind as u8, Ordering::Release);
        let epoch = shared.globals.next_epoch();
        shared.globals.open_gate();

        debug!(from = %previous, to = %kind, epoch, "algorithm switched");
    }

    /// Allocate a zeroed block outside of any transaction.
    pub fn alloc(&self, words: usize) -> Result<Addr, Error> {
        self.shared.heap.allocate(words)
    }

    /// Free a block immediately. Only safe if no transaction can still
    /// access it.
    pub fn free(&self, addr: Addr) -> Result<(), Error> {
        self.shared.heap.release(addr).map(|_| ())
    }

    /// Read a word without a transaction.
    pub fn load(&self, addr: Addr) -> Word {
        self.shared.heap.load(addr)
    }

    /// Write a word without a transaction. The location must be private to
    /// the caller, or no transaction may be running.
    pub fn store(&self, addr: Addr, val: Word) {
        self.shared.heap.store(addr, val)
    }

    pub fn heap(&self) -> &Heap {
        &self.shared.heap
    }

    /// Current state of the orec covering `addr`.
    pub fn orec_for(&self, addr: Addr) -> OrecWord {
        self.shared.orecs.get_lock_for(addr).word()
    }

    pub fn globals(&self) -> &Globals {
        &self.shared.globals
    }

    pub fn registered_threads(&self) -> usize {
        self.shared.registry.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::engine;

    #[test]
    fn invalid_config_is_rejected() {
        let config = Config::default().with_max_threads(0);
        assert!(Stm::new(config).is_err());
    }

    #[test]
    fn thread_ids_are_reused() {
        let stm = engine(AlgorithmKind::NOrec);
        let a = stm.thread_init().unwrap();
        let b = stm.thread_init().unwrap();
        assert_eq!(a.id().get(), 1);
        assert_eq!(b.id().get(), 2);
        assert_eq!(stm.registered_threads(), 2);

        drop(a);
        let c = stm.thread_init().unwrap();
        assert_eq!(c.id().get(), 1);
    }

    #[test]
    fn thread_limit() {
        let stm = Stm::new(
            Config::default().with_heap_words(64).with_table_size(64).with_max_threads(1),
        )
        .unwrap();
        let _a = stm.thread_init().unwrap();
        assert_eq!(stm.thread_init().err(), Some(Error::TooManyThreads(1)));
    }

    #[test]
    fn switching_keeps_versions_monotonic() {
        let stm = engine(AlgorithmKind::OrecLazy);
        let addr = stm.alloc(1).unwrap();
        let mut thread = stm.thread_init().unwrap();
        for _ in 0..5 {
            thread.atomically(|tx| {
                let x = tx.read(addr)?;
                tx.write(addr, x + 1)
            });
        }
        let before = stm.globals().max_version();

        for kind in AlgorithmKind::ALL.iter() {
            stm.set_algorithm(*kind);
            assert_eq!(stm.algorithm(), *kind);
            assert!(stm.globals().max_version() >= before);
            thread.atomically(|tx| {
                let x = tx.read(addr)?;
                tx.write(addr, x + 1)
            });
        }
        assert_eq!(stm.load(addr), 5 + AlgorithmKind::ALL.len());
    }

    #[test]
    #[should_panic(expected = "set_algorithm inside a transaction")]
    fn set_algorithm_inside_transaction() {
        let stm = engine(AlgorithmKind::NOrec);
        let mut thread = stm.thread_init().unwrap();
        let other = stm.clone();
        thread.atomically(|_| {
            other.set_algorithm(AlgorithmKind::CGL);
            Ok(())
        });
    }
}

// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Engine configuration.
//!
//! A `Config` is built in code, or read from the environment with
//! `Config::from_env`:
//!
//! * `STM_CONFIG` names the initial algorithm (default `NOrec`),
//! * `STM_HEAP_WORDS`, `STM_NUM_ORECS` and `STM_MAX_THREADS` override the
//!   matching sizes,
//! * `STM_READS`, `STM_WRITES` and `STM_ABORTS` set the cohort seal
//!   thresholds; `-1` leaves a threshold unset.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::algs::AlgorithmKind;
use crate::error::Error;
use crate::metadata::MAX_THREADS;

/// Spin limits of the visible-reader lock algorithms. Exceeding one aborts
/// the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimeouts {
    /// Spins a reader waits for a writer to leave.
    pub read: u32,
    /// Spins a writer waits for the owner field.
    pub acquire: u32,
    /// Spins a writer waits for each reader to drain.
    pub drain: u32,
}

impl Default for LockTimeouts {
    fn default() -> LockTimeouts {
        LockTimeouts { read: 32, acquire: 128, drain: 256 }
    }
}

/// When a cohort member closes its cohort to new transactions early.
///
/// Normally a cohort stays open until its first member reaches commit. A
/// member seals it as soon as it has done `reads` reads or `writes` writes,
/// or when it begins after `aborts` consecutive aborts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CohortSeal {
    pub reads: Option<usize>,
    pub writes: Option<usize>,
    pub aborts: Option<u32>,
}

impl CohortSeal {
    pub fn is_unset(&self) -> bool {
        self.reads.is_none() && self.writes.is_none() && self.aborts.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Algorithm installed when the engine starts.
    pub algorithm: AlgorithmKind,
    /// Words in the transactional heap.
    pub heap_words: usize,
    pub num_orecs: usize,
    pub num_bytelocks: usize,
    pub num_bitlocks: usize,
    /// Low address bits ignored when hashing into the lock tables.
    pub stripe_shift: u32,
    /// Maximum number of concurrently registered threads.
    pub max_threads: usize,
    pub bytelock_timeouts: LockTimeouts,
    pub bitlock_timeouts: LockTimeouts,
    /// Exponential backoff after an abort waits up to `2^bits` nanoseconds,
    /// with `bits` growing from `backoff_min` to `backoff_max`.
    pub backoff_min: u32,
    pub backoff_max: u32,
    /// Upper bound for one wait of a transaction that called `retry`.
    pub retry_wait: Duration,
    /// Early seal thresholds of the cohort algorithms.
    pub cohort_seal: CohortSeal,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            algorithm: AlgorithmKind::NOrec,
            heap_words: 1 << 20,
            num_orecs: 1 << 20,
            num_bytelocks: 1 << 20,
            num_bitlocks: 1 << 20,
            stripe_shift: 0,
            max_threads: MAX_THREADS,
            bytelock_timeouts: LockTimeouts::default(),
            bitlock_timeouts: LockTimeouts::default(),
            backoff_min: 4,
            backoff_max: 16,
            retry_wait: Duration::from_millis(10),
            cohort_seal: CohortSeal::default(),
        }
    }
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, Error> {
    value.trim().parse().map_err(|_| Error::InvalidConfig { key, value: value.to_string() })
}

/// A seal threshold: negative means unset.
fn parse_threshold<T: FromStr>(key: &'static str, value: &str) -> Result<Option<T>, Error> {
    if value.trim().starts_with('-') {
        parse::<i64>(key, value)?;
        return Ok(None);
    }
    parse(key, value).map(Some)
}

impl Config {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Config, Error> {
        Config::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`, which maps a variable name
    /// to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        match lookup("STM_CONFIG") {
            Some(name) => config.algorithm = name.parse()?,
            None => warn!("STM_CONFIG not set, using {}", config.algorithm),
        }
        if let Some(v) = lookup("STM_HEAP_WORDS") {
            config.heap_words = parse("STM_HEAP_WORDS", &v)?;
        }
        if let Some(v) = lookup("STM_NUM_ORECS") {
            config.num_orecs = parse("STM_NUM_ORECS", &v)?;
        }
        if let Some(v) = lookup("STM_MAX_THREADS") {
            config.max_threads = parse("STM_MAX_THREADS", &v)?;
        }
        if let Some(v) = lookup("STM_READS") {
            config.cohort_seal.reads = parse_threshold("STM_READS", &v)?;
        }
        if let Some(v) = lookup("STM_WRITES") {
            config.cohort_seal.writes = parse_threshold("STM_WRITES", &v)?;
        }
        if let Some(v) = lookup("STM_ABORTS") {
            config.cohort_seal.aborts = parse_threshold("STM_ABORTS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_algorithm(mut self, algorithm: AlgorithmKind) -> Config {
        self.algorithm = algorithm;
        self
    }

    pub fn with_heap_words(mut self, words: usize) -> Config {
        self.heap_words = words;
        self
    }

    /// Use `len` cells for each of the orec, bytelock and bitlock tables.
    pub fn with_table_size(mut self, len: usize) -> Config {
        self.num_orecs = len;
        self.num_bytelocks = len;
        self.num_bitlocks = len;
        self
    }

    pub fn with_max_threads(mut self, n: usize) -> Config {
        self.max_threads = n;
        self
    }

    pub fn with_retry_wait(mut self, wait: Duration) -> Config {
        self.retry_wait = wait;
        self
    }

    pub fn with_cohort_seal(mut self, seal: CohortSeal) -> Config {
        self.cohort_seal = seal;
        self
    }

    /// Check that the sizes are usable.
    pub fn validate(&self) -> Result<(), Error> {
        fn invalid(key: &'static str, value: impl ToString) -> Error {
            Error::InvalidConfig { key, value: value.to_string() }
        }

        if self.heap_words < 2 {
            return Err(invalid("heap_words", self.heap_words));
        }
        if self.num_orecs == 0 {
            return Err(invalid("num_orecs", self.num_orecs));
        }
        if self.num_bytelocks == 0 {
            return Err(invalid("num_bytelocks", self.num_bytelocks));
        }
        if self.num_bitlocks == 0 {
            return Err(invalid("num_bitlocks", self.num_bitlocks));
        }
        if self.stripe_shift >= usize::BITS {
            return Err(invalid("stripe_shift", self.stripe_shift));
        }
        if self.max_threads == 0 || self.max_threads > MAX_THREADS {
            return Err(invalid("max_threads", self.max_threads));
        }
        if self.backoff_min > self.backoff_max || self.backoff_max > 32 {
            return Err(invalid("backoff_max", self.backoff_max));
        }
        let seal = &self.cohort_seal;
        if seal.reads == Some(0) {
            return Err(invalid("cohort_seal.reads", 0));
        }
        if seal.writes == Some(0) {
            return Err(invalid("cohort_seal.writes", 0));
        }
        if seal.aborts == Some(0) {
            return Err(invalid("cohort_seal.aborts", 0));
        }
        Ok(())
    }
}

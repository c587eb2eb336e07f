// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! This module contains helpers for various tests.
//! Quite a lot of tests run operations asynchonously and need to check
//! for deadlocks. We do this by waiting a certain amount of time for completion.

use std::env;
use std::process::{self, Command, Stdio};
use std::sync::mpsc::channel;
use std::thread;
use std::time::{Duration, Instant};

use crate::algs::AlgorithmKind;
use crate::config::Config;
use crate::stm::Stm;

/// Route `tracing` output to the test harness. Set `RUST_LOG` to see it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A small engine running `alg`.
pub fn engine(alg: AlgorithmKind) -> Stm {
    init_tracing();
    let config = Config::default()
        .with_algorithm(alg)
        .with_heap_words(1 << 12)
        .with_table_size(1 << 10)
        .with_max_threads(32);
    Stm::new(config).unwrap()
}

/// Check if a function `f` terminates within a given timeframe.
///
/// If the function does not terminate, it keeps a thread alive forever,
/// so don't run too many test (preferable just one) in sequence.
pub fn terminates<F>(duration_ms: u64, f: F) -> bool
where
    F: Send + FnOnce() + 'static,
{
    terminates_async(duration_ms, f, || {})
}

/// Check if a function `f` terminates within a given timeframe,
/// but run a second function `g` concurrently.
pub fn terminates_async<F, G>(duration_ms: u64, f: F, g: G) -> bool
where
    F: Send + FnOnce() + 'static,
    G: FnOnce(),
{
    run_async(duration_ms, f, g).is_some()
}

/// Run two functions `f` and `g` concurrently.
///
/// Run `f` in a second thread, `g` in the main thread. Wait the given time `duration_ms` for `g`
/// and return `f`s return value or return `None` if `f` does not terminate.
pub fn run_async<T, F, G>(duration_ms: u64, f: F, g: G) -> Option<T>
where
    F: Send + FnOnce() -> T + 'static,
    G: FnOnce(),
    T: Send + 'static,
{
    let (tx, rx) = channel();

    thread::spawn(move || {
        let t = f();
        // wakeup other thread
        let _ = tx.send(t);
    });

    g();

    if let a @ Some(_) = rx.try_recv().ok() {
        return a;
    }

    // Sleep in 50 ms steps, so that it does not waste too much time if the thread finishes earlier.
    for _ in 0..duration_ms / 50 {
        thread::sleep(Duration::from_millis(50));
        if let a @ Some(_) = rx.try_recv().ok() {
            return a;
        }
    }

    thread::sleep(Duration::from_millis(duration_ms % 50));

    rx.try_recv().ok()
}

/// Run `f` in a child process and check that the process is aborted
/// within `duration_ms`.
///
/// `test` is the full path of the calling test, e.g.
/// `algs::tml::test::fatal_rollback_aborts`. The test binary runs that one
/// test again with `STM_TEST_CHILD` set, and the child executes `f`. Returns
/// false if the child exits normally, fails an assertion or hangs.
pub fn aborts_process<F>(test: &str, duration_ms: u64, f: F) -> bool
where
    F: FnOnce(),
{
    if env::var("STM_TEST_CHILD").map_or(false, |t| t == test) {
        f();
        process::exit(0);
    }

    let mut child = Command::new(env::current_exe().unwrap())
        .args([test, "--exact", "--test-threads=1", "--nocapture"])
        .env("STM_TEST_CHILD", test)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let deadline = Instant::now() + Duration::from_millis(duration_ms);
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait().unwrap() {
            // 101 is a failed test, 0 means `f` returned
            return !status.success() && status.code() != Some(101);
        }
        thread::sleep(Duration::from_millis(20));
    }
    let _ = child.kill();
    let _ = child.wait();
    false
}

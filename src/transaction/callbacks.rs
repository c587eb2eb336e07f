// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Handlers registered by a transaction body, run once the transaction
//! commits or rolls back.

use std::mem;

pub(crate) type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
pub(crate) struct Callbacks {
    on_commit: Vec<Callback>,
    on_rollback: Vec<Callback>,
}

impl Callbacks {
    pub fn new() -> Callbacks {
        Callbacks::default()
    }

    pub fn push_commit(&mut self, f: Callback) {
        self.on_commit.push(f);
    }

    pub fn push_rollback(&mut self, f: Callback) {
        self.on_rollback.push(f);
    }

    pub fn is_empty(&self) -> bool {
        self.on_commit.is_empty() && self.on_rollback.is_empty()
    }

    /// Take the handlers of the finished transaction, leaving the log empty
    /// for the next one.
    pub fn take(&mut self) -> Callbacks {
        mem::take(self)
    }

    /// Run the commit handlers in registration order and drop the others.
    pub fn run_commit(self) {
        for f in self.on_commit {
            f();
        }
    }

    /// Run the rollback handlers in registration order and drop the others.
    pub fn run_rollback(self) {
        for f in self.on_rollback {
            f();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(counter: &Arc<AtomicUsize>, add: usize) -> Callback {
        let counter = counter.clone();
        Box::new(move || {
            counter.fetch_add(add, Ordering::SeqCst);
        })
    }

    #[test]
    fn commit_runs_only_commit_handlers() {
        let c = Arc::new(AtomicUsize::new(0));
        let mut log = Callbacks::new();
        log.push_commit(counting(&c, 1));
        log.push_commit(counting(&c, 10));
        log.push_rollback(counting(&c, 100));

        let taken = log.take();
        assert!(log.is_empty());
        taken.run_commit();
        assert_eq!(c.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn rollback_runs_only_rollback_handlers() {
        let c = Arc::new(AtomicUsize::new(0));
        let mut log = Callbacks::new();
        log.push_commit(counting(&c, 1));
        log.push_rollback(counting(&c, 100));
        log.take().run_rollback();
        assert_eq!(c.load(Ordering::SeqCst), 100);
    }
}

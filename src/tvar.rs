// Copyright 2015-2016 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::fmt;
use std::marker::PhantomData;

use crate::error::Error;
use crate::memory::{Addr, WordValue};
use crate::result::StmResult;
use crate::stm::Stm;
use crate::thread::ThreadHandle;
use crate::transaction::Transaction;

/// A variable that can be used in a STM-Block.
///
/// A `TVar` is a typed view of one word of the transactional heap. It is
/// `Copy`; all copies name the same word.
pub struct TVar<T> {
    addr: Addr,

    /// This marker is needed so that the variable can be used in a typesafe
    /// manner.
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TVar<T> {
    fn clone(&self) -> TVar<T> {
        *self
    }
}

impl<T> Copy for TVar<T> {}

impl<T: WordValue> TVar<T> {
    /// Allocate a word on the heap of `stm` and store `val` in it.
    ///
    /// The word is initialized without a transaction, so the `TVar` must not
    /// be shared before `new` returns.
    pub fn new(stm: &Stm, val: T) -> Result<TVar<T>, Error> {
        let addr = stm.alloc(1)?;
        stm.store(addr, val.into_word());
        Ok(TVar::at(addr))
    }

    /// View the word at `addr` as a `TVar`.
    pub fn at(addr: Addr) -> TVar<T> {
        TVar { addr, _marker: PhantomData }
    }

    pub fn addr(&self) -> Addr {
        self.addr
    }

    /// The normal way to access a var.
    ///
    /// It is equivalent to `transaction.read(var.addr())`, but typed.
    pub fn read(&self, transaction: &mut Transaction) -> StmResult<T> {
        transaction.read(self.addr).map(T::from_word)
    }

    /// The normal way to write a var.
    pub fn write(&self, transaction: &mut Transaction, value: T) -> StmResult<()> {
        transaction.write(self.addr, value.into_word())
    }

    /// Modify the content of a `TVar` with the function f.
    ///
    /// ```
    /// # use stm_runtime::*;
    /// let stm = Stm::new(Config::default().with_heap_words(64).with_table_size(64)).unwrap();
    /// let mut thread = stm.thread_init().unwrap();
    ///
    /// let var = TVar::new(&stm, 21).unwrap();
    /// thread.atomically(|trans|
    ///     var.modify(trans, |x| x*2)
    /// );
    ///
    /// assert_eq!(var.read_atomic(&mut thread), 42);
    /// ```
    pub fn modify<F>(&self, transaction: &mut Transaction, f: F) -> StmResult<()>
    where
        F: FnOnce(T) -> T,
    {
        let old = self.read(transaction)?;
        self.write(transaction, f(old))
    }

    /// Replaces the value of a `TVar` with a new one, returning
    /// the old one.
    pub fn replace(&self, transaction: &mut Transaction, value: T) -> StmResult<T> {
        let old = self.read(transaction)?;
        self.write(transaction, value)?;
        Ok(old)
    }

    /// Read the value in a transaction of its own.
    pub fn read_atomic(&self, thread: &mut ThreadHandle) -> T {
        thread.atomically(|trans| self.read(trans))
    }

    /// Read the value without a transaction.
    ///
    /// Only meaningful while no transaction writes the variable, for example
    /// after all worker threads were joined.
    pub fn load(&self, stm: &Stm) -> T {
        T::from_word(stm.load(self.addr))
    }

    /// Check if two `TVar`s refer to the same position.
    pub fn ref_eq(this: &TVar<T>, other: &TVar<T>) -> bool {
        this.addr == other.addr
    }
}

impl<T> fmt::Debug for TVar<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TVar").field("addr", &self.addr).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::algs::AlgorithmKind;
    use crate::test::engine;

    #[test]
    // Test if creating and reading a TVar works.
    fn test_read_atomic() {
        let stm = engine(AlgorithmKind::NOrec);
        let mut thread = stm.thread_init().unwrap();
        let var = TVar::new(&stm, 42i32).unwrap();

        assert_eq!(42, var.read_atomic(&mut thread));
        assert_eq!(42, var.load(&stm));
    }

    #[test]
    fn negative_values_survive() {
        let stm = engine(AlgorithmKind::OrecLazy);
        let mut thread = stm.thread_init().unwrap();
        let var = TVar::new(&stm, -5i64).unwrap();

        let old = thread.atomically(|trans| var.replace(trans, -7));
        assert_eq!(old, -5);
        assert_eq!(var.load(&stm), -7);
    }

    #[test]
    fn copies_name_the_same_word() {
        let stm = engine(AlgorithmKind::TML);
        let a = TVar::new(&stm, true).unwrap();
        let b = a;
        let c = TVar::<bool>::new(&stm, true).unwrap();
        assert!(TVar::ref_eq(&a, &b));
        assert!(!TVar::ref_eq(&a, &c));
    }
}

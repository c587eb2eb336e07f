// Copyright 2015-2018 rust-stm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Ownership records.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::ThreadId;

/// The top bit of an orec word marks it as locked.
pub const LOCK_BIT: usize = 1 << (usize::BITS - 1);

/// Decoded content of an orec.
///
/// The packed form keeps the lock bit in the top bit, so the raw words
/// are ordered: every locked word compares greater than every version. The
/// algorithms rely on that for the common "unlocked and not newer than my
/// start time" test, which is a single `raw <= start_time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrecWord {
    Version(usize),
    Locked(ThreadId),
}

impl OrecWord {
    #[inline]
    pub fn encode(self) -> usize {
        match self {
            OrecWord::Version(v) => {
                debug_assert_eq!(v & LOCK_BIT, 0, "version overflows into the lock bit");
                v
            }
            OrecWord::Locked(owner) => LOCK_BIT | owner.get() as usize,
        }
    }

    #[inline]
    pub fn decode(raw: usize) -> OrecWord {
        if raw & LOCK_BIT != 0 {
            OrecWord::Locked(ThreadId::new((raw & !LOCK_BIT) as u32))
        } else {
            OrecWord::Version(raw)
        }
    }

    #[inline]
    pub fn is_locked(raw: usize) -> bool {
        raw & LOCK_BIT != 0
    }
}

/// A versioned lock: the current version or owner, plus the version to
/// fall back to while locked.
#[derive(Debug, Default)]
pub struct Orec {
    v: AtomicUsize,
    p: AtomicUsize,
}

impl Orec {
    /// The packed current word.
    #[inline]
    pub fn raw(&self) -> usize {
        self.v.load(Ordering::Acquire)
    }

    #[inline]
    pub fn word(&self) -> OrecWord {
        OrecWord::decode(self.raw())
    }

    /// Swap `expected` for `lock` if the orec still holds `expected`.
    #[inline]
    pub fn try_lock(&self, expected: usize, lock: usize) -> bool {
        self.v
            .compare_exchange(expected, lock, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Publish a new version (releasing the lock, or stamping an order).
    #[inline]
    pub fn set_version(&self, version: usize) {
        self.v.store(version, Ordering::Release);
    }

    /// Remember the version the orec held before it was locked.
    #[inline]
    pub fn save_previous(&self, version: usize) {
        self.p.store(version, Ordering::Relaxed);
    }

    #[inline]
    pub fn previous(&self) -> usize {
        self.p.load(Ordering::Relaxed)
    }

    /// Unlock, going back to the saved version.
    #[inline]
    pub fn restore(&self) {
        self.set_version(self.previous());
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn locked_words_sort_after_versions() {
        let lock = OrecWord::Locked(ThreadId::new(1)).encode();
        assert!(lock > OrecWord::Version(LOCK_BIT - 1).encode());
        assert!(OrecWord::is_locked(lock));
        assert_eq!(OrecWord::decode(lock), OrecWord::Locked(ThreadId::new(1)));
        assert_eq!(OrecWord::decode(17), OrecWord::Version(17));
    }

    #[test]
    fn lock_then_restore() {
        let o = Orec::default();
        o.set_version(5);
        let me = OrecWord::Locked(ThreadId::new(3)).encode();

        assert!(!o.try_lock(4, me));
        assert!(o.try_lock(5, me));
        o.save_previous(5);
        assert_eq!(o.word(), OrecWord::Locked(ThreadId::new(3)));

        o.restore();
        assert_eq!(o.word(), OrecWord::Version(5));
    }
}

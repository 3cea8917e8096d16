//! A small CAS-based reader/writer spinlock used by the header-level locks
//! in [`crate::cc::tpl`] and the commit-phase lock in [`crate::cc::romulus`].
//! Exposed as raw try-lock/unlock pairs (no RAII guard) so callers can track
//! what they hold directly in a [`crate::cc::tx_context::TxContext`]'s
//! `locks_held` list and release it explicitly at abort/commit time.

use std::sync::atomic::{AtomicI64, Ordering};

const EXCLUSIVE: i64 = -1;
const FREE: i64 = 0;

pub struct RwSpinLock {
    state: AtomicI64,
}

impl RwSpinLock {
    pub fn new() -> Self {
        RwSpinLock { state: AtomicI64::new(FREE) }
    }

    pub fn try_lock_shared(&self) -> bool {
        loop {
            let current = self.state.load(Ordering::Acquire);
            if current == EXCLUSIVE {
                return false;
            }
            if self
                .state
                .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    pub fn try_lock_exclusive(&self) -> bool {
        self.state.compare_exchange(FREE, EXCLUSIVE, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// Spins up to `attempts` times before giving up, matching the
    /// bounded-spin deadlock-breaking policy described for TPL.
    pub fn try_lock_exclusive_bounded(&self, attempts: u32) -> bool {
        for _ in 0..attempts {
            if self.try_lock_exclusive() {
                return true;
            }
            std::hint::spin_loop();
        }
        false
    }

    pub fn unlock_shared(&self) {
        self.state.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn unlock_exclusive(&self) {
        self.state.store(FREE, Ordering::Release);
    }

    pub fn is_free(&self) -> bool {
        self.state.load(Ordering::Acquire) == FREE
    }

    pub fn reader_count(&self) -> i64 {
        let s = self.state.load(Ordering::Acquire);
        if s == EXCLUSIVE {
            0
        } else {
            s
        }
    }
}

impl Default for RwSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

//! Persistence primitives (spec §4.7): `pwb`/`pwb_range`/`fence`, abstracted
//! over a chosen flush strategy so the rest of the engine never references a
//! concrete cache-flush intrinsic directly.

use std::sync::atomic::{fence as atomic_fence, Ordering};

use memmap2::MmapMut;

/// Which cache-flush instruction class backs `pwb`/`pwb_range`. `Clflush`
/// needs no trailing fence (it is itself ordered); the other two need an
/// explicit store fence to make the flush visible before later stores.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FlushStrategy {
    Clwb,
    Clflush,
    ClflushOpt,
    /// No hardware PMEM behind the mapping (DRAM-backed benchmark profile):
    /// `pwb`/`pwb_range` are no-ops and `fence` is a plain compiler/CPU
    /// store fence. Used when the ring allocator's backing file lives on
    /// tmpfs rather than a real PMEM mount.
    None,
}

impl FlushStrategy {
    pub fn needs_fence_after_pwb(self) -> bool {
        !matches!(self, FlushStrategy::Clflush)
    }
}

/// Flushes `len` bytes from `ptr` to durability per `strategy`. On a real
/// PMEM mapping this would be a CLWB/CLFLUSH(OPT) loop over cache lines; we
/// express the portable equivalent as an `msync`-style flush of the
/// containing mapping, and treat `FlushStrategy::None` as an explicit
/// opt-out used by the DRAM benchmark profile.
pub fn pwb_range(mmap: &MmapMut, offset: usize, len: usize, strategy: FlushStrategy) {
    if strategy == FlushStrategy::None {
        return;
    }
    // flush_async_range is a no-op on platforms without msync support; on
    // Linux/macOS it issues the real syscall over the given byte range.
    let _ = mmap.flush_async_range(offset, len);
}

/// Flushes a single cache-line-sized write at `offset`.
pub fn pwb(mmap: &MmapMut, offset: usize, strategy: FlushStrategy) {
    const CACHE_LINE: usize = 64;
    pwb_range(mmap, offset, CACHE_LINE, strategy);
}

/// Store fence: after this returns, every `pwb`/`pwb_range` issued earlier on
/// this thread is ordered before any later store. `FlushStrategy::Clflush`
/// needs nothing further since each individual flush is already ordered.
pub fn fence(strategy: FlushStrategy) {
    if strategy.needs_fence_after_pwb() {
        atomic_fence(Ordering::SeqCst);
    }
}

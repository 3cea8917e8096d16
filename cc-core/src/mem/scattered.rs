//! Scattered allocator (spec §4.4): individually cache-aligned blocks with
//! no reuse policy, suited to DRAM headers where locality across records
//! does not matter the way it does for a sequential log.

use std::alloc::{alloc_zeroed, Layout};
use std::sync::atomic::{AtomicUsize, Ordering};

const CACHE_LINE: usize = 64;

/// Hands out individually allocated, cache-line-aligned blocks. Unlike
/// [`crate::mem::ring::RingAllocator`] there is no shared backing extent --
/// each block is its own heap allocation -- so this is only suitable for
/// DRAM-resident structures, never for anything that must be recovered by
/// scanning a contiguous file.
pub struct ScatteredAllocator {
    live_bytes: AtomicUsize,
}

/// An owned, cache-aligned block. Frees itself on drop.
pub struct Block {
    ptr: *mut u8,
    layout: Layout,
}

unsafe impl Send for Block {}
unsafe impl Sync for Block {}

impl Block {
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.layout.size()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.layout.size()) }
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.ptr, self.layout) };
    }
}

impl ScatteredAllocator {
    pub fn new() -> Self {
        ScatteredAllocator { live_bytes: AtomicUsize::new(0) }
    }

    /// Allocates a zeroed block of `size` bytes, cache-line aligned.
    pub fn allocate(&self, size: usize) -> Block {
        let layout = Layout::from_size_align(size.max(1), CACHE_LINE).expect("valid layout");
        let ptr = unsafe { alloc_zeroed(layout) };
        assert!(!ptr.is_null(), "scattered allocator: global allocator returned null");
        self.live_bytes.fetch_add(size, Ordering::Relaxed);
        Block { ptr, layout }
    }

    /// No reuse pool: deallocation happens when the `Block` is dropped. This
    /// just accounts for it in the live-byte counter.
    pub fn deallocate(&self, block: Block) {
        self.live_bytes.fetch_sub(block.layout.size(), Ordering::Relaxed);
        drop(block);
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }
}

impl Default for ScatteredAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_blocks_are_zeroed_and_right_sized() {
        let alloc = ScatteredAllocator::new();
        let block = alloc.allocate(128);
        assert_eq!(block.as_slice().len(), 128);
        assert!(block.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn live_bytes_tracks_allocate_and_deallocate() {
        let alloc = ScatteredAllocator::new();
        let a = alloc.allocate(64);
        let b = alloc.allocate(64);
        assert_eq!(alloc.live_bytes(), 128);
        alloc.deallocate(a);
        assert_eq!(alloc.live_bytes(), 64);
        drop(b);
    }

    #[test]
    fn blocks_are_independently_addressed() {
        let alloc = ScatteredAllocator::new();
        let mut a = alloc.allocate(8);
        let b = alloc.allocate(8);
        a.as_mut_slice()[0] = 42;
        assert_eq!(b.as_slice()[0], 0);
    }
}

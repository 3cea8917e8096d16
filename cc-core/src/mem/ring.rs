//! Sequential ring allocator (spec §4.4): one memory-mapped backing file,
//! one atomic cursor, CAS-advanced. Deallocation is a no-op; allocation
//! wraps to the start once the cursor would run past the mapped extent.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{CResult, Error};
use crate::mem::file_descriptor::FileDescriptor;
use crate::mem::MemMedia;

const CACHE_LINE: u64 = 64;

fn round_up(size: u64, align: u64) -> u64 {
    (size + align - 1) / align * align
}

/// A CAS-advanced bump allocator over a fixed-size memory-mapped extent.
/// `[start, start + total_size)` is the extent every consumer (log manager,
/// version manager) that needs to scan the whole range can rely on.
pub struct RingAllocator {
    fd: FileDescriptor,
    cursor: AtomicU64,
    total_size: u64,
    media: MemMedia,
}

impl RingAllocator {
    pub fn create(path: impl AsRef<std::path::Path>, total_size: u64, media: MemMedia) -> CResult<Self> {
        if total_size == 0 {
            return Err(Error::value("ring allocator extent must be non-zero"));
        }
        let fd = FileDescriptor::create(path, total_size)?;
        Ok(RingAllocator { fd, cursor: AtomicU64::new(0), total_size, media })
    }

    pub fn media(&self) -> MemMedia {
        self.media
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// `[start, start + total_size)`. `start` is always 0 here since each
    /// ring owns a dedicated file, but callers scan by this extent rather
    /// than assuming 0.
    pub fn extent(&self) -> (u64, u64) {
        (0, self.total_size)
    }

    /// Allocates `size` bytes, rounded up to a cache-line multiple. Returns
    /// the allocated byte offset within the extent. Wraps to the start if
    /// the request does not fit before `total_size`; errors only if a
    /// single allocation could never fit even starting from 0.
    pub fn allocate(&self, size: u64) -> CResult<u64> {
        let size = round_up(size, CACHE_LINE);
        if size > self.total_size {
            return Err(Error::AllocatorExhausted { requested: size as usize, extent: self.total_size as usize });
        }

        loop {
            let cursor = self.cursor.load(Ordering::Acquire);
            let (offset, next) = if cursor + size > self.total_size {
                log::debug!("ring allocator wrapping: cursor={cursor} request={size} extent={}", self.total_size);
                (0, size)
            } else {
                (cursor, cursor + size)
            };

            if self
                .cursor
                .compare_exchange(cursor, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(offset);
            }
            // Lost the race to another allocator; retry with the new cursor.
        }
    }

    /// No-op: the ring never reuses freed space explicitly, it only wraps.
    pub fn deallocate(&self, _offset: u64, _size: u64) {}

    pub fn read(&self, offset: u64, len: usize) -> &[u8] {
        &self.fd.as_slice()[offset as usize..offset as usize + len]
    }

    pub fn write(&mut self, offset: u64, bytes: &[u8]) {
        let offset = offset as usize;
        self.fd.as_mut_slice()[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn fd(&self) -> &FileDescriptor {
        &self.fd
    }

    pub fn fd_mut(&mut self) -> &mut FileDescriptor {
        &mut self.fd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn new_ring(total_size: u64) -> RingAllocator {
        let dir = tempfile::tempdir().unwrap();
        RingAllocator::create(dir.path().join("Data_0"), total_size, MemMedia::Dram).unwrap()
    }

    #[test]
    fn allocation_is_contained_in_extent() {
        let ring = new_ring(4096);
        for _ in 0..20 {
            let off = ring.allocate(100).unwrap();
            let (start, end) = ring.extent();
            assert!(off >= start && off + 128 <= end);
        }
    }

    #[test]
    fn wraps_when_request_does_not_fit_before_end() {
        let ring = new_ring(256);
        // First allocation takes the first 192 (rounded up) bytes, leaving
        // 64 left before the end -- a 128 byte request must wrap.
        let first = ring.allocate(190).unwrap();
        assert_eq!(first, 0);
        let second = ring.allocate(128).unwrap();
        assert_eq!(second, 0);
    }

    #[test]
    fn concurrent_allocations_are_disjoint() {
        let ring = Arc::new(new_ring(1 << 20));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ring = Arc::clone(&ring);
            handles.push(std::thread::spawn(move || {
                let mut offsets = Vec::new();
                for _ in 0..50 {
                    offsets.push(ring.allocate(64).unwrap());
                }
                offsets
            }));
        }
        let mut all = Vec::new();
        for h in handles {
            all.extend(h.join().unwrap());
        }
        // Ring may wrap, so offsets are not guaranteed globally unique, but
        // every single one must land inside the extent.
        let (start, end) = ring.extent();
        assert!(all.iter().all(|&o| o >= start && o + 64 <= end));
    }

    #[test]
    fn oversized_request_is_rejected() {
        let ring = new_ring(128);
        assert!(ring.allocate(4096).is_err());
    }
}

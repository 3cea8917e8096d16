//! Log manager (spec §4.5): wraps a ring allocator and hands out per-thread
//! [`LogSpace`] slices that the CC writes tagged [`LogTuple`]s into.

use crate::error::CResult;
use crate::log::tuple::LogTuple;
use crate::mem::ring::RingAllocator;

/// Three references into a thread's slice of the ring: `start..end` is the
/// reserved extent, `cursor` is the next write position. `start <= cursor
/// <= end` always holds.
#[derive(Debug, Clone, Copy)]
pub struct LogSpace {
    pub start: u64,
    pub cursor: u64,
    pub end: u64,
}

impl LogSpace {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        LogSpace { start, cursor: start, end }
    }

    pub fn remaining(&self) -> u64 {
        self.end - self.cursor
    }

    /// Reserves `len` bytes at the current cursor, advancing it. Returns
    /// `None` if the space does not have room left.
    pub fn reserve(&mut self, len: u64) -> Option<u64> {
        if self.remaining() < len {
            return None;
        }
        let offset = self.cursor;
        self.cursor += len;
        Some(offset)
    }
}

pub struct LogManager {
    ring: RingAllocator,
}

impl LogManager {
    pub fn new(ring: RingAllocator) -> Self {
        LogManager { ring }
    }

    /// Reserves a fresh [`LogSpace`] of `size` bytes for a worker thread.
    pub fn allocate_space(&self, size: u64) -> CResult<LogSpace> {
        let start = self.ring.allocate(size)?;
        Ok(LogSpace::new(start, start + size))
    }

    /// Writes `tuple` at `space`'s cursor, advancing it. Errors if the
    /// space has no room left -- the caller (CC commit path) should treat
    /// this as a `Retry`, not a panic.
    pub fn append(&mut self, space: &mut LogSpace, tuple: &LogTuple) -> CResult<u64> {
        let bytes = tuple.encode();
        let offset = space.reserve(bytes.len() as u64).ok_or_else(|| {
            crate::error::Error::AllocatorExhausted {
                requested: bytes.len(),
                extent: space.remaining() as usize,
            }
        })?;
        self.ring.write(offset, &bytes);
        Ok(offset)
    }

    /// The ring's full extent, for a recovery driver that needs to scan
    /// every thread's log space.
    pub fn space_range(&self) -> (u64, u64) {
        self.ring.extent()
    }

    pub fn ring(&self) -> &RingAllocator {
        &self.ring
    }

    /// Walks tuples forward from `space.start` to `space.cursor`, in
    /// encounter order. Used by tests and by the reference recovery driver
    /// (spec §4.5/recovery contract).
    pub fn scan(&self, space: &LogSpace) -> CResult<Vec<LogTuple>> {
        let mut out = Vec::new();
        let mut offset = space.start;
        while offset < space.cursor {
            let remaining = (space.cursor - offset) as usize;
            let bytes = self.ring.read(offset, remaining);
            let (tuple, consumed) = LogTuple::decode(bytes)?;
            offset += consumed as u64;
            out.push(tuple);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::AbKey;
    use crate::mem::MemMedia;

    fn new_manager(total_size: u64) -> LogManager {
        let dir = tempfile::tempdir().unwrap();
        let ring = RingAllocator::create(dir.path().join("Data_0"), total_size, MemMedia::Dram).unwrap();
        LogManager::new(ring)
    }

    #[test]
    fn append_then_scan_preserves_order() {
        let mut mgr = new_manager(4096);
        let mut space = mgr.allocate_space(1024).unwrap();
        mgr.append(&mut space, &LogTuple::Insert { ts: 1, key: AbKey::new(0, 1), data: vec![1, 2] })
            .unwrap();
        mgr.append(&mut space, &LogTuple::Commit { ts: 1 }).unwrap();

        let tuples = mgr.scan(&space).unwrap();
        assert_eq!(tuples.len(), 2);
        assert!(matches!(tuples[0], LogTuple::Insert { ts: 1, .. }));
        assert!(matches!(tuples[1], LogTuple::Commit { ts: 1 }));
    }

    #[test]
    fn log_timestamps_are_monotonic_within_one_thread_space() {
        let mut mgr = new_manager(4096);
        let mut space = mgr.allocate_space(2048).unwrap();
        let mut last_ts = 0u64;
        for ts in 1..=10u64 {
            mgr.append(&mut space, &LogTuple::Commit { ts }).unwrap();
            assert!(ts > last_ts);
            last_ts = ts;
        }
        let tuples = mgr.scan(&space).unwrap();
        let timestamps: Vec<u64> = tuples.iter().filter_map(|t| t.ts()).collect();
        assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn append_past_reserved_space_is_an_error() {
        let mut mgr = new_manager(4096);
        let mut space = mgr.allocate_space(16).unwrap();
        // A commit tuple is 9 bytes; two of them overflow a 16 byte space.
        mgr.append(&mut space, &LogTuple::Commit { ts: 1 }).unwrap();
        assert!(mgr.append(&mut space, &LogTuple::Commit { ts: 2 }).is_err());
    }
}

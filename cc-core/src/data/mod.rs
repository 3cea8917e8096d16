//! Data manager: allocates and stores record body bytes. Per-record control
//! blocks (`DataTupleHeader`, spec §3) are protocol-specific and live beside
//! each CC implementation in [`crate::cc`] rather than here, since their
//! shape (lock-only, wts+lock, double-slot, virtual) differs per protocol.

use parking_lot::RwLock;

use crate::mem::scattered::{Block, ScatteredAllocator};

/// Owns record body storage. One instance is shared by all CC protocols in
/// a benchmark run; each body is an independently allocated, cache-aligned
/// block guarded by its own lock so readers of different records never
/// contend.
pub struct DataManager {
    alloc: ScatteredAllocator,
    bodies: RwLock<Vec<RwLock<Block>>>,
}

/// A handle into the data manager's body table.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct BodyRef(pub usize);

impl DataManager {
    pub fn new() -> Self {
        DataManager { alloc: ScatteredAllocator::new(), bodies: RwLock::new(Vec::new()) }
    }

    /// Allocates a new zeroed body of `size` bytes, returning its handle.
    pub fn allocate(&self, size: usize) -> BodyRef {
        let block = self.alloc.allocate(size);
        let mut bodies = self.bodies.write();
        bodies.push(RwLock::new(block));
        BodyRef(bodies.len() - 1)
    }

    pub fn read(&self, body: BodyRef) -> Vec<u8> {
        let bodies = self.bodies.read();
        let result = bodies[body.0].read().as_slice().to_vec();
        result
    }

    pub fn write(&self, body: BodyRef, offset: usize, data: &[u8]) {
        let bodies = self.bodies.read();
        let mut block = bodies[body.0].write();
        let slice = block.as_mut_slice();
        slice[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn len(&self, body: BodyRef) -> usize {
        let bodies = self.bodies.read();
        let result = bodies[body.0].read().as_slice().len();
        result
    }

    pub fn live_bytes(&self) -> usize {
        self.alloc.live_bytes()
    }
}

impl Default for DataManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_then_write_then_read_round_trips() {
        let mgr = DataManager::new();
        let body = mgr.allocate(16);
        mgr.write(body, 0, &[1, 2, 3, 4]);
        assert_eq!(&mgr.read(body)[0..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn distinct_bodies_do_not_alias() {
        let mgr = DataManager::new();
        let a = mgr.allocate(8);
        let b = mgr.allocate(8);
        mgr.write(a, 0, &[9; 8]);
        assert_eq!(mgr.read(b), vec![0; 8]);
    }
}

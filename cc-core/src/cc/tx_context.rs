//! Per-transaction and per-thread scratch state (spec §3): [`TxContext`] is
//! created on `begin` and freed on `clean_up`; [`ThreadContext`] lives for a
//! worker thread's whole lifetime and owns the [`ThreadBuffer`] that
//! Courier's deferred-persist map lives in.

use std::collections::HashMap;

use rand::Rng;

use crate::key::AbKey;
use crate::log::manager::LogSpace;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TxStatus {
    /// The transaction has pending writes that still need to be applied.
    NeedWrite,
    /// Read-only so far, or already fully applied.
    Pass,
}

#[derive(Debug, Clone)]
pub struct ReadRecord {
    pub key: AbKey,
    /// The write-timestamp (or lock generation) observed at read time, used
    /// by OCC-NUMA's validation phase.
    pub observed_wts: u64,
}

#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub key: AbKey,
    pub data: Vec<u8>,
    pub offset: u32,
    pub is_insert: bool,
    pub is_delete: bool,
}

/// Per-transaction scratch. Read/write sets are generic enough to serve
/// every CC variant: TPL only ever populates `locks_held`, OCC-NUMA
/// populates `read_set` for validation, Romulus/Courier populate
/// `write_set` and rely on the thread-local `ThreadBuffer` for coalescing.
#[derive(Debug, Clone)]
pub struct TxContext {
    pub message: Option<String>,
    pub status: TxStatus,
    pub ts: u64,
    pub read_set: Vec<ReadRecord>,
    pub write_set: Vec<WriteRecord>,
    /// Locks acquired so far this attempt, in acquisition order, with
    /// whether each was exclusive. TPL releases these in reverse order on
    /// commit/abort.
    pub locks_held: Vec<(AbKey, bool)>,
}

impl TxContext {
    pub fn new(ts: u64) -> Self {
        TxContext {
            message: None,
            status: TxStatus::Pass,
            ts,
            read_set: Vec::new(),
            write_set: Vec::new(),
            locks_held: Vec::new(),
        }
    }

    /// Reinitialises for another attempt, keeping the allocated Vec
    /// capacity around rather than reallocating every retry.
    pub fn reset(&mut self, ts: u64) {
        self.message = None;
        self.status = TxStatus::Pass;
        self.ts = ts;
        self.read_set.clear();
        self.write_set.clear();
        self.locks_held.clear();
    }
}

/// A pending flush request for one record body: the union of every byte
/// range written to it so far this transaction. `combine` implements the
/// spec's coalescing rule: `[min(offset), max(end))`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct DelayUpdateEvent {
    pub target_ref: u64,
    pub offset: u32,
    pub size: u32,
}

impl DelayUpdateEvent {
    pub fn new(target_ref: u64, offset: u32, size: u32) -> Self {
        DelayUpdateEvent { target_ref, offset, size }
    }

    pub fn end(&self) -> u32 {
        self.offset + self.size
    }

    /// Unions `self` with `other`, keyed by header identity -- both must
    /// name the same `target_ref`.
    pub fn combine(&self, other: &DelayUpdateEvent) -> DelayUpdateEvent {
        debug_assert_eq!(self.target_ref, other.target_ref);
        let offset = self.offset.min(other.offset);
        let end = self.end().max(other.end());
        DelayUpdateEvent { target_ref: self.target_ref, offset, size: end - offset }
    }
}

/// Per-thread deferred-persist state (spec §3/§4.2.4): a map from header
/// identity to its pending coalesced flush, plus the thread's reserved log
/// space. Keyed by header reference, not raw target pointer, per the
/// documented combine intent.
#[derive(Default)]
pub struct ThreadBuffer {
    events: HashMap<u64, DelayUpdateEvent>,
}

impl ThreadBuffer {
    pub fn new() -> Self {
        ThreadBuffer { events: HashMap::new() }
    }

    /// Records a write to `[offset, offset+size)` of the record at
    /// `header_ref`, combining with any existing pending event for it.
    pub fn stage(&mut self, header_ref: u64, offset: u32, size: u32) {
        let incoming = DelayUpdateEvent::new(header_ref, offset, size);
        self.events
            .entry(header_ref)
            .and_modify(|existing| *existing = existing.combine(&incoming))
            .or_insert(incoming);
    }

    pub fn pending(&self, header_ref: u64) -> Option<DelayUpdateEvent> {
        self.events.get(&header_ref).copied()
    }

    pub fn drain(&mut self) -> Vec<DelayUpdateEvent> {
        self.events.drain().map(|(_, v)| v).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Process-wide, one per worker thread. Created when a worker starts,
/// destroyed on exit.
pub struct ThreadContext {
    pub buffer: ThreadBuffer,
    /// Random stripe/NUMA-node selection hint for allocators that shard by
    /// page index.
    pub page_index: u32,
    pub reserved_space: Option<LogSpace>,
}

impl ThreadContext {
    pub fn new(num_pages: u32) -> Self {
        let page_index = if num_pages == 0 { 0 } else { rand::thread_rng().gen_range(0..num_pages) };
        ThreadContext { buffer: ThreadBuffer::new(), page_index, reserved_space: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_update_event_combine_takes_union_of_ranges() {
        let a = DelayUpdateEvent::new(1, 0, 8);
        let b = DelayUpdateEvent::new(1, 16, 8);
        let c = DelayUpdateEvent::new(1, 4, 8);
        let ab = a.combine(&b);
        let abc = ab.combine(&c);
        assert_eq!(abc.offset, 0);
        assert_eq!(abc.end(), 24);
    }

    #[test]
    fn thread_buffer_stages_at_most_one_event_per_header() {
        let mut buf = ThreadBuffer::new();
        buf.stage(7, 0, 8);
        buf.stage(7, 16, 8);
        buf.stage(7, 4, 8);
        let event = buf.pending(7).unwrap();
        assert_eq!(event.offset, 0);
        assert_eq!(event.end(), 24);
        assert_eq!(buf.drain().len(), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn tx_context_reset_clears_sets_but_keeps_capacity() {
        let mut tx = TxContext::new(1);
        tx.read_set.push(ReadRecord { key: AbKey::new(0, 1), observed_wts: 5 });
        tx.reset(2);
        assert_eq!(tx.ts, 2);
        assert!(tx.read_set.is_empty());
    }
}

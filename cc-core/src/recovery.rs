//! Reference recovery driver (spec §4.5/§6): replays one thread's
//! [`LogSpace`] into a fresh [`Index`]/[`DataManager`] pair. The log tuple
//! format is shared by every CC protocol, so this driver knows nothing
//! protocol-specific -- it only understands `Insert`/`Update`/`Delete`
//! grouped by the `Commit` tuple that closes each transaction.
//!
//! A transaction's writes are buffered until its `Commit` tuple is seen;
//! a trailing run with no closing `Commit` (the log ended mid-commit) is
//! discarded rather than applied, since that transaction never became
//! durable from the caller's point of view.

use crate::data::DataManager;
use crate::error::CResult;
use crate::index::Index;
use crate::key::{IndexTuple, Ref};
use crate::log::manager::{LogManager, LogSpace};
use crate::log::tuple::LogTuple;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct RecoveryReport {
    pub transactions_applied: u64,
    pub records_applied: u64,
    /// Tuples belonging to a transaction whose `Commit` never made it into
    /// the log, discarded without being applied.
    pub tuples_discarded: u64,
    pub last_committed_ts: Option<u64>,
}

/// Replays `space` (as read by `manager.scan`) into `index`/`data`, applying
/// each committed transaction's writes in log order.
pub fn replay(manager: &LogManager, space: &LogSpace, index: &dyn Index, data: &DataManager) -> CResult<RecoveryReport> {
    let tuples = manager.scan(space)?;
    let mut report = RecoveryReport::default();
    let mut pending: Vec<LogTuple> = Vec::new();
    let mut next_header_id: u64 = 0;

    for tuple in tuples {
        match tuple {
            LogTuple::Commit { ts } => {
                for op in pending.drain(..) {
                    apply(op, index, data, &mut next_header_id);
                    report.records_applied += 1;
                }
                report.transactions_applied += 1;
                report.last_committed_ts = Some(ts);
            }
            LogTuple::None => {
                // Uninitialised ring slot reached while scanning past the
                // end of live data; nothing to replay or discard.
            }
            other => pending.push(other),
        }
    }
    report.tuples_discarded = pending.len() as u64;
    if report.tuples_discarded > 0 {
        log::warn!("recovery discarded {} uncommitted tuples at end of log", report.tuples_discarded);
    }
    log::info!(
        "recovery replayed {} transactions, {} records, last_committed_ts={:?}",
        report.transactions_applied,
        report.records_applied,
        report.last_committed_ts,
    );
    Ok(report)
}

fn apply(tuple: LogTuple, index: &dyn Index, data: &DataManager, next_header_id: &mut u64) {
    match tuple {
        LogTuple::Insert { key, data: bytes, .. } => {
            let body = data.allocate(bytes.len());
            data.write(body, 0, &bytes);
            let header_id = *next_header_id;
            *next_header_id += 1;
            let tuple = IndexTuple::new(
                0,
                bytes.len() as u32,
                Ref { offset: header_id },
                Ref { offset: body.0 as u64 },
            );
            // A replayed insert may shadow an entry from an earlier,
            // subsequently deleted-and-reinserted key in the same log;
            // `update` covers that case, `insert` covers the first sighting.
            if !index.insert(key, tuple) {
                index.update(key, tuple);
            }
        }
        LogTuple::Update { key, offset, data: bytes, .. } => {
            if let Some(existing) = index.read(key) {
                let body = crate::data::BodyRef(existing.body_ref.offset as usize);
                data.write(body, offset as usize, &bytes);
            }
        }
        LogTuple::Delete { key, .. } => {
            index.remove(key);
        }
        LogTuple::Commit { .. } | LogTuple::None => unreachable!("filtered by caller"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::simple_map::SimpleMap;
    use crate::key::AbKey;
    use crate::mem::ring::RingAllocator;
    use crate::mem::MemMedia;

    fn new_manager() -> LogManager {
        let dir = tempfile::tempdir().unwrap();
        let ring = RingAllocator::create(dir.path().join("Data_0"), 1 << 16, MemMedia::Dram).unwrap();
        LogManager::new(ring)
    }

    #[test]
    fn replays_committed_transaction_into_a_fresh_index() {
        let mut mgr = new_manager();
        let mut space = mgr.allocate_space(4096).unwrap();
        mgr.append(&mut space, &LogTuple::Insert { ts: 1, key: AbKey::new(0, 1), data: b"v0".to_vec() }).unwrap();
        mgr.append(&mut space, &LogTuple::Commit { ts: 1 }).unwrap();

        let index = SimpleMap::new();
        let data = DataManager::new();
        let report = replay(&mgr, &space, &index, &data).unwrap();

        assert_eq!(report.transactions_applied, 1);
        assert_eq!(report.records_applied, 1);
        assert_eq!(report.tuples_discarded, 0);
        assert!(index.contain(AbKey::new(0, 1)));
    }

    #[test]
    fn trailing_uncommitted_writes_are_discarded() {
        let mut mgr = new_manager();
        let mut space = mgr.allocate_space(4096).unwrap();
        mgr.append(&mut space, &LogTuple::Insert { ts: 1, key: AbKey::new(0, 1), data: b"v0".to_vec() }).unwrap();
        mgr.append(&mut space, &LogTuple::Commit { ts: 1 }).unwrap();
        mgr.append(&mut space, &LogTuple::Insert { ts: 2, key: AbKey::new(0, 2), data: b"v1".to_vec() }).unwrap();
        // No closing Commit for ts=2.

        let index = SimpleMap::new();
        let data = DataManager::new();
        let report = replay(&mgr, &space, &index, &data).unwrap();

        assert_eq!(report.transactions_applied, 1);
        assert_eq!(report.tuples_discarded, 1);
        assert!(index.contain(AbKey::new(0, 1)));
        assert!(!index.contain(AbKey::new(0, 2)));
    }

    #[test]
    fn update_then_delete_replay_in_order() {
        let mut mgr = new_manager();
        let mut space = mgr.allocate_space(4096).unwrap();
        mgr.append(&mut space, &LogTuple::Insert { ts: 1, key: AbKey::new(0, 5), data: vec![0u8; 4] }).unwrap();
        mgr.append(&mut space, &LogTuple::Commit { ts: 1 }).unwrap();
        mgr.append(&mut space, &LogTuple::Update { ts: 2, key: AbKey::new(0, 5), offset: 0, data: vec![9; 4] }).unwrap();
        mgr.append(&mut space, &LogTuple::Commit { ts: 2 }).unwrap();
        mgr.append(&mut space, &LogTuple::Delete { ts: 3, key: AbKey::new(0, 5) }).unwrap();
        mgr.append(&mut space, &LogTuple::Commit { ts: 3 }).unwrap();

        let index = SimpleMap::new();
        let data = DataManager::new();
        let report = replay(&mgr, &space, &index, &data).unwrap();

        assert_eq!(report.transactions_applied, 3);
        assert!(!index.contain(AbKey::new(0, 5)));
    }
}

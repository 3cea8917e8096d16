//! OCC with NUMA-aware versioning (spec §4.2.2). Reads are lock-free: they
//! snapshot a header's write-timestamp alongside the payload and may
//! observe a torn read if a concurrent writer is mid-commit -- validation
//! at commit time is what rejects such transactions, not the read itself.
//! Writes are entirely deferred to the commit-time write phase.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cc::executor::CC;
use crate::cc::lock::RwSpinLock;
use crate::cc::tx_context::{ReadRecord, ThreadContext, TxContext, TxStatus, WriteRecord};
use crate::data::{BodyRef, DataManager};
use crate::index::simple_map::SimpleMap;
use crate::index::Index;
use crate::key::{AbKey, IndexTuple, Ref};
use crate::log::manager::LogManager;
use crate::log::tuple::LogTuple;

const LOCK_SPIN_ATTEMPTS: u32 = 64;

struct OccHeader {
    wts: AtomicU64,
    lock: RwSpinLock,
    header_id: u64,
    body: Mutex<Option<BodyRef>>,
}

pub struct OccNuma {
    index: SimpleMap,
    data: DataManager,
    headers: Mutex<HashMap<AbKey, Arc<OccHeader>>>,
    log: Mutex<LogManager>,
    next_header_id: AtomicU64,
}

impl OccNuma {
    pub fn new(log: LogManager) -> Self {
        OccNuma {
            index: SimpleMap::new(),
            data: DataManager::new(),
            headers: Mutex::new(HashMap::new()),
            log: Mutex::new(log),
            next_header_id: AtomicU64::new(0),
        }
    }

    fn header_for(&self, key: AbKey) -> Option<Arc<OccHeader>> {
        self.headers.lock().get(&key).cloned()
    }
}

impl CC for OccNuma {
    fn read(&self, _ctx: &mut ThreadContext, tx: &mut TxContext, key: AbKey, out: &mut Vec<u8>) -> bool {
        if let Some(write) = tx.write_set.iter().rev().find(|w| w.key == key) {
            if write.is_delete {
                return false;
            }
            out.clear();
            out.extend_from_slice(&write.data);
            return true;
        }

        let header = match self.header_for(key) {
            Some(h) => h,
            None => return false,
        };

        let wts_before = header.wts.load(Ordering::Acquire);
        let body = match *header.body.lock() {
            Some(b) => b,
            None => return false,
        };
        out.clear();
        out.extend_from_slice(&self.data.read(body));
        tx.read_set.push(ReadRecord { key, observed_wts: wts_before });
        true
    }

    fn update(&self, _ctx: &mut ThreadContext, tx: &mut TxContext, key: AbKey, offset: u32, new: &[u8]) -> bool {
        if self.header_for(key).is_none() {
            return false;
        }
        tx.write_set.push(WriteRecord {
            key,
            data: new.to_vec(),
            offset,
            is_insert: false,
            is_delete: false,
        });
        tx.status = TxStatus::NeedWrite;
        true
    }

    fn insert(&self, _ctx: &mut ThreadContext, tx: &mut TxContext, key: AbKey, new: &[u8]) -> bool {
        // Insert-after-delete of the same key within this transaction is
        // legal: the pending delete never reached the index, so collapse it
        // into one fresh insert rather than rejecting on the still-live
        // index/header entry.
        if let Some(w) = tx.write_set.iter().rev().find(|w| w.key == key) {
            if w.is_delete {
                tx.write_set.retain(|w| w.key != key);
                tx.write_set.push(WriteRecord { key, data: new.to_vec(), offset: 0, is_insert: true, is_delete: false });
                tx.status = TxStatus::NeedWrite;
                return true;
            }
        }

        if self.index.contain(key) {
            return false;
        }
        let mut headers = self.headers.lock();
        if headers.contains_key(&key) {
            return false;
        }
        let header_id = self.next_header_id.fetch_add(1, Ordering::Relaxed);
        headers.insert(
            key,
            Arc::new(OccHeader { wts: AtomicU64::new(0), lock: RwSpinLock::new(), header_id, body: Mutex::new(None) }),
        );
        drop(headers);

        tx.write_set.push(WriteRecord { key, data: new.to_vec(), offset: 0, is_insert: true, is_delete: false });
        tx.status = TxStatus::NeedWrite;
        true
    }

    fn delete(&self, _ctx: &mut ThreadContext, tx: &mut TxContext, key: AbKey) -> bool {
        if self.header_for(key).is_none() {
            return false;
        }
        tx.write_set.push(WriteRecord { key, data: Vec::new(), offset: 0, is_insert: false, is_delete: true });
        tx.status = TxStatus::NeedWrite;
        true
    }

    fn scan(
        &self,
        _ctx: &mut ThreadContext,
        tx: &mut TxContext,
        key: AbKey,
        n: u32,
        out: &mut Vec<(AbKey, Vec<u8>)>,
    ) -> bool {
        for i in 0..n as u64 {
            let candidate = AbKey::new(key.type_tag, key.logic_key + i);
            let header = match self.header_for(candidate) {
                Some(h) => h,
                None => break,
            };
            let wts_before = header.wts.load(Ordering::Acquire);
            let body = match *header.body.lock() {
                Some(b) => b,
                None => break,
            };
            out.push((candidate, self.data.read(body)));
            tx.read_set.push(ReadRecord { key: candidate, observed_wts: wts_before });
        }
        true
    }

    fn commit(&self, _ctx: &mut ThreadContext, tx: &mut TxContext) -> bool {
        // Validation phase: every record we read must still carry the wts
        // we observed, or a concurrent writer has invalidated our snapshot.
        for read in &tx.read_set {
            let header = match self.header_for(read.key) {
                Some(h) => h,
                None => {
                    self.rollback_staged_inserts(tx);
                    return false;
                }
            };
            if header.wts.load(Ordering::Acquire) != read.observed_wts {
                self.rollback_staged_inserts(tx);
                return false;
            }
        }

        if tx.write_set.is_empty() {
            return true;
        }

        // Write phase: take exclusive locks for every written record.
        let mut acquired: Vec<Arc<OccHeader>> = Vec::new();
        for write in &tx.write_set {
            let header = match self.header_for(write.key) {
                Some(h) => h,
                None => {
                    Self::release(&acquired);
                    self.rollback_staged_inserts(tx);
                    return false;
                }
            };
            if !header.lock.try_lock_exclusive_bounded(LOCK_SPIN_ATTEMPTS) {
                Self::release(&acquired);
                self.rollback_staged_inserts(tx);
                return false;
            }
            acquired.push(header);
        }

        let mut log = self.log.lock();
        let mut space = match log.allocate_space(4096) {
            Ok(s) => s,
            Err(_) => {
                drop(log);
                Self::release(&acquired);
                return false;
            }
        };

        for write in &tx.write_set {
            let header = self.header_for(write.key).unwrap();
            if write.is_insert {
                let body = self.data.allocate(write.data.len());
                self.data.write(body, 0, &write.data);
                *header.body.lock() = Some(body);
                header.wts.store(tx.ts, Ordering::Release);
                let tuple = IndexTuple::new(
                    0,
                    write.data.len() as u32,
                    Ref { offset: header.header_id },
                    Ref { offset: body.0 as u64 },
                );
                if !self.index.insert(write.key, tuple) {
                    self.index.update(write.key, tuple);
                }
                let _ = log.append(&mut space, &LogTuple::Insert { ts: tx.ts, key: write.key, data: write.data.clone() });
            } else if write.is_delete {
                self.index.remove(write.key);
                self.headers.lock().remove(&write.key);
                let _ = log.append(&mut space, &LogTuple::Delete { ts: tx.ts, key: write.key });
            } else {
                let body = match *header.body.lock() {
                    Some(b) => b,
                    None => continue,
                };
                self.data.write(body, write.offset as usize, &write.data);
                header.wts.store(tx.ts, Ordering::Release);
                let _ = log.append(
                    &mut space,
                    &LogTuple::Update { ts: tx.ts, key: write.key, offset: write.offset, data: write.data.clone() },
                );
            }
        }
        let _ = log.append(&mut space, &LogTuple::Commit { ts: tx.ts });
        drop(log);

        Self::release(&acquired);
        true
    }

    fn abort(&self, _ctx: &mut ThreadContext, tx: &mut TxContext) {
        self.rollback_staged_inserts(tx);
    }
}

impl OccNuma {
    fn release(acquired: &[Arc<OccHeader>]) {
        for header in acquired.iter().rev() {
            header.lock.unlock_exclusive();
        }
    }

    fn rollback_staged_inserts(&self, tx: &TxContext) {
        for write in &tx.write_set {
            if write.is_insert {
                self.headers.lock().remove(&write.key);
            }
        }
    }
}

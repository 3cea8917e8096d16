//! Two-Phase Locking (spec §4.2.1). Reads take a shared lock, writes take an
//! exclusive lock, both held until commit/abort releases them in reverse
//! acquisition order. Writes are staged in the transaction's write set and
//! only applied to the body at commit, so an aborted transaction never
//! leaves a partially-applied mutation behind even though the exclusive
//! lock already blocked anyone else from observing it.

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

struct TplHeader {
    lock: RwSpinLock,
    header_id: u64,
    body: Mutex<Option<BodyRef>>,
}

pub struct Tpl {
    index: SimpleMap,
    data: DataManager,
    headers: Mutex<HashMap<AbKey, Arc<TplHeader>>>,
    log: Mutex<LogManager>,
    next_header_id: AtomicU64,
}

impl Tpl {
    pub fn new(log: LogManager) -> Self {
        Tpl {
            index: SimpleMap::new(),
            data: DataManager::new(),
            headers: Mutex::new(HashMap::new()),
            log: Mutex::new(log),
            next_header_id: AtomicU64::new(0),
        }
    }

    fn header_for(&self, key: AbKey) -> Option<Arc<TplHeader>> {
        self.headers.lock().get(&key).cloned()
    }

    fn holds(&self, tx: &TxContext, key: AbKey) -> Option<bool> {
        tx.locks_held.iter().find(|(k, _)| *k == key).map(|(_, ex)| *ex)
    }
}

impl CC for Tpl {
    fn read(&self, _ctx: &mut ThreadContext, tx: &mut TxContext, key: AbKey, out: &mut Vec<u8>) -> bool {
        // Read-your-own-writes: a value staged earlier in this transaction
        // is returned without touching the header at all.
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

        if self.holds(tx, key).is_none() {
            if !header.lock.try_lock_shared() {
                return false;
            }
            tx.locks_held.push((key, false));
        }

        let body = *header.body.lock();
        let body = match body {
            Some(b) => b,
            None => return false,
        };
        out.clear();
        out.extend_from_slice(&self.data.read(body));
        tx.read_set.push(ReadRecord { key, observed_wts: header.header_id });
        true
    }

    fn update(&self, _ctx: &mut ThreadContext, tx: &mut TxContext, key: AbKey, offset: u32, new: &[u8]) -> bool {
        let header = match self.header_for(key) {
            Some(h) => h,
            None => return false,
        };

        match self.holds(tx, key) {
            Some(true) => {}
            Some(false) => return false, // only holds a shared lock; no upgrade support
            None => {
                if !header.lock.try_lock_exclusive_bounded(LOCK_SPIN_ATTEMPTS) {
                    return false;
                }
                tx.locks_held.push((key, true));
            }
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
        // (and any earlier write this tx made to the key) into one fresh
        // insert rather than rejecting on the still-live index/header entry.
        if let Some(w) = tx.write_set.iter().rev().find(|w| w.key == key) {
            if w.is_delete {
                tx.write_set.retain(|w| w.key != key);
                tx.write_set.push(WriteRecord {
                    key,
                    data: new.to_vec(),
                    offset: 0,
                    is_insert: true,
                    is_delete: false,
                });
                tx.status = TxStatus::NeedWrite;
                return true;
            }
        }

        if self.index.contain(key) {
            return false;
        }

        let mut headers = self.headers.lock();
        if headers.contains_key(&key) {
            return false; // another transaction's insert is in flight
        }
        let header_id = self.next_header_id.fetch_add(1, Ordering::Relaxed);
        let header = Arc::new(TplHeader { lock: RwSpinLock::new(), header_id, body: Mutex::new(None) });
        let acquired = header.lock.try_lock_exclusive();
        debug_assert!(acquired, "freshly created header must be free");
        headers.insert(key, header);
        drop(headers);

        tx.locks_held.push((key, true));
        tx.write_set.push(WriteRecord {
            key,
            data: new.to_vec(),
            offset: 0,
            is_insert: true,
            is_delete: false,
        });
        tx.status = TxStatus::NeedWrite;
        true
    }

    fn delete(&self, _ctx: &mut ThreadContext, tx: &mut TxContext, key: AbKey) -> bool {
        let header = match self.header_for(key) {
            Some(h) => h,
            None => return false,
        };

        match self.holds(tx, key) {
            Some(true) => {}
            Some(false) => return false,
            None => {
                if !header.lock.try_lock_exclusive_bounded(LOCK_SPIN_ATTEMPTS) {
                    return false;
                }
                tx.locks_held.push((key, true));
            }
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
            if self.holds(tx, candidate).is_none() {
                if !header.lock.try_lock_shared() {
                    return false;
                }
                tx.locks_held.push((candidate, false));
            }
            let body = match *header.body.lock() {
                Some(b) => b,
                None => break,
            };
            out.push((candidate, self.data.read(body)));
        }
        true
    }

    fn commit(&self, _ctx: &mut ThreadContext, tx: &mut TxContext) -> bool {
        let held: HashMap<AbKey, Arc<TplHeader>> = tx
            .locks_held
            .iter()
            .filter_map(|(k, _)| self.header_for(*k).map(|h| (*k, h)))
            .collect();

        let mut log = self.log.lock();
        let mut space = match log.allocate_space(4096) {
            Ok(s) => s,
            Err(_) => {
                Self::release_all(&held, tx);
                return false;
            }
        };

        for write in &tx.write_set {
            let header = match held.get(&write.key) {
                Some(h) => h.clone(),
                None => continue,
            };

            if write.is_insert {
                let body = self.data.allocate(write.data.len());
                self.data.write(body, 0, &write.data);
                *header.body.lock() = Some(body);
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
                let _ = log.append(&mut space, &LogTuple::Delete { ts: tx.ts, key: write.key });
            } else {
                let body = match *header.body.lock() {
                    Some(b) => b,
                    None => continue,
                };
                self.data.write(body, write.offset as usize, &write.data);
                let _ = log.append(
                    &mut space,
                    &LogTuple::Update { ts: tx.ts, key: write.key, offset: write.offset, data: write.data.clone() },
                );
            }
        }
        let _ = log.append(&mut space, &LogTuple::Commit { ts: tx.ts });
        drop(log);

        for write in &tx.write_set {
            if write.is_delete {
                self.headers.lock().remove(&write.key);
            }
        }

        Self::release_all(&held, tx);
        true
    }

    fn abort(&self, _ctx: &mut ThreadContext, tx: &mut TxContext) {
        let held: HashMap<AbKey, Arc<TplHeader>> = tx
            .locks_held
            .iter()
            .filter_map(|(k, _)| self.header_for(*k).map(|h| (*k, h)))
            .collect();

        for write in &tx.write_set {
            if write.is_insert {
                self.headers.lock().remove(&write.key);
            }
        }

        Self::release_all(&held, tx);
    }
}

impl Tpl {
    fn release_all(held: &HashMap<AbKey, Arc<TplHeader>>, tx: &mut TxContext) {
        for (key, exclusive) in tx.locks_held.iter().rev() {
            if let Some(header) = held.get(key) {
                if *exclusive {
                    header.lock.unlock_exclusive();
                } else {
                    header.lock.unlock_shared();
                }
            }
        }
        tx.locks_held.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cc::executor::Executor;
    use crate::cc::tx_context::ThreadContext;
    use crate::mem::ring::RingAllocator;
    use crate::mem::MemMedia;

    fn new_tpl() -> Tpl {
        let dir = tempfile::tempdir().unwrap();
        let ring = RingAllocator::create(dir.path().join("Data_0"), 1 << 16, MemMedia::Dram).unwrap();
        Tpl::new(LogManager::new(ring))
    }

    #[test]
    fn insert_then_read_round_trips() {
        let tpl = new_tpl();
        let mut ctx = ThreadContext::new(1);
        let mut exec = Executor::new(&tpl, &mut ctx, 1);
        assert!(exec.insert(AbKey::new(0, 1), b"hello"));
        assert!(exec.commit());

        let mut exec2 = Executor::new(&tpl, &mut ctx, 2);
        let mut out = Vec::new();
        assert!(exec2.read(AbKey::new(0, 1), &mut out));
        assert_eq!(out, b"hello");
        assert!(exec2.commit());
    }

    #[test]
    fn aborted_update_does_not_persist() {
        let tpl = new_tpl();
        let mut ctx = ThreadContext::new(1);
        let mut exec = Executor::new(&tpl, &mut ctx, 1);
        exec.insert(AbKey::new(0, 1), b"orig");
        exec.commit();

        let mut exec2 = Executor::new(&tpl, &mut ctx, 2);
        assert!(exec2.update(AbKey::new(0, 1), 0, b"changed"));
        exec2.abort();

        let mut exec3 = Executor::new(&tpl, &mut ctx, 3);
        let mut out = Vec::new();
        assert!(exec3.read(AbKey::new(0, 1), &mut out));
        assert_eq!(out, b"orig");
        exec3.commit();
    }

    #[test]
    fn exclusive_lock_blocks_concurrent_writer() {
        let tpl = new_tpl();
        let mut ctx = ThreadContext::new(1);
        let mut exec = Executor::new(&tpl, &mut ctx, 1);
        exec.insert(AbKey::new(0, 5), b"v0");
        exec.commit();

        let mut exec_a = Executor::new(&tpl, &mut ctx, 2);
        assert!(exec_a.update(AbKey::new(0, 5), 0, b"a"));

        let mut ctx_b = ThreadContext::new(1);
        let mut exec_b = Executor::new(&tpl, &mut ctx_b, 3);
        // Second writer must be refused the exclusive lock while the first
        // still holds it.
        assert!(!exec_b.update(AbKey::new(0, 5), 0, b"b"));
        exec_b.abort();

        assert!(exec_a.commit());
    }

    #[test]
    fn duplicate_insert_within_and_across_transactions_is_rejected() {
        let tpl = new_tpl();
        let mut ctx = ThreadContext::new(1);
        let mut exec = Executor::new(&tpl, &mut ctx, 1);
        assert!(exec.insert(AbKey::new(0, 9), b"first"));
        assert!(exec.commit());

        let mut exec2 = Executor::new(&tpl, &mut ctx, 2);
        assert!(!exec2.insert(AbKey::new(0, 9), b"second"));
        exec2.abort();
    }

    #[test]
    fn delete_then_insert_across_separate_committed_transactions() {
        let tpl = new_tpl();
        let mut ctx = ThreadContext::new(1);
        let mut exec = Executor::new(&tpl, &mut ctx, 1);
        exec.insert(AbKey::new(0, 2), b"v1");
        exec.commit();

        let mut exec2 = Executor::new(&tpl, &mut ctx, 2);
        assert!(exec2.delete(AbKey::new(0, 2)));
        assert!(exec2.commit());

        let mut exec3 = Executor::new(&tpl, &mut ctx, 3);
        assert!(exec3.insert(AbKey::new(0, 2), b"v2"));
        assert!(exec3.commit());

        let mut exec4 = Executor::new(&tpl, &mut ctx, 4);
        let mut out = Vec::new();
        assert!(exec4.read(AbKey::new(0, 2), &mut out));
        assert_eq!(out, b"v2");
        exec4.commit();
    }

    #[test]
    fn delete_then_insert_within_one_transaction_is_legal() {
        let tpl = new_tpl();
        let mut ctx = ThreadContext::new(1);
        let mut exec = Executor::new(&tpl, &mut ctx, 1);
        exec.insert(AbKey::new(0, 3), b"orig");
        exec.commit();

        let mut exec2 = Executor::new(&tpl, &mut ctx, 2);
        assert!(exec2.delete(AbKey::new(0, 3)));
        assert!(exec2.insert(AbKey::new(0, 3), b"reborn"));
        assert!(exec2.commit());

        let mut exec3 = Executor::new(&tpl, &mut ctx, 3);
        let mut out = Vec::new();
        assert!(exec3.read(AbKey::new(0, 3), &mut out));
        assert_eq!(out, b"reborn");
        exec3.commit();
    }
}

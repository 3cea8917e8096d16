//! Romulus double-copy (spec §4.2.3). Every record has `main`/`backup`
//! payload slots. Readers take the global CRWWP lock in shared mode and
//! read `main`; a committing writer takes it exclusively, copies
//! `main -> backup`, installs the new data into `main`, and only then
//! releases -- so a crash mid-commit leaves either the old `main` (log
//! chain empty) or a restorable `backup` plus a log chain naming what to
//! restore.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::cc::executor::CC;
use crate::cc::tx_context::{ThreadContext, TxContext, TxStatus, WriteRecord};
use crate::data::{BodyRef, DataManager};
use crate::index::simple_map::SimpleMap;
use crate::index::Index;
use crate::key::{AbKey, IndexTuple, Ref};
use crate::log::manager::LogManager;
use crate::log::tuple::{LogChunk, LogTuple};

struct RomulusHeader {
    header_id: u64,
    main: Mutex<Option<BodyRef>>,
    backup: Mutex<Option<BodyRef>>,
}

pub struct Romulus {
    index: SimpleMap,
    data: DataManager,
    headers: Mutex<HashMap<AbKey, Arc<RomulusHeader>>>,
    log: Mutex<LogManager>,
    /// The CRWWP commit-serialising lock: many concurrent readers of
    /// `main`, one committing writer at a time.
    commit_lock: RwLock<()>,
    next_header_id: AtomicU64,
}

impl Romulus {
    pub fn new(log: LogManager) -> Self {
        Romulus {
            index: SimpleMap::new(),
            data: DataManager::new(),
            headers: Mutex::new(HashMap::new()),
            log: Mutex::new(log),
            commit_lock: RwLock::new(()),
            next_header_id: AtomicU64::new(0),
        }
    }

    fn header_for(&self, key: AbKey) -> Option<Arc<RomulusHeader>> {
        self.headers.lock().get(&key).cloned()
    }
}

impl CC for Romulus {
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

        let _guard = self.commit_lock.read();
        let body = match *header.main.lock() {
            Some(b) => b,
            None => return false,
        };
        out.clear();
        out.extend_from_slice(&self.data.read(body));
        true
    }

    fn update(&self, _ctx: &mut ThreadContext, tx: &mut TxContext, key: AbKey, offset: u32, new: &[u8]) -> bool {
        if self.header_for(key).is_none() {
            return false;
        }
        tx.write_set.push(WriteRecord { key, data: new.to_vec(), offset, is_insert: false, is_delete: false });
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
            Arc::new(RomulusHeader { header_id, main: Mutex::new(None), backup: Mutex::new(None) }),
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
        _tx: &mut TxContext,
        key: AbKey,
        n: u32,
        out: &mut Vec<(AbKey, Vec<u8>)>,
    ) -> bool {
        let _guard = self.commit_lock.read();
        for i in 0..n as u64 {
            let candidate = AbKey::new(key.type_tag, key.logic_key + i);
            let header = match self.header_for(candidate) {
                Some(h) => h,
                None => break,
            };
            let body = match *header.main.lock() {
                Some(b) => b,
                None => break,
            };
            out.push((candidate, self.data.read(body)));
        }
        true
    }

    fn commit(&self, _ctx: &mut ThreadContext, tx: &mut TxContext) -> bool {
        if tx.write_set.is_empty() {
            return true;
        }

        let headers: Vec<(WriteRecord, Option<Arc<RomulusHeader>>)> =
            tx.write_set.iter().map(|w| (w.clone(), self.header_for(w.key))).collect();

        // Exclusive commit-phase lock: waits for in-flight readers to
        // depart before any main/backup copy begins.
        let _guard = self.commit_lock.write();

        let mut chain = LogChunk::new();
        for (write, header) in &headers {
            if let Some(header) = header {
                if !chain.push(header.header_id) {
                    let mut next = LogChunk::new();
                    next.push(header.header_id);
                    chain.link(next);
                }
            } else if !write.is_insert {
                return false;
            }
        }

        let mut log = self.log.lock();
        let mut space = match log.allocate_space(4096) {
            Ok(s) => s,
            Err(_) => return false,
        };

        for (write, header) in &headers {
            if write.is_insert {
                let body = self.data.allocate(write.data.len());
                self.data.write(body, 0, &write.data);
                let header = header.clone().unwrap();
                *header.main.lock() = Some(body);
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
                let header = header.clone().unwrap();
                let main_body = match *header.main.lock() {
                    Some(b) => b,
                    None => continue,
                };
                // Step 1: copy main's current bytes into a fresh backup
                // body -- backup must hold the prior image, not just the
                // same handle main is about to be mutated through.
                let prior = self.data.read(main_body);
                let backup_body = self.data.allocate(prior.len());
                self.data.write(backup_body, 0, &prior);
                *header.backup.lock() = Some(backup_body);
                // Step 2: install the new payload into main.
                self.data.write(main_body, write.offset as usize, &write.data);
                let _ = log.append(
                    &mut space,
                    &LogTuple::Update { ts: tx.ts, key: write.key, offset: write.offset, data: write.data.clone() },
                );
            }
        }
        let _ = log.append(&mut space, &LogTuple::Commit { ts: tx.ts });
        drop(log);

        chain.clear();
        true
    }

    fn abort(&self, _ctx: &mut ThreadContext, tx: &mut TxContext) {
        for write in &tx.write_set {
            if write.is_insert {
                self.headers.lock().remove(&write.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cc::executor::Executor;
    use crate::mem::ring::RingAllocator;
    use crate::mem::MemMedia;

    fn new_romulus() -> Romulus {
        let dir = tempfile::tempdir().unwrap();
        let ring = RingAllocator::create(dir.path().join("Data_0"), 1 << 16, MemMedia::Dram).unwrap();
        Romulus::new(LogManager::new(ring))
    }

    #[test]
    fn commit_installs_new_value_into_main() {
        let rom = new_romulus();
        let mut ctx = ThreadContext::new(1);
        let mut exec = Executor::new(&rom, &mut ctx, 1);
        exec.insert(AbKey::new(0, 1), b"v0");
        exec.commit();

        let mut exec2 = Executor::new(&rom, &mut ctx, 2);
        assert!(exec2.update(AbKey::new(0, 1), 0, b"v1"));
        assert!(exec2.commit());

        let mut exec3 = Executor::new(&rom, &mut ctx, 3);
        let mut out = Vec::new();
        assert!(exec3.read(AbKey::new(0, 1), &mut out));
        assert_eq!(out, b"v1");
        exec3.commit();
    }

    #[test]
    fn backup_holds_prior_image_after_an_update_commits() {
        let rom = new_romulus();
        let mut ctx = ThreadContext::new(1);
        let mut exec = Executor::new(&rom, &mut ctx, 1);
        exec.insert(AbKey::new(0, 2), b"orig");
        exec.commit();

        let header = rom.header_for(AbKey::new(0, 2)).unwrap();
        let mut exec2 = Executor::new(&rom, &mut ctx, 2);
        exec2.update(AbKey::new(0, 2), 0, b"next");
        exec2.commit();

        let backup_body = header.backup.lock().unwrap();
        assert_eq!(rom.data.read(backup_body), b"orig");
    }

    #[test]
    fn delete_then_insert_within_one_transaction_is_legal() {
        let rom = new_romulus();
        let mut ctx = ThreadContext::new(1);
        let mut exec = Executor::new(&rom, &mut ctx, 1);
        exec.insert(AbKey::new(0, 3), b"orig");
        exec.commit();

        let mut exec2 = Executor::new(&rom, &mut ctx, 2);
        assert!(exec2.delete(AbKey::new(0, 3)));
        assert!(exec2.insert(AbKey::new(0, 3), b"reborn"));
        assert!(exec2.commit());

        let mut exec3 = Executor::new(&rom, &mut ctx, 3);
        let mut out = Vec::new();
        assert!(exec3.read(AbKey::new(0, 3), &mut out));
        assert_eq!(out, b"reborn");
        exec3.commit();
    }
}

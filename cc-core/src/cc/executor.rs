//! The Executor façade (spec §4.1): binds one CC instance to a worker's
//! thread context and a transaction's scratch state, and forwards the five
//! data operations plus commit/abort/reset. Every op returns `false` when
//! the caller's next legal move is `abort()`.

use crate::cc::tx_context::{ThreadContext, TxContext};
use crate::key::AbKey;

pub trait CC: Send + Sync {
    fn read(&self, ctx: &mut ThreadContext, tx: &mut TxContext, key: AbKey, out: &mut Vec<u8>) -> bool;
    fn update(&self, ctx: &mut ThreadContext, tx: &mut TxContext, key: AbKey, offset: u32, new: &[u8]) -> bool;
    fn insert(&self, ctx: &mut ThreadContext, tx: &mut TxContext, key: AbKey, new: &[u8]) -> bool;
    fn scan(
        &self,
        ctx: &mut ThreadContext,
        tx: &mut TxContext,
        key: AbKey,
        n: u32,
        out: &mut Vec<(AbKey, Vec<u8>)>,
    ) -> bool;
    fn delete(&self, ctx: &mut ThreadContext, tx: &mut TxContext, key: AbKey) -> bool;
    fn commit(&self, ctx: &mut ThreadContext, tx: &mut TxContext) -> bool;
    fn abort(&self, ctx: &mut ThreadContext, tx: &mut TxContext);
}

pub struct Executor<'a, C: CC> {
    cc: &'a C,
    ctx: &'a mut ThreadContext,
    tx: TxContext,
}

impl<'a, C: CC> Executor<'a, C> {
    pub fn new(cc: &'a C, ctx: &'a mut ThreadContext, ts: u64) -> Self {
        Executor { cc, ctx, tx: TxContext::new(ts) }
    }

    pub fn read(&mut self, key: AbKey, out: &mut Vec<u8>) -> bool {
        self.cc.read(self.ctx, &mut self.tx, key, out)
    }

    pub fn update(&mut self, key: AbKey, offset: u32, new: &[u8]) -> bool {
        self.cc.update(self.ctx, &mut self.tx, key, offset, new)
    }

    pub fn insert(&mut self, key: AbKey, new: &[u8]) -> bool {
        self.cc.insert(self.ctx, &mut self.tx, key, new)
    }

    pub fn scan(&mut self, key: AbKey, n: u32, out: &mut Vec<(AbKey, Vec<u8>)>) -> bool {
        self.cc.scan(self.ctx, &mut self.tx, key, n, out)
    }

    pub fn delete(&mut self, key: AbKey) -> bool {
        self.cc.delete(self.ctx, &mut self.tx, key)
    }

    pub fn commit(&mut self) -> bool {
        self.cc.commit(self.ctx, &mut self.tx)
    }

    pub fn abort(&mut self) {
        self.cc.abort(self.ctx, &mut self.tx)
    }

    /// Reinitialises this executor's `TxContext` for another attempt at a
    /// (possibly new) transaction, identified by timestamp `ts`.
    pub fn reset(&mut self, ts: u64) {
        self.tx.reset(ts);
    }
}

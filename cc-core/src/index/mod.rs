//! The index external contract (spec-of-record §4.3): any map from [`AbKey`]
//! to [`IndexTuple`] that is safe for concurrent readers and writers satisfies
//! it. [`simple_map::SimpleMap`] is the reference implementation shipped so
//! the CC protocols and the benchmark binary can run without an external
//! B+tree crate.

pub mod simple_map;

use crate::key::{AbKey, IndexTuple};

/// A map from [`AbKey`] to [`IndexTuple`], safe for concurrent use. CC
/// protocols never hold an index lock across a transaction -- the index is
/// consulted once per operation and the returned `IndexTuple` is the stable
/// handle the protocol then works with directly.
pub trait Index: Send + Sync {
    /// Publishes `value` under `key`. Returns `false` if `key` already
    /// exists (the caller must abort the insert).
    fn insert(&self, key: AbKey, value: IndexTuple) -> bool;

    /// Removes `key`. Returns `false` if it was not present.
    fn remove(&self, key: AbKey) -> bool;

    /// Looks up `key`, returning its tuple if present.
    fn read(&self, key: AbKey) -> Option<IndexTuple>;

    /// Replaces the tuple published under `key`. Returns `false` if `key`
    /// was not present (use `insert` for first publication).
    fn update(&self, key: AbKey, value: IndexTuple) -> bool;

    /// Reports whether `key` is currently present.
    fn contain(&self, key: AbKey) -> bool;

    /// Removes every entry, invoking `visit` with each one first so callers
    /// can release the storage it references.
    fn clear(&self, visit: &mut dyn FnMut(AbKey, IndexTuple));

    /// Number of entries currently present.
    fn size(&self) -> u32;
}

//! Reference [`Index`] implementation: a mutex-guarded hash map. No reuse
//! policy and no tree balancing -- just enough for the CC protocols and the
//! benchmark binary to have something real to index against.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::index::Index;
use crate::key::{AbKey, IndexTuple};

pub struct SimpleMap {
    inner: Mutex<HashMap<AbKey, IndexTuple>>,
}

impl SimpleMap {
    pub fn new() -> Self {
        SimpleMap { inner: Mutex::new(HashMap::new()) }
    }
}

impl Default for SimpleMap {
    fn default() -> Self {
        Self::new()
    }
}

impl Index for SimpleMap {
    fn insert(&self, key: AbKey, value: IndexTuple) -> bool {
        let mut inner = self.inner.lock();
        if inner.contains_key(&key) {
            return false;
        }
        inner.insert(key, value);
        true
    }

    fn remove(&self, key: AbKey) -> bool {
        self.inner.lock().remove(&key).is_some()
    }

    fn read(&self, key: AbKey) -> Option<IndexTuple> {
        self.inner.lock().get(&key).copied()
    }

    fn update(&self, key: AbKey, value: IndexTuple) -> bool {
        let mut inner = self.inner.lock();
        if !inner.contains_key(&key) {
            return false;
        }
        inner.insert(key, value);
        true
    }

    // The original SimpleMap.contain() called a B+tree search method on what
    // is here a plain hash map; the intended semantic is just membership.
    fn contain(&self, key: AbKey) -> bool {
        self.inner.lock().contains_key(&key)
    }

    fn clear(&self, visit: &mut dyn FnMut(AbKey, IndexTuple)) {
        let mut inner = self.inner.lock();
        for (key, value) in inner.drain() {
            visit(key, value);
        }
    }

    fn size(&self) -> u32 {
        self.inner.lock().len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Ref;

    fn tuple(n: u64) -> IndexTuple {
        IndexTuple::new(0, 8, Ref { offset: n }, Ref { offset: n + 1 })
    }

    #[test]
    fn insert_then_read_round_trips() {
        let map = SimpleMap::new();
        let key = AbKey::new(1, 42);
        assert!(map.insert(key, tuple(1)));
        assert_eq!(map.read(key), Some(tuple(1)));
        assert!(map.contain(key));
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let map = SimpleMap::new();
        let key = AbKey::new(1, 1);
        assert!(map.insert(key, tuple(1)));
        assert!(!map.insert(key, tuple(2)));
        assert_eq!(map.read(key), Some(tuple(1)));
    }

    #[test]
    fn update_requires_existing_entry() {
        let map = SimpleMap::new();
        let key = AbKey::new(1, 1);
        assert!(!map.update(key, tuple(1)));
        map.insert(key, tuple(1));
        assert!(map.update(key, tuple(2)));
        assert_eq!(map.read(key), Some(tuple(2)));
    }

    #[test]
    fn remove_then_contain_is_false() {
        let map = SimpleMap::new();
        let key = AbKey::new(2, 7);
        map.insert(key, tuple(5));
        assert!(map.remove(key));
        assert!(!map.contain(key));
        assert!(!map.remove(key));
    }

    #[test]
    fn delete_then_insert_within_one_key_leaves_one_entry() {
        let map = SimpleMap::new();
        let key = AbKey::new(3, 9);
        map.insert(key, tuple(1));
        map.remove(key);
        assert!(map.insert(key, tuple(2)));
        assert_eq!(map.size(), 1);
        assert_eq!(map.read(key), Some(tuple(2)));
    }

    #[test]
    fn size_tracks_live_entries() {
        let map = SimpleMap::new();
        assert_eq!(map.size(), 0);
        map.insert(AbKey::new(0, 1), tuple(1));
        map.insert(AbKey::new(0, 2), tuple(2));
        assert_eq!(map.size(), 2);
        map.remove(AbKey::new(0, 1));
        assert_eq!(map.size(), 1);
    }

    #[test]
    fn clear_visits_every_entry_and_empties_the_map() {
        let map = SimpleMap::new();
        map.insert(AbKey::new(0, 1), tuple(1));
        map.insert(AbKey::new(0, 2), tuple(2));
        let mut visited = Vec::new();
        map.clear(&mut |k, v| visited.push((k, v)));
        visited.sort_by_key(|(k, _)| k.logic_key);
        assert_eq!(visited, vec![(AbKey::new(0, 1), tuple(1)), (AbKey::new(0, 2), tuple(2))]);
        assert_eq!(map.size(), 0);
    }
}

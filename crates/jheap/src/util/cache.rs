//! Bounded key/value cache with least-recently-used eviction.
//!
//! Every unbounded structure in this crate is either on disk or behind one
//! of these. Recency is tracked with a monotonic tick per access; eviction
//! scans for the minimum tick. The scan is linear, but caches here are
//! small relative to the work done between misses, so the simple scheme
//! wins over a linked structure.

use std::hash::Hash;

use rustc_hash::FxHashMap;

pub(crate) struct BoundedCache<K, V> {
    map: FxHashMap<K, (V, u64)>,
    capacity: usize,
    tick: u64,
}

impl<K: Eq + Hash + Clone, V> BoundedCache<K, V> {
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be nonzero");
        BoundedCache { map: FxHashMap::default(), capacity, tick: 0 }
    }

    pub(crate) fn get(&mut self, key: &K) -> Option<&V> {
        self.tick += 1;
        let tick = self.tick;
        match self.map.get_mut(key) {
            Some(entry) => {
                entry.1 = tick;
                Some(&entry.0)
            }
            None => None,
        }
    }

    pub(crate) fn insert(&mut self, key: K, value: V) {
        self.tick += 1;
        if self.map.len() >= self.capacity && !self.map.contains_key(&key) {
            self.evict_one();
        }
        self.map.insert(key, (value, self.tick));
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map.len()
    }

    fn evict_one(&mut self) {
        let victim = self
            .map
            .iter()
            .min_by_key(|(_, (_, tick))| *tick)
            .map(|(k, _)| k.clone());
        if let Some(key) = victim {
            self.map.remove(&key);
        }
    }
}

//! # LRU Cache
//!
//! Bounded least-recently-used map with hit/miss accounting.
//! Recency is tracked with a monotonically increasing access counter and the
//! entry with the smallest counter is evicted, which is a linear scan. Caches
//! here hold tens to a few hundred activities, so that is fine.

use std::collections::HashMap;
use std::hash::Hash;

/// Running totals for one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug)]
struct Slot<V> {
    value: V,
    last_access: u64,
}

#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    slots: HashMap<K, Slot<V>>,
    clock: u64,
    stats: CacheStats,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    /// A capacity of 0 disables caching: inserts are dropped.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: HashMap::with_capacity(capacity),
            clock: 0,
            stats: CacheStats::default(),
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Look up and mark as most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let now = self.tick();
        match self.slots.get_mut(key) {
            Some(slot) => {
                self.stats.hits += 1;
                slot.last_access = now;
                Some(&slot.value)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Look up without touching recency or stats.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.slots.get(key).map(|s| &s.value)
    }

    /// Insert or replace. Returns the entry evicted to make room, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if self.capacity == 0 {
            return None;
        }
        let now = self.tick();
        if let Some(slot) = self.slots.get_mut(&key) {
            slot.value = value;
            slot.last_access = now;
            return None;
        }

        let evicted = if self.slots.len() >= self.capacity {
            self.evict_least_recent()
        } else {
            None
        };
        self.slots.insert(
            key,
            Slot {
                value,
                last_access: now,
            },
        );
        evicted
    }

    /// Remove one key, returning its value.
    pub fn invalidate(&mut self, key: &K) -> Option<V> {
        self.slots.remove(key).map(|s| s.value)
    }

    /// Remove several keys. Returns how many were present.
    pub fn invalidate_many<'a, I>(&mut self, keys: I) -> usize
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        keys.into_iter()
            .filter(|k| self.slots.remove(*k).is_some())
            .count()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn evict_least_recent(&mut self) -> Option<(K, V)> {
        let oldest = self
            .slots
            .iter()
            .min_by_key(|(_, slot)| slot.last_access)
            .map(|(k, _)| k.clone())?;
        let slot = self.slots.remove(&oldest)?;
        self.stats.evictions += 1;
        Some((oldest, slot.value))
    }
}

impl<K: Eq + Hash + Clone, V: Clone> LruCache<K, V> {
    /// Cloned lookup, for callers that cannot hold the borrow.
    pub fn get_cloned(&mut self, key: &K) -> Option<V> {
        self.get(key).cloned()
    }
}

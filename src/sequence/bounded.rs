//! Insertion-ordered map with cheap oldest-first eviction.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Fraction of entries dropped by [`InsertionOrderedMap::prune`].
const PRUNE_FRACTION: f64 = 0.1;

/// `HashMap` plus a queue of keys in insertion order.
///
/// Evicting the `n` oldest entries costs O(n), independent of map size.
/// Re-inserting an existing key keeps its original position.
#[derive(Debug, Clone)]
pub struct InsertionOrderedMap<K, V> {
    map: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V> InsertionOrderedMap<K, V> {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.map.get_mut(key)
    }

    /// Get the value for `key`, inserting `make()` at the back if absent.
    pub fn get_or_insert_with(&mut self, key: K, make: impl FnOnce() -> V) -> &mut V {
        match self.map.entry(key) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                self.order.push_back(e.key().clone());
                e.insert(make())
            }
        }
    }

    /// Remove up to `n` of the oldest entries; returns how many were removed.
    pub fn evict_oldest(&mut self, n: usize) -> usize {
        let mut removed = 0;
        while removed < n {
            let Some(key) = self.order.pop_front() else {
                break;
            };
            if self.map.remove(&key).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Remove the oldest 10% of entries (at least one).
    pub fn prune(&mut self) -> usize {
        let n = ((self.len() as f64 * PRUNE_FRACTION) as usize).max(1);
        self.evict_oldest(n)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.order
            .iter()
            .filter_map(|k| self.map.get_key_value(k))
    }
}

impl<K: Eq + Hash + Clone, V> Default for InsertionOrderedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

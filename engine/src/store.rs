use std::collections::BTreeMap;

/// Minimal keyed-arena abstraction over entity storage.
///
/// The engines only touch entities through this trait, so the in-memory map
/// can be swapped for a persistent backend without touching state-machine
/// logic.
pub trait KvStore<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<&V>;
    fn get_mut(&mut self, key: &K) -> Option<&mut V>;
    /// Insert or replace; returns the previous value if any.
    fn insert(&mut self, key: K, value: V) -> Option<V>;
    fn remove(&mut self, key: &K) -> Option<V>;
    /// Iterate entries in key order. Monotonic ids make this insertion
    /// order for listings and offers.
    fn iter(&self) -> Box<dyn Iterator<Item = (&K, &V)> + '_>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory reference backend over a `BTreeMap`.
#[derive(Debug)]
pub struct MemoryStore<K, V> {
    entries: BTreeMap<K, V>,
}

impl<K: Ord, V> MemoryStore<K, V> {
    pub fn new() -> Self {
        MemoryStore {
            entries: BTreeMap::new(),
        }
    }
}

impl<K: Ord, V> Default for MemoryStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> KvStore<K, V> for MemoryStore<K, V>
where
    K: Ord + Send + Sync,
    V: Send + Sync,
{
    fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key)
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (&K, &V)> + '_> {
        Box::new(self.entries.iter())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

use std::collections::BTreeMap;

/// Ordered map with a dirty flag.
///
/// Every mutating call that changes contents marks the store dirty; the host
/// clears the flag after a successful save.
#[derive(Debug, Clone)]
pub struct KeyedStore<K, V> {
    items: BTreeMap<K, V>,
    dirty: bool,
}

impl<K: Ord, V> Default for KeyedStore<K, V> {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
            dirty: false,
        }
    }
}

impl<K: Ord, V> KeyedStore<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from persisted items. The result is clean.
    pub fn from_items(items: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            items: items.into_iter().collect(),
            dirty: false,
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.items.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.items.contains_key(key)
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.dirty = true;
        self.items.insert(key, value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let removed = self.items.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Keep entries matching `keep`; returns how many were dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) -> usize {
        let before = self.items.len();
        self.items.retain(|k, v| keep(k, v));
        let dropped = before - self.items.len();
        if dropped > 0 {
            self.dirty = true;
        }
        dropped
    }

    pub fn clear(&mut self) {
        if !self.items.is_empty() {
            self.dirty = true;
        }
        self.items.clear();
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.items.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

impl<K: Ord, V: Clone> KeyedStore<K, V> {
    pub fn to_vec(&self) -> Vec<V> {
        self.items.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restored_store_is_clean() {
        let store = KeyedStore::from_items([(1, "a"), (2, "b")]);
        assert!(!store.is_dirty());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_mutations_mark_dirty() {
        let mut store: KeyedStore<i64, &str> = KeyedStore::new();
        assert!(store.remove(&1).is_none());
        assert!(!store.is_dirty());

        store.insert(1, "a");
        assert!(store.is_dirty());
        store.mark_clean();

        assert_eq!(store.retain(|_, _| true), 0);
        assert!(!store.is_dirty());
        assert_eq!(store.retain(|k, _| *k != 1), 1);
        assert!(store.is_dirty());
    }

    #[test]
    fn test_values_are_key_ordered() {
        let store = KeyedStore::from_items([(3, 'c'), (1, 'a'), (2, 'b')]);
        assert_eq!(store.to_vec(), vec!['a', 'b', 'c']);
    }
}

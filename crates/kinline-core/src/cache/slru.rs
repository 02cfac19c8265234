use indexmap::IndexMap;
use std::hash::Hash;

/// Segmented LRU map.
///
/// New entries land in the probationary segment; a second hit promotes an
/// entry to the protected segment. When the protected segment overflows its
/// least recently used entry is demoted back to probationary, and entries
/// are evicted only from the probationary tail. Both segments keep their
/// least recently used entry first.
#[derive(Debug, Clone)]
pub struct SlruMap<K, V> {
    protected: IndexMap<K, V>,
    probationary: IndexMap<K, V>,
    protected_capacity: usize,
    probationary_capacity: usize,
}

impl<K: Hash + Eq + Clone, V> SlruMap<K, V> {
    pub fn new(protected_capacity: usize, probationary_capacity: usize) -> Self {
        Self {
            protected: IndexMap::new(),
            probationary: IndexMap::new(),
            protected_capacity,
            probationary_capacity: probationary_capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.protected.len() + self.probationary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.protected.contains_key(key) || self.probationary.contains_key(key)
    }

    pub fn is_protected(&self, key: &K) -> bool {
        self.protected.contains_key(key)
    }

    /// Looks `key` up and records the hit.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        if let Some(index) = self.protected.get_index_of(key) {
            let last = self.protected.len() - 1;
            self.protected.move_index(index, last);
            return self.protected.get_index(last).map(|(_, v)| v);
        }
        let value = self.probationary.shift_remove(key)?;
        self.promote(key.clone(), value);
        self.protected.get(key).or_else(|| self.probationary.get(key))
    }

    fn promote(&mut self, key: K, value: V) {
        if self.protected_capacity == 0 {
            self.probationary.insert(key, value);
            return;
        }
        self.protected.insert(key, value);
        if self.protected.len() > self.protected_capacity {
            if let Some((demoted_key, demoted)) = self.protected.shift_remove_index(0) {
                self.insert_probationary(demoted_key, demoted);
            }
        }
    }

    fn insert_probationary(&mut self, key: K, value: V) -> Option<(K, V)> {
        self.probationary.insert(key, value);
        if self.probationary.len() > self.probationary_capacity {
            self.probationary.shift_remove_index(0)
        } else {
            None
        }
    }

    /// Inserts or replaces `key`. Returns the evicted entry, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(slot) = self.protected.get_mut(&key) {
            *slot = value;
            return None;
        }
        self.probationary.shift_remove(&key);
        self.insert_probationary(key, value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.protected
            .shift_remove(key)
            .or_else(|| self.probationary.shift_remove(key))
    }

    pub fn clear(&mut self) {
        self.protected.clear();
        self.probationary.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eviction_from_probationary_tail() {
        let mut map = SlruMap::new(1, 2);
        assert!(map.insert("a", 1).is_none());
        assert!(map.insert("b", 2).is_none());
        assert_eq!(map.insert("c", 3), Some(("a", 1)));
        assert!(!map.contains_key(&"a"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_second_hit_promotes() {
        let mut map = SlruMap::new(1, 2);
        map.insert("a", 1);
        assert_eq!(map.get(&"a"), Some(&1));
        assert!(map.is_protected(&"a"));
        map.insert("b", 2);
        map.insert("c", 3);
        // protected entries survive probationary churn
        map.insert("d", 4);
        assert!(map.contains_key(&"a"));
        assert!(!map.contains_key(&"b"));
    }

    #[test]
    fn test_protected_overflow_demotes() {
        let mut map = SlruMap::new(1, 2);
        map.insert("a", 1);
        map.insert("b", 2);
        map.get(&"a");
        map.get(&"b");
        assert!(map.is_protected(&"b"));
        assert!(!map.is_protected(&"a"));
        assert!(map.contains_key(&"a"));
    }

    #[test]
    fn test_insert_replaces_value() {
        let mut map = SlruMap::new(2, 2);
        map.insert("a", 1);
        map.get(&"a");
        map.insert("a", 5);
        assert_eq!(map.get(&"a"), Some(&5));
        assert_eq!(map.len(), 1);
        assert_eq!(map.remove(&"a"), Some(5));
        assert!(map.is_empty());
    }
}

//! Caches of compiled bytecode shared by every inline call of a module.
//!
//! Both tables only save work: a miss recomputes the entry, so eviction
//! never changes the inlined result.

mod slru;

pub use slru::SlruMap;

use crate::config::{CacheCapacity, InlineConfig};
use crate::errors::Result;
use crate::insn::MethodId;
use crate::smap::SmapAndMethodNode;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::trace;

#[derive(Debug)]
struct Table<K, V> {
    name: &'static str,
    entries: Mutex<SlruMap<K, Arc<V>>>,
}

impl<K: Hash + Eq + Clone + Debug, V> Table<K, V> {
    fn new(name: &'static str, capacity: CacheCapacity) -> Self {
        Self {
            name,
            entries: Mutex::new(SlruMap::new(capacity.protected, capacity.probationary)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlruMap<K, Arc<V>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The lock is held while `compute` runs, so concurrent callers of the
    /// same key compute it once.
    fn get_or_compute(&self, key: &K, compute: impl FnOnce() -> Result<V>) -> Result<Arc<V>> {
        let mut entries = self.lock();
        if let Some(value) = entries.get(key) {
            trace!(table = self.name, ?key, "cache hit");
            return Ok(Arc::clone(value));
        }
        trace!(table = self.name, ?key, "cache miss");
        let value = Arc::new(compute()?);
        if let Some((evicted, _)) = entries.insert(key.clone(), Arc::clone(&value)) {
            trace!(table = self.name, key = ?evicted, "cache eviction");
        }
        Ok(value)
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn contains(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }
}

/// Class bytes by internal name and parsed inline function bodies by
/// method identity.
#[derive(Debug)]
pub struct InlineCache {
    class_bytes: Table<String, Vec<u8>>,
    method_nodes: Table<MethodId, SmapAndMethodNode>,
}

impl Default for InlineCache {
    fn default() -> Self {
        Self::new(&InlineConfig::default())
    }
}

impl InlineCache {
    pub fn new(config: &InlineConfig) -> Self {
        Self {
            class_bytes: Table::new("class bytes", config.class_bytes_cache),
            method_nodes: Table::new("method nodes", config.method_node_cache),
        }
    }

    pub fn get_or_compute_class_bytes(
        &self,
        internal_name: &str,
        compute: impl FnOnce() -> Result<Vec<u8>>,
    ) -> Result<Arc<Vec<u8>>> {
        self.class_bytes
            .get_or_compute(&internal_name.to_string(), compute)
    }

    pub fn get_or_compute_method_node(
        &self,
        method: &MethodId,
        compute: impl FnOnce() -> Result<SmapAndMethodNode>,
    ) -> Result<Arc<SmapAndMethodNode>> {
        self.method_nodes.get_or_compute(method, compute)
    }

    pub fn class_bytes_len(&self) -> usize {
        self.class_bytes.len()
    }

    pub fn method_nodes_len(&self) -> usize {
        self.method_nodes.len()
    }

    pub fn contains_method_node(&self, method: &MethodId) -> bool {
        self.method_nodes.contains(method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::InlineError;
    use crate::insn::MethodNode;
    use crate::smap::Smap;
    use std::cell::Cell;

    #[test]
    fn test_computes_once() {
        let cache = InlineCache::default();
        let calls = Cell::new(0);
        for _ in 0..3 {
            let bytes = cache
                .get_or_compute_class_bytes("a/A", || {
                    calls.set(calls.get() + 1);
                    Ok(vec![1, 2, 3])
                })
                .unwrap();
            assert_eq!(*bytes, vec![1, 2, 3]);
        }
        assert_eq!(calls.get(), 1);
        assert_eq!(cache.class_bytes_len(), 1);
    }

    #[test]
    fn test_failed_compute_is_not_cached() {
        let cache = InlineCache::default();
        let id = MethodId::new("a/A", "f", "()V");
        let err = cache
            .get_or_compute_method_node(&id, || Err(InlineError::internal("boom")))
            .unwrap_err();
        assert!(err.is_internal());
        assert!(!cache.contains_method_node(&id));

        let node = cache
            .get_or_compute_method_node(&id, || {
                Ok(SmapAndMethodNode::new(MethodNode::new(0, "f", "()V"), Smap::new(Vec::new())))
            })
            .unwrap();
        assert_eq!(node.node.name, "f");
        assert_eq!(cache.method_nodes_len(), 1);
    }

    #[test]
    fn test_cache_is_shared_between_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<InlineCache>();
        assert_send_sync::<Arc<SmapAndMethodNode>>();
    }

    #[test]
    fn test_capacity_from_config() {
        let mut config = InlineConfig::default();
        config.class_bytes_cache = CacheCapacity::new(0, 1);
        let cache = InlineCache::new(&config);
        cache.get_or_compute_class_bytes("a/A", || Ok(vec![1])).unwrap();
        cache.get_or_compute_class_bytes("a/B", || Ok(vec![2])).unwrap();
        assert_eq!(cache.class_bytes_len(), 1);
    }
}

use kinline_core::cache::InlineCache;
use kinline_core::config::{CacheCapacity, InlineConfig};
use kinline_core::insn::MethodId;
use kinline_core::smap::{Smap, SmapAndMethodNode};
use kinline_core::MethodNode;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_concurrent_callers_compute_once() {
    let cache = InlineCache::default();
    let computed = AtomicUsize::new(0);
    let results: Vec<Arc<Vec<u8>>> = (0..64)
        .into_par_iter()
        .map(|_| {
            cache
                .get_or_compute_class_bytes("a/LibKt", || {
                    computed.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1, 2, 3])
                })
                .unwrap()
        })
        .collect();

    assert_eq!(computed.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|bytes| bytes.as_slice() == [1, 2, 3]));
    assert_eq!(cache.class_bytes_len(), 1);
}

#[test]
fn test_method_nodes_from_many_threads() {
    let cache = InlineCache::default();
    (0..32usize).into_par_iter().for_each(|i| {
        let id = MethodId::new("a/LibKt", format!("f{}", i % 8), "()V");
        cache
            .get_or_compute_method_node(&id, || {
                Ok(SmapAndMethodNode::new(
                    MethodNode::new(0, id.name.clone(), "()V"),
                    Smap::new(Vec::new()),
                ))
            })
            .unwrap();
    });
    assert_eq!(cache.method_nodes_len(), 8);
}

#[test]
fn test_capacity_bounds_the_cache() {
    let config = InlineConfig {
        class_bytes_cache: CacheCapacity::new(1, 2),
        ..InlineConfig::default()
    };
    let cache = InlineCache::new(&config);
    for i in 0..10 {
        cache
            .get_or_compute_class_bytes(&format!("a/C{i}"), || Ok(vec![i]))
            .unwrap();
    }
    assert!(cache.class_bytes_len() <= 3);
}

#[test]
fn test_failed_computation_is_not_cached() {
    let cache = InlineCache::default();
    let err = cache.get_or_compute_class_bytes("a/Missing", || {
        Err(kinline_core::InlineError::ClassNotFound {
            name: "a/Missing".into(),
        })
    });
    assert!(err.is_err());
    assert_eq!(cache.class_bytes_len(), 0);
}

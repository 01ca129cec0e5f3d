//! Behaviour every backend must share, driven through `LongLongStore`.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use geotile_longmap::{BackendKind, LongLongStore, StoreConfig, StoreError};
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use std::collections::BTreeMap;
use tempfile::TempDir;

/// Small geometry so disk backends stay cheap in tests.
fn test_config(kind: BackendKind, dir: &TempDir) -> StoreConfig {
    StoreConfig::new(kind)
        .with_path(dir.path().join(kind.name()))
        .with_page_bits(12)
        .with_mmap_max_key(1 << 26)
        .with_spill_threshold(1_000)
        .with_index_interval(16)
}

#[test]
fn every_written_key_reads_back() {
    for kind in BackendKind::ALL {
        let dir = TempDir::new().unwrap();
        let mut store = LongLongStore::create(&test_config(kind, &dir)).unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let mut model = BTreeMap::new();
        for _ in 0..5_000 {
            let key = rng.random_range(0..1u64 << 22);
            let value = rng.random_range(0..u64::MAX);
            store.put(key, value).unwrap();
            model.insert(key, value);
        }
        store.seal().unwrap();

        assert_eq!(store.len(), model.len() as u64, "{kind}");
        for (&key, &value) in &model {
            assert_eq!(store.get(key).unwrap(), Some(value), "{kind} key {key}");
        }
        store.close().unwrap();
    }
}

#[test]
fn unwritten_keys_are_absent() {
    for kind in BackendKind::ALL {
        let dir = TempDir::new().unwrap();
        let mut store = LongLongStore::create(&test_config(kind, &dir)).unwrap();
        for key in (0..1_000u64).map(|k| k * 10) {
            store.put(key, 0).unwrap();
        }
        store.seal().unwrap();

        // A stored zero is present, not absent
        assert_eq!(store.get(0).unwrap(), Some(0), "{kind}");
        for key in (0..1_000u64).map(|k| k * 10 + 5) {
            assert_eq!(store.get(key).unwrap(), None, "{kind} key {key}");
        }
        // Far beyond anything written, including unallocated pages
        assert_eq!(store.get(1 << 25).unwrap(), None, "{kind}");
        store.close().unwrap();
    }
}

#[test]
fn last_write_wins() {
    for kind in BackendKind::ALL {
        let dir = TempDir::new().unwrap();
        let mut store = LongLongStore::create(&test_config(kind, &dir)).unwrap();
        // Three passes, each spanning several sorted-table spills
        for pass in 0..3u64 {
            for key in 0..2_500u64 {
                store.put(key, key * 100 + pass).unwrap();
            }
        }
        store.seal().unwrap();

        for key in 0..2_500u64 {
            assert_eq!(store.get(key).unwrap(), Some(key * 100 + 2), "{kind}");
        }
        store.close().unwrap();
    }
}

#[test]
fn get_is_idempotent() {
    for kind in BackendKind::ALL {
        let dir = TempDir::new().unwrap();
        let mut store = LongLongStore::create(&test_config(kind, &dir)).unwrap();
        store.put(17, 71).unwrap();
        store.seal().unwrap();

        let first = store.get(17).unwrap();
        let missing = store.get(18).unwrap();
        for _ in 0..10 {
            assert_eq!(store.get(17).unwrap(), first);
            assert_eq!(store.get(18).unwrap(), missing);
        }
        store.close().unwrap();
    }
}

#[test]
fn put_after_seal_rejected() {
    for kind in BackendKind::ALL {
        let dir = TempDir::new().unwrap();
        let mut store = LongLongStore::create(&test_config(kind, &dir)).unwrap();
        store.put(1, 1).unwrap();
        store.seal().unwrap();
        store.seal().unwrap();
        assert!(matches!(store.put(2, 2), Err(StoreError::Sealed)), "{kind}");
        store.close().unwrap();
    }
}

#[test]
fn sorted_table_requires_seal_before_get() {
    let dir = TempDir::new().unwrap();
    let mut store =
        LongLongStore::create(&test_config(BackendKind::SortedTable, &dir)).unwrap();
    store.put(1, 2).unwrap();
    assert!(matches!(store.get(1), Err(StoreError::NotSealed)));
    store.seal().unwrap();
    assert_eq!(store.get(1).unwrap(), Some(2));
    store.close().unwrap();
}

#[test]
fn capacity_exceeded_aborts_build() {
    let dir = TempDir::new().unwrap();

    let dense = StoreConfig::new(BackendKind::DenseArray).with_dense_capacity(1_000);
    let mut store = LongLongStore::create(&dense).unwrap();
    assert!(matches!(
        store.put(1_000, 1),
        Err(StoreError::CapacityExceeded {
            key: 1_000,
            capacity: 1_000
        })
    ));

    let mut store = LongLongStore::create(&test_config(BackendKind::SparseMmap, &dir)).unwrap();
    assert!(matches!(
        store.put(1 << 26, 1),
        Err(StoreError::CapacityExceeded { .. })
    ));
    store.close().unwrap();
}

#[test]
fn sparse_footprint_tracks_populated_pages() {
    let mut store = LongLongStore::create(&StoreConfig::new(BackendKind::SparseMemory)).unwrap();
    let keys = [0u64, 1 << 30, 1 << 32];
    for key in keys {
        store.put(key, key).unwrap();
    }
    store.seal().unwrap();

    // A dense array over the same range would need 32 GiB
    let dense_equivalent = (1u64 << 32) * 8;
    assert!(store.memory_usage() < 16 * 1024 * 1024);
    assert!(store.memory_usage() * 1_000 < dense_equivalent);
    for key in keys {
        assert_eq!(store.get(key).unwrap(), Some(key));
    }
}

#[test]
fn mmap_disk_usage_tracks_populated_pages() {
    let dir = TempDir::new().unwrap();
    let config = test_config(BackendKind::SparseMmap, &dir);
    let mut store = LongLongStore::create(&config).unwrap();
    store.put(1, 1).unwrap();
    store.put(1 << 25, 1).unwrap();
    store.seal().unwrap();

    let logical = geotile_longmap::fs::size(config.path.as_deref().unwrap());
    assert!(store.disk_usage() > 0);
    assert!(store.disk_usage() < logical);
    store.close().unwrap();
}

#[test]
fn temporary_stores_leave_nothing_behind() {
    for kind in [BackendKind::SparseMmap, BackendKind::SortedTable] {
        let dir = TempDir::new().unwrap();
        let config = test_config(kind, &dir);
        let store_dir = config.path.clone().unwrap();

        let mut store = LongLongStore::create(&config).unwrap();
        for key in 0..3_000u64 {
            store.put(key, key).unwrap();
        }
        store.seal().unwrap();
        store.close().unwrap();
        assert_eq!(geotile_longmap::fs::size(&store_dir), 0, "{kind}");

        // Dropping without close cleans up too
        let mut store = LongLongStore::create(&config).unwrap();
        store.put(1, 1).unwrap();
        drop(store);
        assert_eq!(geotile_longmap::fs::size(&store_dir), 0, "{kind}");
    }
}

//! End-to-end benchmark runs.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use geotile_bench::{BenchConfig, run};
use geotile_longmap::BackendKind;
use tempfile::TempDir;

fn quick_config(kind: BackendKind, entries: u64, readers: usize, dir: &TempDir) -> BenchConfig {
    let mut config = BenchConfig::new(kind, entries, readers);
    config.path = Some(dir.path().join(kind.name()));
    config.duration_secs = 1;
    config.log_interval_secs = 1;
    config.spill_threshold = 50_000;
    config.label = "test".to_string();
    config
}

#[test]
fn every_backend_completes_without_failures() {
    for kind in BackendKind::ALL {
        let dir = TempDir::new().unwrap();
        let config = quick_config(kind, 200_000, 2, &dir);

        let report = run(&config).unwrap();
        assert_eq!(report.backend, kind.name());
        assert_eq!(report.entries, 200_000);
        assert!(report.write_rate > 0.0, "{kind}");
        assert!(report.read_rate > 0.0, "{kind}");
        assert!(report.lookups > 0, "{kind}");
        assert!(report.store_footprint_bytes > 0, "{kind}");

        let line = report.to_string();
        assert_eq!(line.split('\t').count(), 9);
        assert!(line.starts_with(&format!("{}\t200000\t2\ttest\t", kind.name())));

        // Temporary store files are removed after the run
        assert_eq!(geotile_longmap::fs::size(dir.path()), 0, "{kind}");
    }
}

#[test]
fn keep_leaves_a_reopenable_store() {
    let dir = TempDir::new().unwrap();
    let mut config = quick_config(BackendKind::SortedTable, 10_000, 1, &dir);
    config.keep = true;
    run(&config).unwrap();

    let store = geotile_longmap::LongLongStore::open(&config.store_config()).unwrap();
    assert_eq!(store.len(), 10_000);
    assert_eq!(store.get(10_000).unwrap(), Some(10_001));
}

#[test]
fn scaled_sparse_memory_benchmark() {
    let dir = TempDir::new().unwrap();
    let entries = 1_000_000;
    let report = run(&quick_config(BackendKind::SparseMemory, entries, 4, &dir)).unwrap();
    assert!(report.write_rate > 0.0);
    assert!(report.read_rate > 0.0);
    assert!(report.store_footprint_bytes < entries * 8 * 2);
}

#[test]
#[ignore = "writes 10 million entries and reads for 30 seconds"]
fn sparse_memory_ten_million_entries() {
    let entries = 10_000_000;
    let config = BenchConfig::new(BackendKind::SparseMemory, entries, 4);
    let report = run(&config).unwrap();
    assert!(report.write_rate > 0.0);
    assert!(report.read_rate > 0.0);
    assert!(report.store_footprint_bytes < entries * 8 * 2);
}

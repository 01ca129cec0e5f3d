//! Write phase, seal, then concurrent read phase.
//!
//! The writer runs on its own thread while the caller logs progress. After
//! the writer is joined the store is sealed and moved into an `Arc`, which
//! publishes every write to the readers. Readers are released together
//! through a barrier and stop when the read window closes.

use crate::config::BenchConfig;
use crate::error::BenchError;
use crate::format::{format_numeric, format_storage};
use crate::memory::peak_memory_bytes;
use crate::report::BenchmarkReport;
use geotile_longmap::{LongLongStore, fs};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lookups a reader performs between updates of the shared counters.
const READ_BATCH: u64 = 1024;

/// Writes between progress counter updates.
const WRITE_PROGRESS_EVERY: u64 = 64 * 1024;

/// Run one benchmark.
pub fn run(config: &BenchConfig) -> Result<BenchmarkReport, BenchError> {
    config.validate()?;
    let store_config = config.store_config();
    let store_dir = config.store_dir();

    let store = LongLongStore::create(&store_config)?;
    info!(
        "Benchmarking {} with {} entries and {} readers",
        config.backend, config.entries, config.readers
    );

    let (store, write_elapsed) = write_phase(store, config)?;
    let write_rate = per_second(config.entries, write_elapsed);
    info!(
        "Loaded {} entries in {:.1}s ({}/s)",
        config.entries,
        write_elapsed.as_secs_f64(),
        format_numeric(write_rate)
    );

    let store_footprint = store.memory_usage() + store.disk_usage();
    info!(
        "Storage: {}",
        format_storage(store_footprint)
    );

    let store = Arc::new(store);
    let (lookups, failures, read_elapsed) = read_phase(&store, config)?;
    let read_rate = per_second(lookups, read_elapsed);
    info!(
        "Read {} in {:.1}s ({}/s)",
        lookups,
        read_elapsed.as_secs_f64(),
        format_numeric(read_rate)
    );

    let disk_footprint = if config.backend.is_disk_backed() {
        fs::allocated_size(&store_dir)
    } else {
        0
    };
    let report = BenchmarkReport {
        backend: config.backend.to_string(),
        entries: config.entries,
        readers: config.readers,
        label: config.label.clone(),
        peak_memory_bytes: peak_memory_bytes(),
        store_footprint_bytes: store_footprint,
        disk_footprint_bytes: disk_footprint,
        write_secs: write_elapsed.as_secs_f64(),
        write_rate,
        read_secs: read_elapsed.as_secs_f64(),
        lookups,
        read_rate,
    };

    let store = Arc::try_unwrap(store).map_err(|_| BenchError::WorkerPanicked("reader"))?;
    store.close()?;
    // Only remove the directory when the harness picked it
    if config.backend.is_disk_backed() && !config.keep && config.path.is_none() {
        fs::delete(&store_dir)?;
    }

    if failures > 0 {
        return Err(BenchError::VerificationFailed { failures, lookups });
    }
    Ok(report)
}

#[allow(clippy::cast_precision_loss)]
fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}

fn write_phase(
    mut store: LongLongStore,
    config: &BenchConfig,
) -> Result<(LongLongStore, Duration), BenchError> {
    let entries = config.entries;
    let written = Arc::new(AtomicU64::new(0));
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let progress = Arc::clone(&written);
    let writer = thread::Builder::new()
        .name("writer".to_string())
        .spawn(move || -> Result<(LongLongStore, Duration), BenchError> {
            let start = Instant::now();
            for i in 0..entries {
                store.put(i + 1, i + 2)?;
                if i % WRITE_PROGRESS_EVERY == 0 {
                    progress.store(i, Ordering::Relaxed);
                }
            }
            store.seal()?;
            let elapsed = start.elapsed();
            drop(done_tx);
            Ok((store, elapsed))
        })
        .map_err(|e| BenchError::Store(e.into()))?;

    loop {
        match done_rx.recv_timeout(config.log_interval()) {
            Err(RecvTimeoutError::Timeout) => {
                let count = written.load(Ordering::Relaxed);
                #[allow(clippy::cast_precision_loss)]
                let percent = count as f64 * 100.0 / entries as f64;
                info!(
                    "[write] entries: {} ({:.0}%) peak memory: {}",
                    count,
                    percent,
                    format_storage(peak_memory_bytes())
                );
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    writer
        .join()
        .map_err(|_| BenchError::WorkerPanicked("writer"))?
}

fn read_phase(
    store: &Arc<LongLongStore>,
    config: &BenchConfig,
) -> Result<(u64, u64, Duration), BenchError> {
    let entries = config.entries;
    let lookups = Arc::new(AtomicU64::new(0));
    let failures = Arc::new(AtomicU64::new(0));
    let stop = Arc::new(AtomicBool::new(false));
    // Readers plus this thread, so the clock starts when everyone is ready
    let barrier = Arc::new(Barrier::new(config.readers + 1));

    let mut handles = Vec::with_capacity(config.readers);
    for reader in 0..config.readers {
        let store = Arc::clone(store);
        let lookups = Arc::clone(&lookups);
        let failures = Arc::clone(&failures);
        let stop = Arc::clone(&stop);
        let barrier = Arc::clone(&barrier);
        let handle = thread::Builder::new()
            .name(format!("reader-{reader}"))
            .spawn(move || {
                let mut rng = StdRng::seed_from_u64(reader as u64);
                barrier.wait();
                let mut local_lookups = 0u64;
                let mut local_failures = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    for _ in 0..READ_BATCH {
                        let key = rng.random_range(1..=entries);
                        match store.get(key) {
                            Ok(Some(value)) if value == key + 1 => {}
                            Ok(other) => {
                                if local_failures == 0 {
                                    warn!("Key {} returned {:?}, expected {}", key, other, key + 1);
                                }
                                local_failures += 1;
                            }
                            Err(e) => {
                                if local_failures == 0 {
                                    warn!("Lookup of key {} failed: {}", key, e);
                                }
                                local_failures += 1;
                            }
                        }
                    }
                    local_lookups += READ_BATCH;
                    lookups.fetch_add(READ_BATCH, Ordering::Relaxed);
                }
                failures.fetch_add(local_failures, Ordering::Relaxed);
                debug!("Reader {} finished after {} lookups", reader, local_lookups);
            })
            .map_err(|e| BenchError::Store(e.into()))?;
        handles.push(handle);
    }

    barrier.wait();
    let start = Instant::now();
    let deadline = start + config.duration();
    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(config.log_interval().min(deadline - now));
        info!(
            "[read] lookups: {} peak memory: {}",
            lookups.load(Ordering::Relaxed),
            format_storage(peak_memory_bytes())
        );
    }
    stop.store(true, Ordering::Relaxed);

    let mut panicked = false;
    for handle in handles {
        panicked |= handle.join().is_err();
    }
    let elapsed = start.elapsed();
    if panicked {
        return Err(BenchError::WorkerPanicked("reader"));
    }

    Ok((
        lookups.load(Ordering::Relaxed),
        failures.load(Ordering::Relaxed),
        elapsed,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_second() {
        assert!((per_second(100, Duration::from_secs(4)) - 25.0).abs() < f64::EPSILON);
        assert!(per_second(100, Duration::ZERO).abs() < f64::EPSILON);
    }
}

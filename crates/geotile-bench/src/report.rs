//! Benchmark results.

use crate::format::{format_rate, format_storage};
use serde::Serialize;
use std::fmt;

/// Results of one benchmark run.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    /// Backend name
    pub backend: String,
    /// Entries written
    pub entries: u64,
    /// Reader threads
    pub readers: usize,
    /// Label from the command line
    pub label: String,
    /// Peak resident memory of the process
    pub peak_memory_bytes: u64,
    /// Memory plus disk held by the store itself
    pub store_footprint_bytes: u64,
    /// Disk blocks allocated below the store directory
    pub disk_footprint_bytes: u64,
    /// Seconds spent writing, including seal
    pub write_secs: f64,
    /// Entries written per second
    pub write_rate: f64,
    /// Seconds in the read window
    pub read_secs: f64,
    /// Lookups performed by all readers
    pub lookups: u64,
    /// Lookups per second across all readers
    pub read_rate: f64,
}

impl fmt::Display for BenchmarkReport {
    /// One tab-separated line: backend, entries, readers, label, peak memory,
    /// store footprint, disk footprint, write rate, read rate.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.backend,
            self.entries,
            self.readers,
            self.label,
            format_storage(self.peak_memory_bytes),
            format_storage(self.store_footprint_bytes),
            format_storage(self.disk_footprint_bytes),
            format_rate(self.write_rate),
            format_rate(self.read_rate)
        )
    }
}

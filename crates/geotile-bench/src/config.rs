//! Benchmark configuration.
//!
//! Configuration comes from positional arguments, optional flags, and
//! `GEOTILE_BENCH_*` environment variables for every flag.
//!
//! # Example
//!
//! ```no_run
//! use geotile_bench::BenchConfig;
//!
//! // geotile-bench sparseMemory 10000000 4 baseline
//! let config = BenchConfig::from_args();
//! config.validate().expect("Invalid configuration");
//! println!("Benchmarking {} with {} entries", config.backend, config.entries);
//! ```

use crate::error::BenchError;
use clap::Parser;
use geotile_longmap::config::{DEFAULT_INDEX_INTERVAL, DEFAULT_PAGE_BITS, DEFAULT_SPILL_THRESHOLD};
use geotile_longmap::{BackendKind, StoreConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Benchmark configuration loaded from CLI args and environment variables.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "geotile-bench",
    about = "Write N sequential entries, then hammer the store with R concurrent readers",
    version
)]
pub struct BenchConfig {
    /// Backend: denseArray, sparseMemory, sparseMmap, sortedTable or hashTable
    pub backend: BackendKind,

    /// Number of entries to write
    pub entries: u64,

    /// Number of concurrent reader threads
    pub readers: usize,

    /// Free-form label echoed in the report line
    #[arg(default_value = "-")]
    pub label: String,

    /// Directory for disk-backed stores
    #[arg(long, env = "GEOTILE_BENCH_PATH")]
    pub path: Option<PathBuf>,

    /// Length of the read window in seconds
    #[arg(long, env = "GEOTILE_BENCH_DURATION_SECS", default_value_t = 30)]
    pub duration_secs: u64,

    /// Seconds between progress log lines
    #[arg(long, env = "GEOTILE_BENCH_LOG_INTERVAL_SECS", default_value_t = 10)]
    pub log_interval_secs: u64,

    /// Keys per page as a power of two (sparse backends)
    #[arg(long, env = "GEOTILE_BENCH_PAGE_BITS", default_value_t = DEFAULT_PAGE_BITS)]
    pub page_bits: u8,

    /// Buffered entries per spilled segment (sorted table)
    #[arg(long, env = "GEOTILE_BENCH_SPILL_THRESHOLD", default_value_t = DEFAULT_SPILL_THRESHOLD)]
    pub spill_threshold: usize,

    /// Records per sparse index block (sorted table)
    #[arg(long, env = "GEOTILE_BENCH_INDEX_INTERVAL", default_value_t = DEFAULT_INDEX_INTERVAL)]
    pub index_interval: usize,

    /// Keep the store on disk instead of deleting it afterwards
    #[arg(long, env = "GEOTILE_BENCH_KEEP")]
    pub keep: bool,

    /// Print the report as JSON instead of a tab-separated line
    #[arg(long, env = "GEOTILE_BENCH_JSON")]
    pub json: bool,
}

impl BenchConfig {
    /// Parse configuration from command-line arguments.
    #[must_use]
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Configuration for a programmatic run with default tuning.
    pub fn new(backend: BackendKind, entries: u64, readers: usize) -> Self {
        Self {
            backend,
            entries,
            readers,
            label: "-".to_string(),
            path: None,
            duration_secs: 30,
            log_interval_secs: 10,
            page_bits: DEFAULT_PAGE_BITS,
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
            index_interval: DEFAULT_INDEX_INTERVAL,
            keep: false,
            json: false,
        }
    }

    /// Read window.
    pub const fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    /// Progress log interval.
    pub const fn log_interval(&self) -> Duration {
        Duration::from_secs(self.log_interval_secs)
    }

    /// Directory the store lives in.
    ///
    /// Defaults to a per-backend directory under the system temp dir.
    pub fn store_dir(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            std::env::temp_dir().join(format!("geotile-bench-{}", self.backend.name()))
        })
    }

    /// Store configuration for the backend under test.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(self.backend)
            .with_path(self.store_dir())
            .with_temporary(!self.keep)
            .with_page_bits(self.page_bits)
            .with_mmap_max_key(self.entries.saturating_add(1))
            .with_spill_threshold(self.spill_threshold)
            .with_index_interval(self.index_interval)
    }

    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// Returns `BenchError::Config` if `entries`, `readers`, the read window
    /// or the log interval is zero, and `BenchError::Store` if the derived
    /// store configuration is invalid.
    pub fn validate(&self) -> Result<(), BenchError> {
        if self.entries == 0 {
            return Err(BenchError::Config("entries must be positive".to_string()));
        }
        if self.readers == 0 {
            return Err(BenchError::Config("readers must be positive".to_string()));
        }
        if self.duration_secs == 0 {
            return Err(BenchError::Config(
                "duration must be at least one second".to_string(),
            ));
        }
        if self.log_interval_secs == 0 {
            return Err(BenchError::Config(
                "log interval must be at least one second".to_string(),
            ));
        }
        self.store_config().validate()?;
        Ok(())
    }
}

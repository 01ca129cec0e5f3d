//! Error types for the benchmark harness.

use geotile_longmap::StoreError;
use thiserror::Error;

/// Benchmark failures.
#[derive(Debug, Error)]
pub enum BenchError {
    /// The store under test failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid benchmark configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Readers saw missing or wrong values
    #[error("{failures} of {lookups} lookups returned a wrong or missing value")]
    VerificationFailed {
        /// Lookups that did not return `key + 1`
        failures: u64,
        /// Total lookups performed
        lookups: u64,
    },

    /// A worker thread panicked
    #[error("{0} thread panicked")]
    WorkerPanicked(&'static str),
}

//! Benchmark harness for geotile long-value stores.
//!
//! Measures one backend under the access pattern of node coordinate lookup:
//! a single writer inserts `N` sequential keys, the store is sealed, then
//! `R` reader threads perform random lookups for a fixed window while every
//! answer is checked.
//!
//! # Example
//!
//! ```no_run
//! use geotile_bench::{BenchConfig, run};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = BenchConfig::from_args();
//!     config.validate()?;
//!
//!     let report = run(&config)?;
//!     println!("{report}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod error;
pub mod format;
pub mod harness;
pub mod memory;
pub mod report;

pub use config::BenchConfig;
pub use error::BenchError;
pub use harness::run;
pub use report::BenchmarkReport;

//! geotile-bench binary entry point.
//!
//! Thin wrapper around the geotile-bench library that:
//! 1. Initializes logging
//! 2. Parses and validates configuration
//! 3. Runs the benchmark and prints the report line
//!
//! Progress goes to stderr through `tracing`; only the report is written to
//! stdout.

use anyhow::{Context, Result};
use geotile_bench::{BenchConfig, run};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = BenchConfig::from_args();
    tracing::info!(
        "Configuration loaded: backend={}, entries={}, readers={}, path={:?}",
        config.backend,
        config.entries,
        config.readers,
        config.store_dir()
    );
    config.validate()?;

    let report = run(&config)
        .with_context(|| format!("benchmark of {} failed", config.backend))?;

    if config.json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!("{report}");
    }

    Ok(())
}

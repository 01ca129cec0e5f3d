//! Keyed long-value stores for node coordinate lookup.
//!
//! Tile generation needs to resolve tens of billions of node identifiers to
//! packed coordinates. This crate provides a single narrow contract,
//! [`LongLongMap`], and a family of backends that trade memory, disk and
//! latency differently:
//!
//! - **Dense array** (`denseArray`): direct-indexed, memory proportional to the
//!   largest key
//! - **Sparse memory** (`sparseMemory`): lazily allocated fixed-size pages
//! - **Sparse mmap** (`sparseMmap`): the same paging over a memory-mapped sparse
//!   file, letting the kernel page cache manage residency
//! - **Sorted table** (`sortedTable`): spill sorted segments, k-way merge on
//!   seal, sparse block index for lookups
//! - **Hash table** (`hashTable`): open addressing fallback
//!
//! # Lifecycle
//!
//! A store is written by one writer while `Building`, then sealed once, then
//! read concurrently by any number of threads. `put` takes `&mut self` and
//! `get` takes `&self`, so the single-writer discipline is enforced by the
//! borrow checker and a sealed store can be shared through an `Arc`.
//!
//! # Example
//!
//! ```rust
//! use geotile_longmap::{BackendKind, LongLongStore, StoreConfig};
//!
//! # fn example() -> geotile_longmap::Result<()> {
//! let config = StoreConfig::new(BackendKind::SparseMemory);
//! let mut store = LongLongStore::create(&config)?;
//! store.put(42, 7)?;
//! store.seal()?;
//! assert_eq!(store.get(42)?, Some(7));
//! assert_eq!(store.get(43)?, None);
//! store.close()?;
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use thiserror::Error;

mod bitset;

// Store contract and lifecycle
pub mod map;
pub mod store;

// Configuration
pub mod config;

// Backends
pub mod dense;
pub mod hash;
pub mod sorted;
pub mod sparse;

// Filesystem helpers for backing directories
pub mod fs;

pub use config::{BackendKind, StoreConfig};
pub use dense::DenseArrayMap;
pub use hash::HashTableMap;
pub use map::LongLongMap;
pub use sorted::SortedTableMap;
pub use sparse::{SparseMemoryMap, SparseMmapMap};
pub use store::{LongLongStore, StoreState};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while building or querying a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A key was written beyond the backend's fixed capacity.
    #[error("Capacity exceeded: key {key} does not fit in capacity {capacity}")]
    CapacityExceeded {
        /// Offending key
        key: u64,
        /// Number of keys the backend can hold (keys `0..capacity`)
        capacity: u64,
    },

    /// The backend only answers queries after `seal`.
    #[error("Store is not sealed")]
    NotSealed,

    /// A write arrived after the store was sealed.
    #[error("Store is sealed and no longer accepts writes")]
    Sealed,

    /// Backing data failed validation.
    #[error("Data corruption detected: {0}")]
    Corruption(String),

    /// Backend name not recognised.
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Version information for the store formats.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = StoreError::CapacityExceeded {
            key: 10,
            capacity: 8,
        };
        assert_eq!(
            err.to_string(),
            "Capacity exceeded: key 10 does not fit in capacity 8"
        );
        assert_eq!(StoreError::NotSealed.to_string(), "Store is not sealed");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: StoreError = io.into();
        assert!(matches!(err, StoreError::Io(_)));
    }
}

//! Store configuration and backend selection

use crate::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default page size exponent for the sparse backends (65,536 keys per page).
pub const DEFAULT_PAGE_BITS: u8 = 16;

/// Smallest accepted page size exponent.
pub const MIN_PAGE_BITS: u8 = 6;

/// Largest accepted page size exponent.
pub const MAX_PAGE_BITS: u8 = 24;

/// Default key capacity of the memory-mapped sparse file (2^34 keys).
///
/// Planet-scale node identifiers currently stay below this bound. The file is
/// sparse, so unused capacity costs address space but no disk blocks.
pub const DEFAULT_MMAP_MAX_KEY: u64 = 1 << 34;

/// Largest accepted key bound of the memory-mapped sparse file (2^40 keys).
///
/// The page file length and the in-memory page directory both grow with the
/// bound; past this they no longer fit a mapping or the heap.
pub const MAX_MMAP_MAX_KEY: u64 = 1 << 40;

/// Default exclusive key bound of a growable dense array (2^32 keys).
///
/// A write at or above the bound fails with `CapacityExceeded` instead of
/// attempting an allocation proportional to the key.
pub const DEFAULT_DENSE_MAX_KEY: u64 = 1 << 32;

/// Default number of buffered entries before the sorted table spills a segment.
pub const DEFAULT_SPILL_THRESHOLD: usize = 1 << 20;

/// Default number of records per sparse index block in the sorted table.
pub const DEFAULT_INDEX_INTERVAL: usize = 128;

/// Default initial slot count of the hash table.
pub const DEFAULT_HASH_CAPACITY: usize = 1 << 10;

/// Default load factor at which the hash table doubles.
pub const DEFAULT_HASH_LOAD_FACTOR: f64 = 0.75;

/// Storage backend selected by configuration name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackendKind {
    /// Direct-indexed array.
    DenseArray,
    /// Lazily allocated in-memory pages.
    SparseMemory,
    /// Lazily touched pages in a memory-mapped sparse file.
    SparseMmap,
    /// Spilled sorted segments merged into one indexed file.
    SortedTable,
    /// Open-addressing hash table.
    HashTable,
}

impl BackendKind {
    /// All backends, in configuration-name order.
    pub const ALL: [Self; 5] = [
        Self::DenseArray,
        Self::SparseMemory,
        Self::SparseMmap,
        Self::SortedTable,
        Self::HashTable,
    ];

    /// Configuration name of this backend.
    pub const fn name(self) -> &'static str {
        match self {
            Self::DenseArray => "denseArray",
            Self::SparseMemory => "sparseMemory",
            Self::SparseMmap => "sparseMmap",
            Self::SortedTable => "sortedTable",
            Self::HashTable => "hashTable",
        }
    }

    /// Whether the backend keeps its data in files under a directory.
    pub const fn is_disk_backed(self) -> bool {
        matches!(self, Self::SparseMmap | Self::SortedTable)
    }

    /// Whether `get` is only valid after `seal`.
    pub const fn requires_seal(self) -> bool {
        matches!(self, Self::SortedTable)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = StoreError;

    /// Accepts the configuration names plus the legacy benchmark aliases.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "denseArray" | "array" => Ok(Self::DenseArray),
            "sparseMemory" | "sparsearraymemory" | "sparsemem2" => Ok(Self::SparseMemory),
            "sparseMmap" | "sparsearray" | "sparse2" => Ok(Self::SparseMmap),
            "sortedTable" | "mapdb" => Ok(Self::SortedTable),
            "hashTable" | "hppc" => Ok(Self::HashTable),
            other => Err(StoreError::UnknownBackend(other.to_string())),
        }
    }
}

/// Configuration for a keyed long-value store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend implementation
    pub backend: BackendKind,

    /// Directory holding backing files (required for disk-backed backends)
    pub path: Option<PathBuf>,

    /// Delete backing files when the store is closed or dropped
    pub temporary: bool,

    /// Keys per page as a power of two (sparse backends)
    pub page_bits: u8,

    /// Declared key capacity of the dense array; grows on demand when unset
    pub dense_capacity: Option<u64>,

    /// Exclusive key bound of the dense array when it grows on demand
    pub dense_max_key: u64,

    /// Exclusive upper bound on keys for the memory-mapped sparse file
    pub mmap_max_key: u64,

    /// Buffered entries per sorted-table segment
    pub spill_threshold: usize,

    /// Records per sorted-table sparse index block
    pub index_interval: usize,

    /// Initial hash table slot count
    pub hash_capacity: usize,

    /// Hash table load factor triggering a resize
    pub hash_load_factor: f64,

    /// Verify checksums when reopening persisted stores
    pub verify_on_open: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::SparseMemory,
            path: None,
            temporary: true,
            page_bits: DEFAULT_PAGE_BITS,
            dense_capacity: None,
            dense_max_key: DEFAULT_DENSE_MAX_KEY,
            mmap_max_key: DEFAULT_MMAP_MAX_KEY,
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
            index_interval: DEFAULT_INDEX_INTERVAL,
            hash_capacity: DEFAULT_HASH_CAPACITY,
            hash_load_factor: DEFAULT_HASH_LOAD_FACTOR,
            verify_on_open: true,
        }
    }
}

impl StoreConfig {
    /// Create a new configuration for the specified backend
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            ..Default::default()
        }
    }

    /// Set the backing directory
    #[must_use]
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Keep or delete backing files on close
    #[must_use]
    pub const fn with_temporary(mut self, temporary: bool) -> Self {
        self.temporary = temporary;
        self
    }

    /// Set the sparse page size exponent
    #[must_use]
    pub const fn with_page_bits(mut self, page_bits: u8) -> Self {
        self.page_bits = page_bits;
        self
    }

    /// Declare a fixed dense array capacity
    #[must_use]
    pub const fn with_dense_capacity(mut self, capacity: u64) -> Self {
        self.dense_capacity = Some(capacity);
        self
    }

    /// Set the key bound of a growable dense array
    #[must_use]
    pub const fn with_dense_max_key(mut self, max_key: u64) -> Self {
        self.dense_max_key = max_key;
        self
    }

    /// Set the key bound of the memory-mapped sparse file
    #[must_use]
    pub const fn with_mmap_max_key(mut self, max_key: u64) -> Self {
        self.mmap_max_key = max_key;
        self
    }

    /// Set the sorted-table spill threshold (entries)
    #[must_use]
    pub const fn with_spill_threshold(mut self, entries: usize) -> Self {
        self.spill_threshold = entries;
        self
    }

    /// Set the sorted-table index sampling interval (records)
    #[must_use]
    pub const fn with_index_interval(mut self, records: usize) -> Self {
        self.index_interval = records;
        self
    }

    /// Set the initial hash table capacity
    #[must_use]
    pub const fn with_hash_capacity(mut self, slots: usize) -> Self {
        self.hash_capacity = slots;
        self
    }

    /// Verify checksums on reopen (on by default)
    #[must_use]
    pub const fn with_verify_on_open(mut self, verify: bool) -> Self {
        self.verify_on_open = verify;
        self
    }

    /// Backing directory, required by disk-backed backends.
    pub fn require_path(&self) -> Result<&Path> {
        self.path.as_deref().ok_or_else(|| {
            StoreError::Config(format!("backend {} requires a directory path", self.backend))
        })
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Config` if:
    /// - a disk-backed backend has no path
    /// - page bits are outside `MIN_PAGE_BITS..=MAX_PAGE_BITS`
    /// - the spill threshold or index interval is zero
    /// - the dense key bound is zero
    /// - `mmap_max_key` is outside `1..=MAX_MMAP_MAX_KEY`
    /// - the hash load factor is not in `(0, 1)`
    pub fn validate(&self) -> Result<()> {
        if self.backend.is_disk_backed() {
            self.require_path()?;
        }

        if !(MIN_PAGE_BITS..=MAX_PAGE_BITS).contains(&self.page_bits) {
            return Err(StoreError::Config(format!(
                "page_bits must be in {MIN_PAGE_BITS}..={MAX_PAGE_BITS}, got {}",
                self.page_bits
            )));
        }

        if self.dense_max_key == 0 {
            return Err(StoreError::Config(
                "dense_max_key must be positive".to_string(),
            ));
        }

        if !(1..=MAX_MMAP_MAX_KEY).contains(&self.mmap_max_key) {
            return Err(StoreError::Config(format!(
                "mmap_max_key must be in 1..={MAX_MMAP_MAX_KEY}, got {}",
                self.mmap_max_key
            )));
        }

        if self.spill_threshold == 0 {
            return Err(StoreError::Config(
                "spill_threshold must be positive".to_string(),
            ));
        }

        if self.index_interval == 0 {
            return Err(StoreError::Config(
                "index_interval must be positive".to_string(),
            ));
        }

        if !(self.hash_load_factor > 0.0 && self.hash_load_factor < 1.0) {
            return Err(StoreError::Config(format!(
                "hash_load_factor must be in (0, 1), got {}",
                self.hash_load_factor
            )));
        }

        Ok(())
    }
}

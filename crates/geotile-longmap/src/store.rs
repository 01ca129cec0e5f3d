//! Store owner and backend factory
//!
//! [`LongLongStore`] owns exactly one backend chosen by [`BackendKind`] and
//! tracks the `Building -> Sealed` lifecycle around it.

use crate::config::{BackendKind, StoreConfig};
use crate::dense::DenseArrayMap;
use crate::hash::HashTableMap;
use crate::map::LongLongMap;
use crate::sorted::SortedTableMap;
use crate::sparse::{SparseMemoryMap, SparseMmapMap};
use crate::{Result, StoreError, fs};
use tracing::{debug, info};

/// Lifecycle state of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// Accepting writes.
    Building,
    /// Read-only.
    Sealed,
}

/// A keyed `u64 -> u64` store.
pub struct LongLongStore {
    backend: Box<dyn LongLongMap>,
    state: StoreState,
    config: StoreConfig,
}

impl std::fmt::Debug for LongLongStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LongLongStore")
            .field("backend", &self.backend.kind())
            .field("state", &self.state)
            .field("len", &self.backend.len())
            .finish_non_exhaustive()
    }
}

impl LongLongStore {
    /// Create an empty store in the `Building` state.
    pub fn create(config: &StoreConfig) -> Result<Self> {
        config.validate()?;

        let backend: Box<dyn LongLongMap> = match config.backend {
            BackendKind::DenseArray => match config.dense_capacity {
                Some(capacity) => Box::new(DenseArrayMap::with_capacity(capacity)?),
                None => Box::new(DenseArrayMap::with_max_key(config.dense_max_key)),
            },
            BackendKind::SparseMemory => Box::new(SparseMemoryMap::new(config.page_bits)?),
            BackendKind::SparseMmap => Box::new(SparseMmapMap::create(
                config.require_path()?,
                config.page_bits,
                config.mmap_max_key,
                config.temporary,
            )?),
            BackendKind::SortedTable => Box::new(SortedTableMap::create(
                config.require_path()?,
                config.spill_threshold,
                config.index_interval,
                config.temporary,
            )?),
            BackendKind::HashTable => Box::new(HashTableMap::new(
                config.hash_capacity,
                config.hash_load_factor,
            )?),
        };

        info!("Created {} store", config.backend);
        Ok(Self {
            backend,
            state: StoreState::Building,
            config: config.clone(),
        })
    }

    /// Reopen a disk-backed store persisted by an earlier run.
    ///
    /// The store comes back `Sealed`. In-memory backends have nothing to
    /// reopen and fail with [`StoreError::Config`].
    ///
    /// `config.temporary` only applies to stores built by
    /// [`create`](Self::create): a reopened store keeps its files on close and
    /// drop, even with the default configuration. Remove the directory
    /// explicitly to discard it.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let dir = config.require_path()?;
        if !fs::exists(dir) {
            return Err(StoreError::Config(format!(
                "store directory {} does not exist",
                dir.display()
            )));
        }

        let backend: Box<dyn LongLongMap> = match config.backend {
            BackendKind::SparseMmap => Box::new(SparseMmapMap::open(dir, false)?),
            BackendKind::SortedTable => {
                Box::new(SortedTableMap::open(dir, config.verify_on_open, false)?)
            }
            other => {
                return Err(StoreError::Config(format!(
                    "backend {other} is not persistent and cannot be reopened"
                )));
            }
        };

        info!(
            "Reopened {} store at {} ({} entries)",
            config.backend,
            dir.display(),
            backend.len()
        );
        Ok(Self {
            backend,
            state: StoreState::Sealed,
            config: config.clone().with_temporary(false),
        })
    }

    /// Store `value` under `key`. Fails with [`StoreError::Sealed`] after
    /// [`seal`](Self::seal).
    #[inline]
    pub fn put(&mut self, key: u64, value: u64) -> Result<()> {
        if self.state == StoreState::Sealed {
            return Err(StoreError::Sealed);
        }
        self.backend.put(key, value)
    }

    /// Look up `key`.
    #[inline]
    pub fn get(&self, key: u64) -> Result<Option<u64>> {
        self.backend.get(key)
    }

    /// Finish the build phase. Idempotent.
    pub fn seal(&mut self) -> Result<()> {
        if self.state == StoreState::Sealed {
            return Ok(());
        }
        self.backend.seal()?;
        self.state = StoreState::Sealed;
        debug!(
            "Sealed {} store with {} entries",
            self.backend.kind(),
            self.backend.len()
        );
        Ok(())
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> StoreState {
        self.state
    }

    /// Backend in use.
    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Configuration the store was created or opened with.
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Number of distinct keys (an upper bound for an unsealed sorted table).
    pub fn len(&self) -> u64 {
        self.backend.len()
    }

    /// True when nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }

    /// Heap memory held by the backend.
    pub fn memory_usage(&self) -> u64 {
        self.backend.memory_usage()
    }

    /// Disk blocks allocated to backing files.
    pub fn disk_usage(&self) -> u64 {
        self.backend.disk_usage()
    }

    /// Release the store. Temporary backing files are deleted; a persistent
    /// store that was never sealed is sealed first.
    pub fn close(self) -> Result<()> {
        let kind = self.backend.kind();
        self.backend.close()?;
        debug!("Closed {} store", kind);
        Ok(())
    }
}

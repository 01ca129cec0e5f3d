//! Direct-indexed array backend
//!
//! `put(k, v)` writes slot `k`. Memory is proportional to the largest key,
//! not the number of keys stored, so this backend only suits key ranges that
//! fit in memory. A presence bitmap (1 bit per slot) keeps "never written"
//! distinct from every storable value.
//!
//! Without a declared capacity the array grows on demand up to a key bound
//! ([`DEFAULT_DENSE_MAX_KEY`] unless configured). Keys at or above the bound,
//! or growth the allocator refuses, fail with
//! [`StoreError::CapacityExceeded`].

use crate::bitset::Bitset;
use crate::config::{BackendKind, DEFAULT_DENSE_MAX_KEY};
use crate::map::LongLongMap;
use crate::{Result, StoreError};
use tracing::debug;

/// Dense array map.
#[derive(Debug)]
pub struct DenseArrayMap {
    values: Vec<u64>,
    present: Bitset,
    /// Fixed capacity, or `None` to grow to the observed maximum key.
    capacity: Option<u64>,
    /// Exclusive key bound while growing.
    max_key: u64,
    len: u64,
    sealed: bool,
}

impl DenseArrayMap {
    /// Create an array that grows to the largest key written, bounded by
    /// [`DEFAULT_DENSE_MAX_KEY`].
    pub fn new() -> Self {
        Self::with_max_key(DEFAULT_DENSE_MAX_KEY)
    }

    /// Create an array that grows on demand for keys below `max_key`.
    pub fn with_max_key(max_key: u64) -> Self {
        Self {
            values: Vec::new(),
            present: Bitset::default(),
            capacity: None,
            max_key,
            len: 0,
            sealed: false,
        }
    }

    /// Create an array holding keys `0..capacity`, allocated up front.
    ///
    /// Writing a key outside that range fails with
    /// [`StoreError::CapacityExceeded`].
    pub fn with_capacity(capacity: u64) -> Result<Self> {
        let slots = usize::try_from(capacity).map_err(|_| {
            StoreError::Config(format!("dense capacity {capacity} exceeds address space"))
        })?;
        debug!("Allocating dense array with {} slots", slots);
        Ok(Self {
            values: vec![0; slots],
            present: Bitset::with_len(slots),
            capacity: Some(capacity),
            max_key: capacity,
            len: 0,
            sealed: false,
        })
    }

    /// Number of slots currently allocated.
    pub fn slots(&self) -> usize {
        self.values.len()
    }

    fn slot_for_write(&mut self, key: u64) -> Result<usize> {
        if let Some(capacity) = self.capacity {
            if key >= capacity {
                return Err(StoreError::CapacityExceeded { key, capacity });
            }
            // Allocated in full by `with_capacity`.
            return Ok(key as usize);
        }

        let exceeded = StoreError::CapacityExceeded {
            key,
            capacity: self.max_key,
        };
        if key >= self.max_key {
            return Err(exceeded);
        }
        let Ok(slot) = usize::try_from(key) else {
            return Err(exceeded);
        };
        if slot >= self.values.len() {
            let bound = usize::try_from(self.max_key).unwrap_or(usize::MAX);
            let grown = self
                .values
                .len()
                .saturating_add(self.values.len() / 2)
                .max(slot + 1)
                .min(bound);
            debug!("Growing dense array from {} to {} slots", self.values.len(), grown);
            if self
                .values
                .try_reserve_exact(grown - self.values.len())
                .is_err()
            {
                return Err(exceeded);
            }
            self.values.resize(grown, 0);
            self.present.reserve_bits(grown);
        }
        Ok(slot)
    }
}

impl Default for DenseArrayMap {
    fn default() -> Self {
        Self::new()
    }
}

impl LongLongMap for DenseArrayMap {
    fn kind(&self) -> BackendKind {
        BackendKind::DenseArray
    }

    fn put(&mut self, key: u64, value: u64) -> Result<()> {
        if self.sealed {
            return Err(StoreError::Sealed);
        }
        let slot = self.slot_for_write(key)?;
        self.values[slot] = value;
        if self.present.insert(slot) {
            self.len += 1;
        }
        Ok(())
    }

    #[inline]
    fn get(&self, key: u64) -> Result<Option<u64>> {
        let Ok(slot) = usize::try_from(key) else {
            return Ok(None);
        };
        if self.present.contains(slot) {
            Ok(Some(self.values[slot]))
        } else {
            Ok(None)
        }
    }

    fn seal(&mut self) -> Result<()> {
        self.sealed = true;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn memory_usage(&self) -> u64 {
        (self.values.capacity() * std::mem::size_of::<u64>()) as u64 + self.present.heap_bytes()
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

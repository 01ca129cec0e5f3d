//! Open-addressing hash table backend
//!
//! Linear probing over parallel key/value arrays with a power-of-two slot
//! count. `EMPTY_KEY` marks a free slot; the key with that bit pattern is
//! stored in a dedicated side slot so every `u64` remains a valid key.
//! Inserting past the load factor doubles the table and rehashes.

use crate::config::{BackendKind, DEFAULT_HASH_LOAD_FACTOR};
use crate::map::LongLongMap;
use crate::{Result, StoreError};
use tracing::debug;

const EMPTY_KEY: u64 = u64::MAX;

const MIN_CAPACITY: usize = 16;

/// Finalizer from SplitMix64; spreads sequential keys over the table.
#[inline]
const fn mix(key: u64) -> u64 {
    let mut z = key.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Hash table map.
#[derive(Debug)]
pub struct HashTableMap {
    keys: Vec<u64>,
    values: Vec<u64>,
    mask: usize,
    /// Entries in `keys`, excluding the side slot.
    occupied: usize,
    resize_at: usize,
    load_factor: f64,
    /// Value for `EMPTY_KEY`, which cannot live in the table.
    empty_key_value: Option<u64>,
    sealed: bool,
}

impl HashTableMap {
    /// Create a table with at least `capacity` slots.
    pub fn new(capacity: usize, load_factor: f64) -> Result<Self> {
        if !(load_factor > 0.0 && load_factor < 1.0) {
            return Err(StoreError::Config(format!(
                "hash_load_factor must be in (0, 1), got {load_factor}"
            )));
        }
        let slots = capacity.max(MIN_CAPACITY).next_power_of_two();
        Ok(Self {
            keys: vec![EMPTY_KEY; slots],
            values: vec![0; slots],
            mask: slots - 1,
            occupied: 0,
            resize_at: Self::threshold(slots, load_factor),
            load_factor,
            empty_key_value: None,
            sealed: false,
        })
    }

    #[allow(clippy::cast_precision_loss)]
    fn threshold(slots: usize, load_factor: f64) -> usize {
        ((slots as f64 * load_factor) as usize).clamp(1, slots - 1)
    }

    /// Current slot count.
    pub fn slots(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    fn probe_start(&self, key: u64) -> usize {
        mix(key) as usize & self.mask
    }

    fn grow(&mut self) {
        let new_slots = self.keys.len() * 2;
        debug!(
            "Resizing hash table from {} to {} slots ({} entries)",
            self.keys.len(),
            new_slots,
            self.occupied
        );
        let old_keys = std::mem::replace(&mut self.keys, vec![EMPTY_KEY; new_slots]);
        let old_values = std::mem::replace(&mut self.values, vec![0; new_slots]);
        self.mask = new_slots - 1;
        self.resize_at = Self::threshold(new_slots, self.load_factor);

        for (key, value) in old_keys.into_iter().zip(old_values) {
            if key == EMPTY_KEY {
                continue;
            }
            let mut slot = self.probe_start(key);
            while self.keys[slot] != EMPTY_KEY {
                slot = (slot + 1) & self.mask;
            }
            self.keys[slot] = key;
            self.values[slot] = value;
        }
    }
}

impl Default for HashTableMap {
    fn default() -> Self {
        Self {
            keys: vec![EMPTY_KEY; MIN_CAPACITY],
            values: vec![0; MIN_CAPACITY],
            mask: MIN_CAPACITY - 1,
            occupied: 0,
            resize_at: Self::threshold(MIN_CAPACITY, DEFAULT_HASH_LOAD_FACTOR),
            load_factor: DEFAULT_HASH_LOAD_FACTOR,
            empty_key_value: None,
            sealed: false,
        }
    }
}

impl LongLongMap for HashTableMap {
    fn kind(&self) -> BackendKind {
        BackendKind::HashTable
    }

    fn put(&mut self, key: u64, value: u64) -> Result<()> {
        if self.sealed {
            return Err(StoreError::Sealed);
        }
        if key == EMPTY_KEY {
            self.empty_key_value = Some(value);
            return Ok(());
        }

        let mut slot = self.probe_start(key);
        loop {
            let existing = self.keys[slot];
            if existing == key {
                self.values[slot] = value;
                return Ok(());
            }
            if existing == EMPTY_KEY {
                break;
            }
            slot = (slot + 1) & self.mask;
        }

        self.keys[slot] = key;
        self.values[slot] = value;
        self.occupied += 1;
        if self.occupied > self.resize_at {
            self.grow();
        }
        Ok(())
    }

    #[inline]
    fn get(&self, key: u64) -> Result<Option<u64>> {
        if key == EMPTY_KEY {
            return Ok(self.empty_key_value);
        }

        // The load factor keeps at least one free slot, so probing terminates
        let mut slot = self.probe_start(key);
        loop {
            let existing = self.keys[slot];
            if existing == key {
                return Ok(Some(self.values[slot]));
            }
            if existing == EMPTY_KEY {
                return Ok(None);
            }
            slot = (slot + 1) & self.mask;
        }
    }

    fn seal(&mut self) -> Result<()> {
        self.sealed = true;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.occupied as u64 + u64::from(self.empty_key_value.is_some())
    }

    fn memory_usage(&self) -> u64 {
        ((self.keys.capacity() + self.values.capacity()) * std::mem::size_of::<u64>()) as u64
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[test]
    fn test_put_get_and_overwrite() {
        let mut map = HashTableMap::default();
        map.put(1, 10).unwrap();
        map.put(2, 20).unwrap();
        map.put(1, 11).unwrap();
        assert_eq!(map.get(1).unwrap(), Some(11));
        assert_eq!(map.get(2).unwrap(), Some(20));
        assert_eq!(map.get(3).unwrap(), None);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_sentinel_key_is_storable() {
        let mut map = HashTableMap::default();
        assert_eq!(map.get(u64::MAX).unwrap(), None);
        map.put(u64::MAX, 5).unwrap();
        map.put(0, 6).unwrap();
        assert_eq!(map.get(u64::MAX).unwrap(), Some(5));
        assert_eq!(map.get(0).unwrap(), Some(6));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_resizes_keep_entries() {
        let mut map = HashTableMap::new(16, 0.5).unwrap();
        for key in 0..10_000u64 {
            map.put(key * 3, key).unwrap();
        }
        assert!(map.slots() >= 20_000);
        for key in 0..10_000u64 {
            assert_eq!(map.get(key * 3).unwrap(), Some(key));
        }
        assert_eq!(map.get(1).unwrap(), None);
        assert_eq!(map.len(), 10_000);
    }

    #[test]
    fn test_put_after_seal_rejected() {
        let mut map = HashTableMap::default();
        map.put(7, 8).unwrap();
        map.seal().unwrap();
        assert!(matches!(map.put(9, 10), Err(StoreError::Sealed)));
        assert!(matches!(map.put(u64::MAX, 1), Err(StoreError::Sealed)));
        assert_eq!(map.get(7).unwrap(), Some(8));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_rejects_bad_load_factor() {
        assert!(HashTableMap::new(16, 1.5).is_err());
        assert!(HashTableMap::new(16, 0.0).is_err());
    }

    proptest! {
        #[test]
        fn matches_std_hashmap(ops in prop::collection::vec((any::<u64>(), any::<u64>()), 0..500)) {
            let mut map = HashTableMap::new(16, 0.75).unwrap();
            let mut model = HashMap::new();
            for (key, value) in &ops {
                map.put(*key, *value).unwrap();
                model.insert(*key, *value);
            }
            prop_assert_eq!(map.len(), model.len() as u64);
            for (key, value) in &model {
                prop_assert_eq!(map.get(*key).unwrap(), Some(*value));
            }
        }
    }
}

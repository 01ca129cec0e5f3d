//! Heap-allocated sparse pages

use super::PageLayout;
use crate::bitset::Bitset;
use crate::config::BackendKind;
use crate::map::LongLongMap;
use crate::{Result, StoreError};
use tracing::{debug, trace};

/// Upper bound on the page directory length, as a power of two.
///
/// Keys map to at most `2^(page_bits + MAX_DIRECTORY_BITS)` keys; beyond that
/// the directory alone would not fit in memory.
const MAX_DIRECTORY_BITS: u8 = 30;

/// One lazily allocated page: values plus presence bits.
#[derive(Debug)]
struct Page {
    values: Box<[u64]>,
    present: Bitset,
}

impl Page {
    fn new(layout: PageLayout) -> Self {
        Self {
            values: vec![0; layout.keys_per_page()].into_boxed_slice(),
            present: Bitset::with_len(layout.keys_per_page()),
        }
    }
}

/// In-memory sparse paged map.
///
/// The directory is a vector indexed by page number; unallocated pages are
/// `None`. Allocation happens inside `put`, which takes `&mut self`, so no
/// synchronization is needed: the single writer is the only one able to grow
/// the arena.
#[derive(Debug)]
pub struct SparseMemoryMap {
    layout: PageLayout,
    directory: Vec<Option<Box<Page>>>,
    allocated_pages: u64,
    len: u64,
    sealed: bool,
}

impl SparseMemoryMap {
    /// Create an empty map with `2^page_bits` keys per page.
    pub fn new(page_bits: u8) -> Result<Self> {
        Ok(Self {
            layout: PageLayout::new(page_bits)?,
            directory: Vec::new(),
            allocated_pages: 0,
            len: 0,
            sealed: false,
        })
    }

    /// Page geometry in use.
    pub const fn layout(&self) -> PageLayout {
        self.layout
    }

    /// Number of pages allocated so far.
    pub const fn allocated_pages(&self) -> u64 {
        self.allocated_pages
    }

    fn key_capacity(&self) -> u64 {
        1u64 << (self.layout.bits() + MAX_DIRECTORY_BITS)
    }

    fn page_mut(&mut self, key: u64) -> Result<&mut Page> {
        let capacity = self.key_capacity();
        if key >= capacity {
            return Err(StoreError::CapacityExceeded { key, capacity });
        }

        let index = self.layout.page_of(key) as usize;
        if index >= self.directory.len() {
            self.directory.resize_with(index + 1, || None);
        }

        let layout = self.layout;
        let slot = &mut self.directory[index];
        if slot.is_none() {
            trace!("Allocating page {}", index);
            self.allocated_pages += 1;
        }
        Ok(slot.get_or_insert_with(|| Box::new(Page::new(layout))))
    }
}

impl LongLongMap for SparseMemoryMap {
    fn kind(&self) -> BackendKind {
        BackendKind::SparseMemory
    }

    fn put(&mut self, key: u64, value: u64) -> Result<()> {
        if self.sealed {
            return Err(StoreError::Sealed);
        }
        let offset = self.layout.offset_of(key);
        let page = self.page_mut(key)?;
        page.values[offset] = value;
        if page.present.insert(offset) {
            self.len += 1;
        }
        Ok(())
    }

    #[inline]
    fn get(&self, key: u64) -> Result<Option<u64>> {
        let Ok(index) = usize::try_from(self.layout.page_of(key)) else {
            return Ok(None);
        };
        let Some(Some(page)) = self.directory.get(index) else {
            return Ok(None);
        };
        let offset = self.layout.offset_of(key);
        Ok(page.present.contains(offset).then(|| page.values[offset]))
    }

    fn seal(&mut self) -> Result<()> {
        if self.sealed {
            return Ok(());
        }
        self.sealed = true;
        debug!(
            "Sealed sparse memory map: {} entries in {} pages",
            self.len, self.allocated_pages
        );
        Ok(())
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn memory_usage(&self) -> u64 {
        let directory = (self.directory.capacity() * std::mem::size_of::<Option<Box<Page>>>()) as u64;
        let page = (self.layout.value_bytes() + self.layout.bitmap_bytes()) as u64;
        directory + self.allocated_pages * page
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

//! Sparse paged backends.
//!
//! The key space is split into fixed-size pages of `2^page_bits` keys:
//! `page = key >> page_bits`, `offset = key & page_mask`. A page is allocated
//! and zeroed the first time one of its keys is written, so memory (or disk)
//! follows the number of populated pages rather than the largest key.
//!
//! Two variants share the layout:
//! - [`SparseMemoryMap`]: pages are heap allocations
//! - [`SparseMmapMap`]: pages are regions of a pre-sized sparse file mapped
//!   into the address space
//!
//! Each page carries its own presence bitmap so that a stored zero is not
//! mistaken for an absent key.

pub mod memory;
pub mod mmap;

pub use memory::SparseMemoryMap;
pub use mmap::SparseMmapMap;

use crate::config::{MAX_PAGE_BITS, MIN_PAGE_BITS};
use crate::{Result, StoreError};

/// Page geometry shared by both sparse variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    bits: u8,
}

impl PageLayout {
    /// Create a layout with `2^bits` keys per page.
    pub fn new(bits: u8) -> Result<Self> {
        if !(MIN_PAGE_BITS..=MAX_PAGE_BITS).contains(&bits) {
            return Err(StoreError::Config(format!(
                "page_bits must be in {MIN_PAGE_BITS}..={MAX_PAGE_BITS}, got {bits}"
            )));
        }
        Ok(Self { bits })
    }

    /// Page size exponent.
    pub const fn bits(self) -> u8 {
        self.bits
    }

    /// Keys per page.
    pub const fn keys_per_page(self) -> usize {
        1 << self.bits
    }

    /// Page holding `key`.
    #[inline]
    pub const fn page_of(self, key: u64) -> u64 {
        key >> self.bits
    }

    /// Position of `key` within its page.
    #[inline]
    pub const fn offset_of(self, key: u64) -> usize {
        (key & ((1 << self.bits) - 1)) as usize
    }

    /// Bytes of presence bitmap per page (whole `u64` words).
    pub const fn bitmap_bytes(self) -> usize {
        self.keys_per_page().div_ceil(64) * 8
    }

    /// Bytes of values per page.
    pub const fn value_bytes(self) -> usize {
        self.keys_per_page() * 8
    }
}

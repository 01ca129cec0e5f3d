//! Memory-mapped sparse page file
//!
//! The backing file is sized up front to hold every page a key below
//! `max_key` could need, then mapped shared. Filesystems with sparse-file
//! support only allocate blocks for pages that are actually written, and the
//! kernel page cache decides what stays resident, so the data set can exceed
//! physical memory.
//!
//! File layout:
//! ```text
//! [0x0000] SparseFileHeader (padded to HEADER_REGION)
//! [0x1000] Page directory bitmap (1 bit per page, padded to 4 KiB)
//! [....]   Page 0: presence bitmap, then values (padded to 4 KiB)
//! [....]   Page 1 ...
//! ```
//!
//! The directory and header are only written on seal. A file whose header is
//! not marked sealed, whose length disagrees with the header, or whose
//! directory checksum does not match is refused on reopen.

use super::PageLayout;
use crate::bitset::Bitset;
use crate::config::{BackendKind, MAX_MMAP_MAX_KEY};
use crate::fs;
use crate::map::LongLongMap;
use crate::{Result, StoreError};
use binrw::{BinRead, BinWrite};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the page file inside the store directory.
pub const PAGE_FILE_NAME: &str = "sparse.pages";

/// Current page file format version.
pub const PAGE_FILE_VERSION: u16 = 1;

/// Bytes reserved for the header at the start of the file.
pub const HEADER_REGION: u64 = 0x1000;

/// Alignment of the directory region and of every page.
const REGION_ALIGNMENT: u64 = 0x1000;

const fn align_up(value: u64) -> Option<u64> {
    match value.checked_add(REGION_ALIGNMENT - 1) {
        Some(padded) => Some(padded & !(REGION_ALIGNMENT - 1)),
        None => None,
    }
}

/// Page file header.
///
/// | Offset | Size | Field |
/// |--------|------|-------|
/// | 0x00   | 4    | Magic `GTSP` |
/// | 0x04   | 2    | Version |
/// | 0x06   | 1    | Page bits |
/// | 0x07   | 1    | Sealed flag |
/// | 0x08   | 8    | Page capacity |
/// | 0x10   | 8    | Expected file length |
/// | 0x18   | 8    | Allocated pages |
/// | 0x20   | 8    | Entry count |
/// | 0x28   | 16   | MD5 of the directory region |
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = b"GTSP")]
pub struct SparseFileHeader {
    /// Format version
    pub version: u16,
    /// Keys per page as a power of two
    pub page_bits: u8,
    /// 1 once the directory has been written by `seal`
    pub sealed: u8,
    /// Number of page slots in the file
    pub max_pages: u64,
    /// Total file length
    pub file_len: u64,
    /// Pages marked in the directory
    pub allocated_pages: u64,
    /// Distinct keys stored
    pub entries: u64,
    /// MD5 of the serialized directory words
    pub directory_hash: [u8; 16],
}

/// Byte geometry of a page file.
#[derive(Debug, Clone, Copy)]
struct FileGeometry {
    layout: PageLayout,
    max_pages: u64,
    directory_bytes: u64,
    page_bytes: u64,
    file_len: u64,
}

impl FileGeometry {
    /// `None` when the file length would not fit in a `u64`.
    fn new(layout: PageLayout, max_pages: u64) -> Option<Self> {
        let directory_bytes = align_up(max_pages.div_ceil(64).checked_mul(8)?)?;
        let page_bytes = align_up((layout.bitmap_bytes() + layout.value_bytes()) as u64)?;
        let file_len = max_pages
            .checked_mul(page_bytes)?
            .checked_add(directory_bytes)?
            .checked_add(HEADER_REGION)?;
        Some(Self {
            layout,
            max_pages,
            directory_bytes,
            page_bytes,
            file_len,
        })
    }

    const fn file_len(&self) -> u64 {
        self.file_len
    }

    const fn page_start(&self, page: u64) -> usize {
        (HEADER_REGION + self.directory_bytes + page * self.page_bytes) as usize
    }

    /// Byte offsets of the presence byte and value slot for `key`.
    #[inline]
    const fn locate(&self, key: u64) -> (usize, u8, usize) {
        let start = self.page_start(self.layout.page_of(key));
        let offset = self.layout.offset_of(key);
        let bitmap_byte = start + (offset >> 3);
        let bit = 1u8 << (offset & 7);
        let value = start + self.layout.bitmap_bytes() + offset * 8;
        (bitmap_byte, bit, value)
    }
}

/// Sparse paged map over a memory-mapped file.
pub struct SparseMmapMap {
    path: PathBuf,
    geometry: FileGeometry,
    mmap: MmapMut,
    directory: Bitset,
    allocated_pages: u64,
    len: u64,
    sealed: bool,
    temporary: bool,
    closed: bool,
}

impl std::fmt::Debug for SparseMmapMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparseMmapMap")
            .field("path", &self.path)
            .field("max_pages", &self.geometry.max_pages)
            .field("allocated_pages", &self.allocated_pages)
            .field("len", &self.len)
            .field("sealed", &self.sealed)
            .finish_non_exhaustive()
    }
}

impl SparseMmapMap {
    /// Create a new page file in `dir` able to hold keys `0..max_key`.
    ///
    /// Any existing page file in `dir` is replaced.
    pub fn create(dir: &Path, page_bits: u8, max_key: u64, temporary: bool) -> Result<Self> {
        let layout = PageLayout::new(page_bits)?;
        if !(1..=MAX_MMAP_MAX_KEY).contains(&max_key) {
            return Err(StoreError::Config(format!(
                "mmap_max_key must be in 1..={MAX_MMAP_MAX_KEY}, got {max_key}"
            )));
        }
        let geometry = FileGeometry::new(layout, max_key.div_ceil(layout.keys_per_page() as u64))
            .ok_or_else(|| {
                StoreError::Config(format!("page file for {max_key} keys is too large"))
            })?;
        let file_len = geometry.file_len();

        fs::create_dir(dir)?;
        let path = dir.join(PAGE_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        // Extends without writing, leaving a hole on sparse-capable filesystems
        file.set_len(file_len)?;

        let mmap = Self::map(&file)?;
        info!(
            "Created sparse page file {} ({} page slots, {} bytes addressable)",
            path.display(),
            geometry.max_pages,
            file_len
        );

        Ok(Self {
            path,
            geometry,
            mmap,
            directory: Bitset::with_len(geometry.max_pages as usize),
            allocated_pages: 0,
            len: 0,
            sealed: false,
            temporary,
            closed: false,
        })
    }

    /// Reopen a sealed page file from `dir`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Corruption` if the header is unreadable, the file
    /// was never sealed, the length disagrees with the header, or the
    /// directory checksum does not match.
    pub fn open(dir: &Path, temporary: bool) -> Result<Self> {
        let path = dir.join(PAGE_FILE_NAME);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let actual_len = file.metadata()?.len();
        if actual_len < HEADER_REGION {
            return Err(StoreError::Corruption(format!(
                "{} is truncated: {actual_len} bytes",
                path.display()
            )));
        }

        let mmap = Self::map(&file)?;
        let header = SparseFileHeader::read_le(&mut Cursor::new(&mmap[..HEADER_REGION as usize]))
            .map_err(|e| {
                StoreError::Corruption(format!("{}: invalid header: {e}", path.display()))
            })?;

        if header.version != PAGE_FILE_VERSION {
            return Err(StoreError::Corruption(format!(
                "unsupported page file version {}",
                header.version
            )));
        }
        if header.sealed != 1 {
            return Err(StoreError::Corruption(format!(
                "{} was not sealed before close",
                path.display()
            )));
        }

        let layout = PageLayout::new(header.page_bits)
            .map_err(|e| StoreError::Corruption(format!("invalid page bits in header: {e}")))?;
        let geometry = FileGeometry::new(layout, header.max_pages).ok_or_else(|| {
            StoreError::Corruption(format!(
                "{}: page capacity {} in header is out of range",
                path.display(),
                header.max_pages
            ))
        })?;
        if geometry.file_len() != header.file_len || actual_len != header.file_len {
            return Err(StoreError::Corruption(format!(
                "{} length {actual_len} does not match expected {}",
                path.display(),
                header.file_len
            )));
        }

        let directory_region =
            &mmap[HEADER_REGION as usize..(HEADER_REGION + geometry.directory_bytes) as usize];
        let digest = md5::compute(directory_region);
        if digest.0 != header.directory_hash {
            return Err(StoreError::Corruption(format!(
                "{} directory checksum mismatch: expected {}, found {}",
                path.display(),
                hex::encode(header.directory_hash),
                hex::encode(digest.0)
            )));
        }

        let words = directory_region
            .chunks_exact(8)
            .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap_or_default()))
            .collect();
        let directory = Bitset::from_words(words);
        if directory.count_ones() != header.allocated_pages {
            return Err(StoreError::Corruption(format!(
                "{} directory marks {} pages, header records {}",
                path.display(),
                directory.count_ones(),
                header.allocated_pages
            )));
        }

        debug!(
            "Reopened sparse page file {} with {} entries in {} pages",
            path.display(),
            header.entries,
            header.allocated_pages
        );

        Ok(Self {
            path,
            geometry,
            mmap,
            directory,
            allocated_pages: header.allocated_pages,
            len: header.entries,
            sealed: true,
            temporary,
            closed: false,
        })
    }

    fn map(file: &File) -> Result<MmapMut> {
        // The file is owned by this store for its whole lifetime; nothing
        // else truncates it while mapped.
        #[allow(unsafe_code)]
        let mmap = unsafe { MmapOptions::new().map_mut(file)? };
        Ok(mmap)
    }

    /// Path of the backing page file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of pages written so far.
    pub const fn allocated_pages(&self) -> u64 {
        self.allocated_pages
    }

    /// Exclusive key bound of the file.
    pub fn key_capacity(&self) -> u64 {
        self.geometry.max_pages * self.geometry.layout.keys_per_page() as u64
    }

    fn write_directory_and_header(&mut self) -> Result<()> {
        let start = HEADER_REGION as usize;
        let end = (HEADER_REGION + self.geometry.directory_bytes) as usize;
        let region = &mut self.mmap[start..end];
        region.fill(0);
        for (chunk, word) in region.chunks_exact_mut(8).zip(self.directory.words()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        let directory_hash = md5::compute(&self.mmap[start..end]).0;

        let header = SparseFileHeader {
            version: PAGE_FILE_VERSION,
            page_bits: self.geometry.layout.bits(),
            sealed: 1,
            max_pages: self.geometry.max_pages,
            file_len: self.geometry.file_len(),
            allocated_pages: self.allocated_pages,
            entries: self.len,
            directory_hash,
        };
        let mut cursor = Cursor::new(&mut self.mmap[..HEADER_REGION as usize]);
        header
            .write_le(&mut cursor)
            .map_err(|e| StoreError::Corruption(format!("Failed to serialize header: {e}")))?;
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.temporary {
            debug!("Deleting temporary page file {}", self.path.display());
            fs::delete(&self.path)?;
        } else {
            self.mmap.flush()?;
        }
        Ok(())
    }
}

impl LongLongMap for SparseMmapMap {
    fn kind(&self) -> BackendKind {
        BackendKind::SparseMmap
    }

    fn put(&mut self, key: u64, value: u64) -> Result<()> {
        if self.sealed {
            return Err(StoreError::Sealed);
        }
        let capacity = self.key_capacity();
        if key >= capacity {
            return Err(StoreError::CapacityExceeded { key, capacity });
        }

        let page = self.geometry.layout.page_of(key) as usize;
        if self.directory.insert(page) {
            // Fresh file regions read as zero, so the page needs no clearing
            self.allocated_pages += 1;
        }

        let (bitmap_byte, bit, value_at) = self.geometry.locate(key);
        self.mmap[value_at..value_at + 8].copy_from_slice(&value.to_le_bytes());
        if self.mmap[bitmap_byte] & bit == 0 {
            self.mmap[bitmap_byte] |= bit;
            self.len += 1;
        }
        Ok(())
    }

    #[inline]
    fn get(&self, key: u64) -> Result<Option<u64>> {
        let page = self.geometry.layout.page_of(key);
        if page >= self.geometry.max_pages || !self.directory.contains(page as usize) {
            return Ok(None);
        }

        let (bitmap_byte, bit, value_at) = self.geometry.locate(key);
        if self.mmap[bitmap_byte] & bit == 0 {
            return Ok(None);
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.mmap[value_at..value_at + 8]);
        Ok(Some(u64::from_le_bytes(bytes)))
    }

    fn seal(&mut self) -> Result<()> {
        if self.sealed {
            return Ok(());
        }
        self.write_directory_and_header()?;
        self.mmap.flush()?;
        self.sealed = true;
        info!(
            "Sealed sparse page file {}: {} entries in {} pages",
            self.path.display(),
            self.len,
            self.allocated_pages
        );
        Ok(())
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn memory_usage(&self) -> u64 {
        self.directory.heap_bytes()
    }

    fn disk_usage(&self) -> u64 {
        fs::allocated_size(&self.path)
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        if !self.temporary && !self.sealed {
            self.seal()?;
        }
        self.cleanup()
    }
}

impl Drop for SparseMmapMap {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            warn!("Failed to clean up {}: {}", self.path.display(), e);
        }
    }
}

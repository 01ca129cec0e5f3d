//! Sealed sorted table file.
//!
//! File layout:
//! ```text
//! [0]             N records x 16 bytes, strictly increasing keys
//! [N*16]          M sparse index entries x 16 bytes: (first key, offset)
//! [N*16 + M*16]   TableFooter (52 bytes)
//! ```
//!
//! One index entry is sampled every `index_interval` records. A lookup
//! binary-searches the index for the block that may hold the key, then
//! binary-searches the block directly in the memory map using fixed-width
//! offset arithmetic.
//!
//! The file is written to a `.tmp` sibling, synced, and renamed into place,
//! so a visible table file is always complete.

use super::segment::{RECORD_SIZE, decode_record, encode_record};
use crate::{Result, StoreError};
use binrw::{BinRead, BinWrite};
use memmap2::{Mmap, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the sealed table file inside the store directory.
pub const TABLE_FILE_NAME: &str = "table.sorted";

/// Current table format version.
pub const TABLE_VERSION: u16 = 1;

/// Serialized footer size.
pub const FOOTER_SIZE: usize = 52;

const INDEX_ENTRY_SIZE: usize = 16;

/// Table footer, stored at the end of the file.
///
/// | Offset | Size | Field |
/// |--------|------|-------|
/// | 0x00   | 4    | Magic `GTST` |
/// | 0x04   | 2    | Version |
/// | 0x06   | 2    | Reserved |
/// | 0x08   | 4    | Index interval (records per block) |
/// | 0x0C   | 8    | Record count |
/// | 0x14   | 8    | Index offset |
/// | 0x1C   | 8    | Index entry count |
/// | 0x24   | 16   | MD5 of records and index |
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = b"GTST")]
pub struct TableFooter {
    /// Format version
    pub version: u16,
    /// Reserved, zero
    pub reserved: u16,
    /// Records per sparse index block
    pub index_interval: u32,
    /// Number of records
    pub entries: u64,
    /// Byte offset of the sparse index
    pub index_offset: u64,
    /// Number of sparse index entries
    pub index_entries: u64,
    /// MD5 of everything before the footer
    pub checksum: [u8; 16],
}

/// Sparse index entry: first key of a block and the block's byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockIndexEntry {
    /// Smallest key in the block
    pub first_key: u64,
    /// Byte offset of the block's first record
    pub offset: u64,
}

/// Streaming writer for a new table file.
pub struct TableWriter {
    final_path: PathBuf,
    temp_path: PathBuf,
    writer: BufWriter<File>,
    interval: usize,
    entries: u64,
    last_key: Option<u64>,
    index: Vec<BlockIndexEntry>,
}

impl TableWriter {
    /// Start writing `dir/TABLE_FILE_NAME`.
    pub fn create(dir: &Path, interval: usize) -> Result<Self> {
        if interval == 0 || u32::try_from(interval).is_err() {
            return Err(StoreError::Config(format!(
                "index_interval must be in 1..=u32::MAX, got {interval}"
            )));
        }
        let final_path = dir.join(TABLE_FILE_NAME);
        let temp_path = final_path.with_extension("tmp");
        let file = File::create(&temp_path)?;
        Ok(Self {
            final_path,
            temp_path,
            writer: BufWriter::with_capacity(256 * 1024, file),
            interval,
            entries: 0,
            last_key: None,
            index: Vec::new(),
        })
    }

    /// Append a record. Keys must be strictly increasing.
    pub fn push(&mut self, key: u64, value: u64) -> Result<()> {
        if self.last_key.is_some_and(|last| key <= last) {
            return Err(StoreError::Corruption(format!(
                "merged keys out of order: {key} after {:?}",
                self.last_key
            )));
        }
        if self.entries % self.interval as u64 == 0 {
            self.index.push(BlockIndexEntry {
                first_key: key,
                offset: self.entries * RECORD_SIZE as u64,
            });
        }
        self.writer.write_all(&encode_record(key, value))?;
        self.entries += 1;
        self.last_key = Some(key);
        Ok(())
    }

    /// Write the index and footer, sync, rename into place and open the
    /// finished table.
    pub fn finish(mut self) -> Result<SortedTable> {
        for entry in &self.index {
            self.writer.write_all(&entry.first_key.to_le_bytes())?;
            self.writer.write_all(&entry.offset.to_le_bytes())?;
        }
        let file = self
            .writer
            .into_inner()
            .map_err(|e| StoreError::Io(e.into_error()))?;
        file.sync_all()?;

        // Checksum what was just written through a read-only map
        let body_len = file.metadata()?.len();
        let checksum = if body_len == 0 {
            md5::compute(b"").0
        } else {
            let body = File::open(&self.temp_path)?;
            #[allow(unsafe_code)]
            let map = unsafe { MmapOptions::new().map(&body)? };
            md5::compute(&map[..]).0
        };

        let footer = TableFooter {
            version: TABLE_VERSION,
            reserved: 0,
            index_interval: self.interval as u32,
            entries: self.entries,
            index_offset: self.entries * RECORD_SIZE as u64,
            index_entries: self.index.len() as u64,
            checksum,
        };
        let mut footer_bytes = Vec::with_capacity(FOOTER_SIZE);
        footer
            .write_le(&mut Cursor::new(&mut footer_bytes))
            .map_err(|e| StoreError::Corruption(format!("Failed to serialize footer: {e}")))?;

        let mut file = OpenOptions::new().append(true).open(&self.temp_path)?;
        file.write_all(&footer_bytes)?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&self.temp_path, &self.final_path)?;
        info!(
            "Wrote sorted table {} ({} records, {} index blocks, md5 {})",
            self.final_path.display(),
            self.entries,
            self.index.len(),
            hex::encode(checksum)
        );

        SortedTable::map_file(&self.final_path, footer, self.index)
    }
}

/// Read-only sealed table.
pub struct SortedTable {
    path: PathBuf,
    mmap: Mmap,
    entries: u64,
    interval: usize,
    index: Vec<BlockIndexEntry>,
}

impl std::fmt::Debug for SortedTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortedTable")
            .field("path", &self.path)
            .field("entries", &self.entries)
            .field("interval", &self.interval)
            .field("index_blocks", &self.index.len())
            .finish_non_exhaustive()
    }
}

impl SortedTable {
    /// Open an existing table, validating its footer, layout and sparse
    /// index. Each index entry must point at the start of its block and carry
    /// that record's key, with keys strictly increasing.
    ///
    /// With `verify` set the MD5 checksum over records and index is checked
    /// as well, which reads the whole file.
    pub fn open(path: &Path, verify: bool) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < FOOTER_SIZE as u64 {
            return Err(StoreError::Corruption(format!(
                "{} is truncated: {file_len} bytes",
                path.display()
            )));
        }

        #[allow(unsafe_code)]
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        let footer_start = mmap.len() - FOOTER_SIZE;
        let footer = TableFooter::read_le(&mut Cursor::new(&mmap[footer_start..]))
            .map_err(|e| StoreError::Corruption(format!("{}: invalid footer: {e}", path.display())))?;

        if footer.version != TABLE_VERSION {
            return Err(StoreError::Corruption(format!(
                "unsupported table version {}",
                footer.version
            )));
        }
        let interval = footer.index_interval as usize;
        let expected_index = if interval == 0 {
            None
        } else {
            Some(footer.entries.div_ceil(interval as u64))
        };
        let expected_len = footer
            .entries
            .checked_mul(RECORD_SIZE as u64)
            .and_then(|records| {
                footer
                    .index_entries
                    .checked_mul(INDEX_ENTRY_SIZE as u64)
                    .and_then(|index| records.checked_add(index))
            })
            .and_then(|body| body.checked_add(FOOTER_SIZE as u64));
        if expected_index != Some(footer.index_entries)
            || footer.entries.checked_mul(RECORD_SIZE as u64) != Some(footer.index_offset)
            || expected_len != Some(file_len)
        {
            return Err(StoreError::Corruption(format!(
                "{} layout mismatch: {} bytes for {} records and {} index entries",
                path.display(),
                file_len,
                footer.entries,
                footer.index_entries
            )));
        }

        if verify {
            let digest = md5::compute(&mmap[..footer_start]);
            if digest.0 != footer.checksum {
                return Err(StoreError::Corruption(format!(
                    "{} checksum mismatch: expected {}, found {}",
                    path.display(),
                    hex::encode(footer.checksum),
                    hex::encode(digest.0)
                )));
            }
        }

        let index: Vec<BlockIndexEntry> = mmap[footer.index_offset as usize..footer_start]
            .chunks_exact(INDEX_ENTRY_SIZE)
            .map(|chunk| {
                let mut buf = [0u8; RECORD_SIZE];
                buf.copy_from_slice(chunk);
                let (first_key, offset) = decode_record(&buf);
                BlockIndexEntry { first_key, offset }
            })
            .collect();
        check_index(
            path,
            &mmap[..footer.index_offset as usize],
            &index,
            interval,
        )?;

        debug!(
            "Opened sorted table {} with {} records",
            path.display(),
            footer.entries
        );

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            entries: footer.entries,
            interval,
            index,
        })
    }

    fn map_file(path: &Path, footer: TableFooter, index: Vec<BlockIndexEntry>) -> Result<Self> {
        let file = File::open(path)?;
        #[allow(unsafe_code)]
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            entries: footer.entries,
            interval: footer.index_interval as usize,
            index,
        })
    }

    /// Path of the table file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records.
    pub const fn entries(&self) -> u64 {
        self.entries
    }

    /// Records per index block.
    pub const fn interval(&self) -> usize {
        self.interval
    }

    /// Sparse index entries, one per block.
    pub fn index(&self) -> &[BlockIndexEntry] {
        &self.index
    }

    /// Heap memory held by the sparse index.
    pub fn memory_usage(&self) -> u64 {
        (self.index.capacity() * std::mem::size_of::<BlockIndexEntry>()) as u64
    }

    #[inline]
    fn key_at(&self, record: usize) -> u64 {
        let at = record * RECORD_SIZE;
        let mut key = [0u8; 8];
        key.copy_from_slice(&self.mmap[at..at + 8]);
        u64::from_le_bytes(key)
    }

    #[inline]
    fn record_at(&self, record: usize) -> (u64, u64) {
        let at = record * RECORD_SIZE;
        let mut buf = [0u8; RECORD_SIZE];
        buf.copy_from_slice(&self.mmap[at..at + RECORD_SIZE]);
        decode_record(&buf)
    }

    /// Look up `key`.
    pub fn get(&self, key: u64) -> Option<u64> {
        let block = self.index.partition_point(|entry| entry.first_key <= key);
        if block == 0 {
            return None;
        }
        let start = (self.index[block - 1].offset / RECORD_SIZE as u64) as usize;
        let end = (start + self.interval).min(self.entries as usize);

        let (mut low, mut high) = (start, end);
        while low < high {
            let mid = low + (high - low) / 2;
            let found = self.key_at(mid);
            match found.cmp(&key) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => return Some(self.record_at(mid).1),
            }
        }
        None
    }

    /// All records in key order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        (0..self.entries as usize).map(|record| self.record_at(record))
    }
}

fn check_index(
    path: &Path,
    records: &[u8],
    index: &[BlockIndexEntry],
    interval: usize,
) -> Result<()> {
    let block_bytes = interval as u64 * RECORD_SIZE as u64;
    let mut previous: Option<u64> = None;
    for (block, entry) in index.iter().enumerate() {
        let stored_key = usize::try_from(entry.offset)
            .ok()
            .filter(|_| entry.offset == block as u64 * block_bytes)
            .and_then(|at| records.get(at..at + 8))
            .map(|bytes| {
                let mut key = [0u8; 8];
                key.copy_from_slice(bytes);
                u64::from_le_bytes(key)
            });
        if stored_key != Some(entry.first_key)
            || previous.is_some_and(|last| entry.first_key <= last)
        {
            return Err(StoreError::Corruption(format!(
                "{} index entry {block} (key {}, offset {}) does not match the records",
                path.display(),
                entry.first_key,
                entry.offset
            )));
        }
        previous = Some(entry.first_key);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn build(dir: &Path, keys: impl IntoIterator<Item = u64>, interval: usize) -> SortedTable {
        let mut writer = TableWriter::create(dir, interval).unwrap();
        for key in keys {
            writer.push(key, key * 10).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn test_footer_size() {
        let footer = TableFooter {
            version: TABLE_VERSION,
            reserved: 0,
            index_interval: 128,
            entries: 1,
            index_offset: 16,
            index_entries: 1,
            checksum: [0; 16],
        };
        let mut bytes = Vec::new();
        footer.write_le(&mut Cursor::new(&mut bytes)).unwrap();
        assert_eq!(bytes.len(), FOOTER_SIZE);
        assert_eq!(&bytes[..4], b"GTST");
    }

    #[test]
    fn test_lookup_across_blocks() {
        let dir = TempDir::new().unwrap();
        let table = build(dir.path(), (0..1000).map(|k| k * 2 + 1), 7);
        assert_eq!(table.entries(), 1000);
        assert_eq!(table.index().len(), 1000usize.div_ceil(7));

        for k in 0..1000u64 {
            let key = k * 2 + 1;
            assert_eq!(table.get(key), Some(key * 10));
            assert_eq!(table.get(key + 1), None);
        }
        assert_eq!(table.get(0), None);
        assert_eq!(table.get(u64::MAX), None);
    }

    #[test]
    fn test_empty_table() {
        let dir = TempDir::new().unwrap();
        let table = build(dir.path(), [], 16);
        assert_eq!(table.entries(), 0);
        assert_eq!(table.get(1), None);
        assert_eq!(table.iter().count(), 0);

        let reopened = SortedTable::open(table.path(), true).unwrap();
        assert_eq!(reopened.entries(), 0);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let dir = TempDir::new().unwrap();
        let mut writer = TableWriter::create(dir.path(), 4).unwrap();
        writer.push(5, 0).unwrap();
        assert!(writer.push(5, 1).is_err());
        assert!(writer.push(4, 1).is_err());
    }

    #[test]
    fn test_reopen_and_verify() {
        let dir = TempDir::new().unwrap();
        let path = build(dir.path(), 1..=500, 32).path().to_path_buf();

        let table = SortedTable::open(&path, true).unwrap();
        assert_eq!(table.get(250), Some(2500));
        assert_eq!(table.iter().count(), 500);
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let dir = TempDir::new().unwrap();
        let path = build(dir.path(), 1..=100, 8).path().to_path_buf();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[8] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        // Layout is intact, so only the checksum catches it
        assert!(SortedTable::open(&path, false).is_ok());
        assert!(matches!(
            SortedTable::open(&path, true),
            Err(StoreError::Corruption(_))
        ));
    }

    #[test]
    fn test_damaged_index_detected_without_checksum() {
        let dir = TempDir::new().unwrap();
        let path = build(dir.path(), 1..=100, 8).path().to_path_buf();
        let pristine = std::fs::read(&path).unwrap();
        // Index starts after 100 records; entry 1 is (first key, offset)
        let entry = 100 * RECORD_SIZE + INDEX_ENTRY_SIZE;

        for byte in [entry, entry + 8] {
            let mut bytes = pristine.clone();
            bytes[byte] ^= 0x01;
            std::fs::write(&path, &bytes).unwrap();
            assert!(matches!(
                SortedTable::open(&path, false),
                Err(StoreError::Corruption(_))
            ));
        }

        // A block's first record key no longer matches its index entry
        let mut bytes = pristine;
        bytes[8 * RECORD_SIZE] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            SortedTable::open(&path, false),
            Err(StoreError::Corruption(_))
        ));
    }

    #[test]
    fn test_truncated_file_detected() {
        let dir = TempDir::new().unwrap();
        let path = build(dir.path(), 1..=100, 8).path().to_path_buf();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 20]).unwrap();
        assert!(matches!(
            SortedTable::open(&path, false),
            Err(StoreError::Corruption(_))
        ));

        std::fs::write(&path, &bytes[..10]).unwrap();
        assert!(matches!(
            SortedTable::open(&path, false),
            Err(StoreError::Corruption(_))
        ));
    }
}

//! Spilled segment files.
//!
//! A segment is a run of 16-byte records (`key` then `value`, both
//! little-endian) sorted by key with no duplicate keys. Segments are
//! ephemeral: they exist only between a spill and the merge on seal.

use crate::Result;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Size of one record in segments and in the sealed table.
pub const RECORD_SIZE: usize = 16;

/// Buffer size for segment I/O.
const IO_BUFFER_SIZE: usize = 256 * 1024;

/// Encode one record.
#[inline]
pub fn encode_record(key: u64, value: u64) -> [u8; RECORD_SIZE] {
    let mut buf = [0u8; RECORD_SIZE];
    buf[..8].copy_from_slice(&key.to_le_bytes());
    buf[8..].copy_from_slice(&value.to_le_bytes());
    buf
}

/// Decode one record.
#[inline]
pub fn decode_record(buf: &[u8; RECORD_SIZE]) -> (u64, u64) {
    let mut key = [0u8; 8];
    let mut value = [0u8; 8];
    key.copy_from_slice(&buf[..8]);
    value.copy_from_slice(&buf[8..]);
    (u64::from_le_bytes(key), u64::from_le_bytes(value))
}

/// Path of segment number `index` inside `dir`.
pub fn segment_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("segment-{index:06}.seg"))
}

/// Sort `buffer` by key and write it as a segment, keeping the last value
/// written for each key. Returns the number of records written.
///
/// The sort is stable, so among equal keys insertion order is preserved and
/// the final one in each run is the most recent write.
pub fn write_segment(path: &Path, buffer: &mut [(u64, u64)]) -> Result<u64> {
    buffer.sort_by_key(|&(key, _)| key);

    let file = File::create(path)?;
    let mut writer = BufWriter::with_capacity(IO_BUFFER_SIZE, file);
    let mut written = 0u64;
    let mut iter = buffer.iter().peekable();
    while let Some(&(key, value)) = iter.next() {
        if iter.peek().is_some_and(|&&(next, _)| next == key) {
            continue;
        }
        writer.write_all(&encode_record(key, value))?;
        written += 1;
    }
    writer.flush()?;

    debug!(
        "Spilled {} records ({} buffered) to {}",
        written,
        buffer.len(),
        path.display()
    );
    Ok(written)
}

/// Sequential reader over a segment file.
pub struct SegmentReader {
    reader: BufReader<File>,
}

impl SegmentReader {
    /// Open a segment for reading.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            reader: BufReader::with_capacity(IO_BUFFER_SIZE, File::open(path)?),
        })
    }

    /// Next record, or `None` at end of file.
    pub fn next_record(&mut self) -> Result<Option<(u64, u64)>> {
        let mut buf = [0u8; RECORD_SIZE];
        match self.reader.read_exact(&mut buf) {
            Ok(()) => Ok(Some(decode_record(&buf))),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_layout() {
        let buf = encode_record(0x0102, 0xFF);
        assert_eq!(buf[0], 0x02);
        assert_eq!(buf[1], 0x01);
        assert_eq!(buf[8], 0xFF);
        assert_eq!(decode_record(&buf), (0x0102, 0xFF));
    }

    #[test]
    fn test_segment_sorted_and_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let path = segment_path(dir.path(), 0);
        let mut buffer = vec![(5, 1), (1, 1), (5, 2), (3, 1), (1, 9)];
        assert_eq!(write_segment(&path, &mut buffer).unwrap(), 3);

        let mut reader = SegmentReader::open(&path).unwrap();
        let mut records = Vec::new();
        while let Some(record) = reader.next_record().unwrap() {
            records.push(record);
        }
        assert_eq!(records, vec![(1, 9), (3, 1), (5, 2)]);
    }

    #[test]
    fn test_segment_path_naming() {
        let path = segment_path(Path::new("/tmp/store"), 42);
        assert_eq!(path, PathBuf::from("/tmp/store/segment-000042.seg"));
    }
}

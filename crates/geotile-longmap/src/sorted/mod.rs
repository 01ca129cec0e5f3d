//! External-sort sorted table backend
//!
//! Writes are buffered in memory. When the buffer reaches the spill
//! threshold it is sorted and written out as a segment. Sealing spills the
//! remainder, k-way merges every segment into one sorted table with a sparse
//! block index, and deletes the segments. Reads are only served after seal.

pub mod merge;
pub mod segment;
pub mod table;

use crate::config::BackendKind;
use crate::fs;
use crate::map::LongLongMap;
use crate::{Result, StoreError};
use merge::MergeIterator;
use segment::{RECORD_SIZE, SegmentReader, segment_path, write_segment};
use std::path::{Path, PathBuf};
use table::{SortedTable, TABLE_FILE_NAME, TableWriter};
use tracing::{debug, info, warn};

pub use table::{BlockIndexEntry, TableFooter};

enum State {
    Building {
        buffer: Vec<(u64, u64)>,
        segments: Vec<PathBuf>,
        /// Distinct keys are only known after the merge
        writes: u64,
    },
    Sealed(SortedTable),
    /// A seal failed part way; nothing can be trusted any more.
    Poisoned,
}

/// Sorted table map.
pub struct SortedTableMap {
    dir: PathBuf,
    spill_threshold: usize,
    index_interval: usize,
    temporary: bool,
    closed: bool,
    state: State,
}

impl std::fmt::Debug for SortedTableMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Building { .. } => "building",
            State::Sealed(_) => "sealed",
            State::Poisoned => "poisoned",
        };
        f.debug_struct("SortedTableMap")
            .field("dir", &self.dir)
            .field("spill_threshold", &self.spill_threshold)
            .field("index_interval", &self.index_interval)
            .field("state", &state)
            .finish_non_exhaustive()
    }
}

fn poisoned() -> StoreError {
    StoreError::Corruption("sorted table is unusable after a failed seal".to_string())
}

impl SortedTableMap {
    /// Start a new table in `dir`.
    ///
    /// Any table or segments already in `dir` are removed.
    pub fn create(
        dir: &Path,
        spill_threshold: usize,
        index_interval: usize,
        temporary: bool,
    ) -> Result<Self> {
        if spill_threshold == 0 {
            return Err(StoreError::Config(
                "spill_threshold must be positive".to_string(),
            ));
        }
        if index_interval == 0 {
            return Err(StoreError::Config(
                "index_interval must be positive".to_string(),
            ));
        }
        fs::create_dir(dir)?;
        let map = Self {
            dir: dir.to_path_buf(),
            spill_threshold,
            index_interval,
            temporary,
            closed: false,
            state: State::Building {
                buffer: Vec::new(),
                segments: Vec::new(),
                writes: 0,
            },
        };
        for stale in map.existing_segments()? {
            fs::delete(&stale)?;
        }
        fs::delete(&map.table_path())?;

        debug!(
            "Created sorted table builder in {} (spill every {} records)",
            dir.display(),
            spill_threshold
        );
        Ok(map)
    }

    /// Open a table sealed by an earlier run.
    ///
    /// A directory with leftover segments but no table was never sealed and
    /// is refused.
    pub fn open(dir: &Path, verify: bool, temporary: bool) -> Result<Self> {
        let path = dir.join(TABLE_FILE_NAME);
        let mut map = Self {
            dir: dir.to_path_buf(),
            spill_threshold: 0,
            index_interval: 0,
            temporary,
            // Nothing to clean up unless the open succeeds
            closed: true,
            state: State::Poisoned,
        };
        if !fs::exists(&path) {
            let reason = if map.existing_segments()?.is_empty() {
                "no sorted table found"
            } else {
                "store was never sealed"
            };
            return Err(StoreError::Corruption(format!(
                "{}: {reason}",
                dir.display()
            )));
        }

        let table = SortedTable::open(&path, verify)?;
        map.index_interval = table.interval();
        map.closed = false;
        map.state = State::Sealed(table);
        Ok(map)
    }

    fn table_path(&self) -> PathBuf {
        self.dir.join(TABLE_FILE_NAME)
    }

    fn existing_segments(&self) -> Result<Vec<PathBuf>> {
        let mut segments = Vec::new();
        if !fs::exists(&self.dir) {
            return Ok(segments);
        }
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "seg") {
                segments.push(path);
            }
        }
        segments.sort();
        Ok(segments)
    }

    /// Segments spilled so far. Zero once sealed.
    pub fn segment_count(&self) -> usize {
        match &self.state {
            State::Building { segments, .. } => segments.len(),
            _ => 0,
        }
    }

    /// The sealed table, if sealed.
    pub fn table(&self) -> Option<&SortedTable> {
        match &self.state {
            State::Sealed(table) => Some(table),
            _ => None,
        }
    }

    fn spill(
        dir: &Path,
        buffer: &mut Vec<(u64, u64)>,
        segments: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let path = segment_path(dir, segments.len());
        write_segment(&path, buffer)?;
        segments.push(path);
        buffer.clear();
        Ok(())
    }

    fn merge_into_table(&self, segments: &[PathBuf]) -> Result<SortedTable> {
        let readers = segments
            .iter()
            .map(|path| SegmentReader::open(path))
            .collect::<Result<Vec<_>>>()?;
        let mut writer = TableWriter::create(&self.dir, self.index_interval)?;
        for record in MergeIterator::new(readers)? {
            let (key, value) = record?;
            writer.push(key, value)?;
        }
        writer.finish()
    }

    fn cleanup(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // Release the mapping before touching the files
        let state = std::mem::replace(&mut self.state, State::Poisoned);
        if !self.temporary {
            return Ok(());
        }
        drop(state);
        debug!("Deleting temporary sorted table in {}", self.dir.display());
        for segment in self.existing_segments()? {
            fs::delete(&segment)?;
        }
        fs::delete(&self.table_path())?;
        fs::delete(&self.table_path().with_extension("tmp"))
    }
}

impl LongLongMap for SortedTableMap {
    fn kind(&self) -> BackendKind {
        BackendKind::SortedTable
    }

    fn put(&mut self, key: u64, value: u64) -> Result<()> {
        match &mut self.state {
            State::Building {
                buffer,
                segments,
                writes,
            } => {
                if buffer.capacity() == 0 {
                    buffer.reserve_exact(self.spill_threshold);
                }
                buffer.push((key, value));
                *writes += 1;
                if buffer.len() >= self.spill_threshold {
                    Self::spill(&self.dir, buffer, segments)?;
                }
                Ok(())
            }
            State::Sealed(_) => Err(StoreError::Sealed),
            State::Poisoned => Err(poisoned()),
        }
    }

    #[inline]
    fn get(&self, key: u64) -> Result<Option<u64>> {
        match &self.state {
            State::Sealed(table) => Ok(table.get(key)),
            State::Building { .. } => Err(StoreError::NotSealed),
            State::Poisoned => Err(poisoned()),
        }
    }

    fn seal(&mut self) -> Result<()> {
        let (mut buffer, mut segments, writes) =
            match std::mem::replace(&mut self.state, State::Poisoned) {
                State::Building {
                    buffer,
                    segments,
                    writes,
                } => (buffer, segments, writes),
                State::Sealed(table) => {
                    self.state = State::Sealed(table);
                    return Ok(());
                }
                State::Poisoned => return Err(poisoned()),
            };

        if !buffer.is_empty() {
            Self::spill(&self.dir, &mut buffer, &mut segments)?;
        }
        drop(buffer);

        let table = self.merge_into_table(&segments)?;
        for segment in &segments {
            fs::delete(segment)?;
        }
        info!(
            "Sealed sorted table in {}: {} writes merged from {} segments into {} records",
            self.dir.display(),
            writes,
            segments.len(),
            table.entries()
        );
        self.state = State::Sealed(table);
        Ok(())
    }

    fn len(&self) -> u64 {
        match &self.state {
            State::Sealed(table) => table.entries(),
            // Upper bound until duplicates are merged away
            State::Building { writes, .. } => *writes,
            State::Poisoned => 0,
        }
    }

    fn memory_usage(&self) -> u64 {
        match &self.state {
            State::Building { buffer, .. } => (buffer.capacity() * RECORD_SIZE) as u64,
            State::Sealed(table) => table.memory_usage(),
            State::Poisoned => 0,
        }
    }

    fn disk_usage(&self) -> u64 {
        fs::allocated_size(&self.dir)
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        if !self.temporary && matches!(self.state, State::Building { .. }) {
            self.seal()?;
        }
        self.cleanup()
    }
}

impl Drop for SortedTableMap {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            warn!("Failed to clean up {}: {}", self.dir.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_get_before_seal_is_error() {
        let dir = TempDir::new().unwrap();
        let mut map = SortedTableMap::create(dir.path(), 8, 4, true).unwrap();
        map.put(1, 2).unwrap();
        assert!(matches!(map.get(1), Err(StoreError::NotSealed)));
    }

    #[test]
    fn test_spills_and_merges_with_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let mut map = SortedTableMap::create(dir.path(), 10, 4, true).unwrap();
        for key in (0..95u64).rev() {
            map.put(key, key).unwrap();
        }
        // Overwrite keys that already went to older segments
        for key in 0..5u64 {
            map.put(key, key + 1000).unwrap();
        }
        assert_eq!(map.segment_count(), 10);

        map.seal().unwrap();
        assert_eq!(map.segment_count(), 0);
        assert_eq!(map.len(), 95);
        for key in 0..5u64 {
            assert_eq!(map.get(key).unwrap(), Some(key + 1000));
        }
        for key in 5..95u64 {
            assert_eq!(map.get(key).unwrap(), Some(key));
        }
        assert_eq!(map.get(95).unwrap(), None);

        let keys: Vec<u64> = map.table().unwrap().iter().map(|(k, _)| k).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));

        let leftover = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .path()
                    .extension()
                    .is_some_and(|ext| ext == "seg")
            })
            .count();
        assert_eq!(leftover, 0);
    }

    #[test]
    fn test_double_seal_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut map = SortedTableMap::create(dir.path(), 100, 4, true).unwrap();
        map.put(3, 4).unwrap();
        map.seal().unwrap();
        map.seal().unwrap();
        assert_eq!(map.get(3).unwrap(), Some(4));
        assert!(matches!(map.put(5, 6), Err(StoreError::Sealed)));
    }

    #[test]
    fn test_empty_seal() {
        let dir = TempDir::new().unwrap();
        let mut map = SortedTableMap::create(dir.path(), 100, 4, true).unwrap();
        map.seal().unwrap();
        assert_eq!(map.len(), 0);
        assert_eq!(map.get(0).unwrap(), None);
    }

    #[test]
    fn test_persistent_reopen() {
        let dir = TempDir::new().unwrap();
        let mut map = SortedTableMap::create(dir.path(), 16, 8, false).unwrap();
        for key in 1..=200u64 {
            map.put(key * 7, key).unwrap();
        }
        // Closing an unsealed persistent map seals it
        Box::new(map).close().unwrap();

        let reopened = SortedTableMap::open(dir.path(), true, false).unwrap();
        assert_eq!(reopened.len(), 200);
        assert_eq!(reopened.get(700).unwrap(), Some(100));
        assert_eq!(reopened.get(701).unwrap(), None);
    }

    #[test]
    fn test_temporary_files_removed_on_close() {
        let dir = TempDir::new().unwrap();
        let mut map = SortedTableMap::create(dir.path(), 4, 2, true).unwrap();
        for key in 0..20u64 {
            map.put(key, key).unwrap();
        }
        map.seal().unwrap();
        Box::new(map).close().unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_open_unsealed_directory_refused() {
        let dir = TempDir::new().unwrap();
        let mut map = SortedTableMap::create(dir.path(), 4, 2, false).unwrap();
        for key in 0..10u64 {
            map.put(key, key).unwrap();
        }
        // Simulate a crash mid-build: segments remain, no table
        std::mem::forget(map);

        assert!(matches!(
            SortedTableMap::open(dir.path(), false, false),
            Err(StoreError::Corruption(_))
        ));
    }
}

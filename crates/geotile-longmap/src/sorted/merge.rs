//! K-way merge of sorted segments.
//!
//! A binary heap holds the current head of every segment. Heads with equal
//! keys are ordered by segment number so that the newest segment pops first;
//! older duplicates are then skipped, giving last-write-wins across spills.

use super::segment::SegmentReader;
use crate::Result;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug, PartialEq, Eq)]
struct Head {
    key: u64,
    value: u64,
    source: usize,
}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Head {
    // Max-heap: smallest key first, then highest (newest) source
    fn cmp(&self, other: &Self) -> Ordering {
        match self.key.cmp(&other.key) {
            Ordering::Equal => self.source.cmp(&other.source),
            other => other.reverse(),
        }
    }
}

/// Iterator yielding the union of all segments in strictly increasing key
/// order.
pub struct MergeIterator {
    readers: Vec<SegmentReader>,
    heap: BinaryHeap<Head>,
    last_key: Option<u64>,
}

impl MergeIterator {
    /// Start merging. `readers` must be in spill order (oldest first).
    pub fn new(mut readers: Vec<SegmentReader>) -> Result<Self> {
        let mut heap = BinaryHeap::with_capacity(readers.len());
        for (source, reader) in readers.iter_mut().enumerate() {
            if let Some((key, value)) = reader.next_record()? {
                heap.push(Head { key, value, source });
            }
        }
        Ok(Self {
            readers,
            heap,
            last_key: None,
        })
    }

    fn advance(&mut self, source: usize) -> Result<()> {
        if let Some((key, value)) = self.readers[source].next_record()? {
            self.heap.push(Head { key, value, source });
        }
        Ok(())
    }

    /// Next merged record.
    pub fn next_record(&mut self) -> Result<Option<(u64, u64)>> {
        while let Some(head) = self.heap.pop() {
            self.advance(head.source)?;
            if self.last_key == Some(head.key) {
                continue;
            }
            self.last_key = Some(head.key);
            return Ok(Some((head.key, head.value)));
        }
        Ok(None)
    }
}

impl Iterator for MergeIterator {
    type Item = Result<(u64, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::super::segment::{segment_path, write_segment};
    use super::*;
    use tempfile::TempDir;

    fn merge(runs: Vec<Vec<(u64, u64)>>) -> Vec<(u64, u64)> {
        let dir = TempDir::new().unwrap();
        let mut readers = Vec::new();
        for (i, mut run) in runs.into_iter().enumerate() {
            let path = segment_path(dir.path(), i);
            write_segment(&path, &mut run).unwrap();
            readers.push(SegmentReader::open(&path).unwrap());
        }
        MergeIterator::new(readers)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_interleaved_runs() {
        let merged = merge(vec![
            vec![(1, 1), (4, 4), (7, 7)],
            vec![(2, 2), (5, 5)],
            vec![(3, 3), (6, 6), (8, 8)],
        ]);
        assert_eq!(
            merged,
            (1..=8).map(|k| (k, k)).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_newest_segment_wins() {
        let merged = merge(vec![
            vec![(1, 10), (2, 20)],
            vec![(2, 21), (3, 31)],
            vec![(1, 12)],
        ]);
        assert_eq!(merged, vec![(1, 12), (2, 21), (3, 31)]);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(merge(vec![]).is_empty());
        assert_eq!(merge(vec![vec![], vec![(9, 9)]]), vec![(9, 9)]);
    }
}

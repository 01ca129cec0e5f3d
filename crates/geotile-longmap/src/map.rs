//! Core store trait
//!
//! Every backend implements [`LongLongMap`]. The trait is deliberately
//! narrow: writes during the build phase, an explicit seal, and reads that
//! only need a shared reference afterwards.

use crate::Result;
use crate::config::BackendKind;

/// A `u64 -> u64` map written once and then read concurrently.
///
/// Implementations must be `Send + Sync`: the build phase happens on one
/// thread holding `&mut self`, and after `seal` the map is shared read-only
/// between reader threads.
pub trait LongLongMap: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Store `value` under `key`, replacing any earlier value.
    fn put(&mut self, key: u64, value: u64) -> Result<()>;

    /// Look up `key`. `Ok(None)` means the key was never written.
    ///
    /// Must not allocate or mutate state.
    fn get(&self, key: u64) -> Result<Option<u64>>;

    /// Finish the build phase. Calling it again is a no-op.
    fn seal(&mut self) -> Result<()> {
        Ok(())
    }

    /// Number of distinct keys stored.
    fn len(&self) -> u64;

    /// True when nothing has been stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Heap memory owned by the backend, in bytes.
    fn memory_usage(&self) -> u64;

    /// Disk blocks allocated to backing files, in bytes.
    fn disk_usage(&self) -> u64 {
        0
    }

    /// Release resources, deleting backing files if the map is temporary.
    fn close(self: Box<Self>) -> Result<()>;
}

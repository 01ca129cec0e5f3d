//! Filesystem helpers for store backing directories.
//!
//! Sizes are best effort: a missing or unreadable path counts as 0 bytes,
//! which is what footprint reporting wants.

use crate::Result;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Create `path` and any missing parents.
pub fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Delete a file or a directory tree. Missing paths are not an error.
pub fn delete(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            debug!("Deleting directory {}", path.display());
            std::fs::remove_dir_all(path)?;
        }
        Ok(_) => std::fs::remove_file(path)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Whether `path` exists.
pub fn exists(path: &Path) -> bool {
    path.exists()
}

/// Logical size of a file, or the sum over all files below a directory.
pub fn size(path: &Path) -> u64 {
    sum_files(path, |meta| meta.len())
}

/// Bytes of disk blocks actually allocated to a file or directory tree.
///
/// For sparse files this is usually far below [`size`]. Platforms without
/// block accounting fall back to the logical size.
pub fn allocated_size(path: &Path) -> u64 {
    sum_files(path, allocated_bytes)
}

fn sum_files(path: &Path, measure: impl Fn(&std::fs::Metadata) -> u64) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| entry.metadata().ok())
        .filter(std::fs::Metadata::is_file)
        .map(|meta| measure(&meta))
        .sum()
}

#[cfg(unix)]
fn allocated_bytes(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.blocks() * 512
}

#[cfg(not(unix))]
fn allocated_bytes(meta: &std::fs::Metadata) -> u64 {
    meta.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_size_of_file_and_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a/b");
        create_dir(&nested).unwrap();
        std::fs::write(dir.path().join("one"), [0u8; 100]).unwrap();
        std::fs::write(nested.join("two"), [0u8; 50]).unwrap();

        assert_eq!(size(&dir.path().join("one")), 100);
        assert_eq!(size(dir.path()), 150);
        assert_eq!(size(&dir.path().join("missing")), 0);
    }

    #[test]
    fn test_delete_file_and_tree() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("x/y");
        create_dir(&nested).unwrap();
        let file = nested.join("f");
        std::fs::write(&file, b"data").unwrap();

        delete(&file).unwrap();
        assert!(!exists(&file));
        delete(&dir.path().join("x")).unwrap();
        assert!(!exists(&nested));
        // Deleting again is fine
        delete(&dir.path().join("x")).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_sparse_file_allocates_less_than_len() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sparse");
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(64 * 1024 * 1024).unwrap();
        drop(file);

        assert_eq!(size(&path), 64 * 1024 * 1024);
        assert!(allocated_size(&path) < size(&path));
    }
}

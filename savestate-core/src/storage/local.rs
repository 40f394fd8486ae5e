/*!
Local filesystem storage adapter implementation.
*/

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use super::StorageAdapter;
use crate::{Result, SnapshotError};

/// Local filesystem storage adapter
///
/// This implementation stores slot files on the local filesystem.
/// It automatically creates parent directories if they don't exist.
///
/// # Example
/// ```rust
/// use savestate_core::storage::{LocalFileStorage, StorageAdapter};
///
/// # let dir = tempfile::tempdir()?;
/// let storage = LocalFileStorage::with_base_dir(dir.path().join("states"));
/// storage.save(b"slot bytes", "0004000000055D00.01.cst")?;
/// assert!(storage.exists("0004000000055D00.01.cst"));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    /// Optional base directory for all slot files
    base_dir: Option<PathBuf>,
}

impl LocalFileStorage {
    /// Create a new local file storage adapter without a base directory
    ///
    /// Paths provided to save/load will be used as-is.
    pub fn new() -> Self {
        Self { base_dir: None }
    }

    /// Create a new local file storage adapter with a base directory
    ///
    /// All paths will be resolved relative to the base directory.
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: Some(base_dir.as_ref().to_path_buf()),
        }
    }

    /// Resolve the full path for a given storage path
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        match &self.base_dir {
            Some(base) => base.join(path),
            None => PathBuf::from(path),
        }
    }

    /// Ensure the parent directory exists, creating it if necessary
    fn ensure_parent_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    SnapshotError::storage(format!(
                        "Failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        Ok(())
    }
}

impl Default for LocalFileStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageAdapter for LocalFileStorage {
    fn save_parts(&self, parts: &[&[u8]], path: &str) -> Result<()> {
        let full_path = self.resolve_path(path);
        self.ensure_parent_dir(&full_path)?;

        let write_err = |e: std::io::Error| {
            SnapshotError::storage(format!(
                "Failed to write slot to {}: {}",
                full_path.display(),
                e
            ))
        };

        let mut file = File::create(&full_path).map_err(write_err)?;
        for part in parts {
            file.write_all(part).map_err(write_err)?;
        }
        file.flush().map_err(write_err)?;
        Ok(())
    }

    fn load(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.resolve_path(path);

        fs::read(&full_path).map_err(|e| {
            SnapshotError::storage(format!(
                "Failed to read slot from {}: {}",
                full_path.display(),
                e
            ))
        })
    }

    fn load_head(&self, path: &str, len: usize) -> Result<Vec<u8>> {
        let full_path = self.resolve_path(path);
        let read_err = |e: std::io::Error| {
            SnapshotError::storage(format!(
                "Failed to read slot from {}: {}",
                full_path.display(),
                e
            ))
        };

        let file = File::open(&full_path).map_err(read_err)?;
        let mut head = Vec::with_capacity(len);
        file.take(len as u64)
            .read_to_end(&mut head)
            .map_err(read_err)?;
        Ok(head)
    }

    fn size(&self, path: &str) -> Result<u64> {
        let full_path = self.resolve_path(path);
        fs::metadata(&full_path).map(|m| m.len()).map_err(|e| {
            SnapshotError::storage(format!(
                "Failed to stat slot {}: {}",
                full_path.display(),
                e
            ))
        })
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve_path(path).is_file()
    }

    fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.resolve_path(path);

        if full_path.exists() {
            fs::remove_file(&full_path).map_err(|e| {
                SnapshotError::storage(format!(
                    "Failed to delete slot {}: {}",
                    full_path.display(),
                    e
                ))
            })?;
        }

        Ok(())
    }
}

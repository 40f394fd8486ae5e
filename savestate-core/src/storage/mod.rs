/*!
Storage adapters for slot files.

This module defines the storage abstraction (port) and its implementations
(adapters). The snapshot engine only ever addresses slots by a relative path;
where the bytes end up is the adapter's business.
*/

pub mod local;

use crate::Result;

/// Storage abstraction for saving and loading slot files
///
/// This trait defines the interface that all storage implementations must provide.
/// Failures are reported as [`crate::SnapshotError::Storage`].
pub trait StorageAdapter {
    /// Save data to the specified location, replacing any previous content
    ///
    /// # Arguments
    /// * `data` - The bytes to save
    /// * `path` - The storage location (interpretation depends on implementation)
    fn save(&self, data: &[u8], path: &str) -> Result<()> {
        self.save_parts(&[data], path)
    }

    /// Save the concatenation of `parts` without joining them in memory first
    fn save_parts(&self, parts: &[&[u8]], path: &str) -> Result<()>;

    /// Load the complete content stored at the specified location
    fn load(&self, path: &str) -> Result<Vec<u8>>;

    /// Load at most `len` bytes from the start of the stored content
    ///
    /// The default implementation loads everything and truncates.
    fn load_head(&self, path: &str, len: usize) -> Result<Vec<u8>> {
        let mut data = self.load(path)?;
        data.truncate(len);
        Ok(data)
    }

    /// Size in bytes of the stored content
    fn size(&self, path: &str) -> Result<u64>;

    /// Check if content exists at the specified location
    fn exists(&self, path: &str) -> bool;

    /// Delete the content at the specified location. Deleting a missing entry succeeds.
    fn delete(&self, path: &str) -> Result<()>;
}

// Re-export types for convenience
pub use local::LocalFileStorage;

/// Memory-based storage adapter for testing
///
/// This implementation stores slot files in memory using a HashMap.
/// Clones share the same map, so two engines can see each other's slots.
#[cfg(test)]
#[derive(Clone)]
pub struct MemoryStorage {
    data: std::sync::Arc<std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>>,
}

#[cfg(test)]
impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            data: std::sync::Arc::new(std::sync::Mutex::new(std::collections::HashMap::new())),
        }
    }

    /// Overwrite stored bytes directly, bypassing the engine
    pub fn put(&self, path: &str, data: Vec<u8>) {
        self.data.lock().unwrap().insert(path.to_string(), data);
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.data.lock().unwrap().get(path).cloned()
    }
}

#[cfg(test)]
impl StorageAdapter for MemoryStorage {
    fn save_parts(&self, parts: &[&[u8]], path: &str) -> Result<()> {
        let mut storage = self.data.lock().unwrap();
        storage.insert(path.to_string(), parts.concat());
        Ok(())
    }

    fn load(&self, path: &str) -> Result<Vec<u8>> {
        let storage = self.data.lock().unwrap();
        storage
            .get(path)
            .cloned()
            .ok_or_else(|| crate::SnapshotError::storage(format!("Slot not found: {path}")))
    }

    fn size(&self, path: &str) -> Result<u64> {
        self.load(path).map(|data| data.len() as u64)
    }

    fn exists(&self, path: &str) -> bool {
        let storage = self.data.lock().unwrap();
        storage.contains_key(path)
    }

    fn delete(&self, path: &str) -> Result<()> {
        let mut storage = self.data.lock().unwrap();
        storage.remove(path);
        Ok(())
    }
}

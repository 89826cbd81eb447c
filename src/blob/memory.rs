//! In-memory blob store using `DashMap`.
//!
//! Data is lost on process restart. Serves as the object-store stand-in for
//! `mem://` project roots and in tests.

use super::BlobStore;
use crate::Result;
use dashmap::DashMap;

/// In-memory blob store using a lock-free concurrent hashmap.
///
/// # Example
///
/// ```rust
/// use legisml::blob::{BlobStore, MemoryBlobStore};
///
/// # fn main() -> legisml::Result<()> {
/// let store = MemoryBlobStore::new();
/// store.set("matrices/a.json", b"{}".to_vec())?;
/// assert_eq!(store.get("matrices/a.json")?, Some(b"{}".to_vec()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    store: DashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: DashMap::new(),
        }
    }

    /// Number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Whether a key is present (infallible variant of `exists`).
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.store.contains_key(key)
    }

    /// All keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.store.iter().map(|e| e.key().clone()).collect();
        keys.sort_unstable();
        keys
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.store.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.store.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.store.remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.store.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_set_get_overwrite_delete() {
        let store = MemoryBlobStore::new();
        store.set("k", b"v1".to_vec()).unwrap();
        store.set("k", b"v2".to_vec()).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v2".to_vec()));

        store.delete("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
        // deleting again is a no-op
        store.delete("k").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_batch_get_preserves_order() {
        let store = MemoryBlobStore::new();
        store.set("a", b"1".to_vec()).unwrap();
        store.set("b", b"2".to_vec()).unwrap();

        let results = store.batch_get(&["b", "c", "a"]).unwrap();
        assert_eq!(results, vec![Some(b"2".to_vec()), None, Some(b"1".to_vec())]);
    }

    #[test]
    fn test_concurrent_writers() {
        let store = Arc::new(MemoryBlobStore::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store.set(&format!("key{i}"), vec![i as u8]).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 16);
        assert_eq!(store.keys()[0], "key0");
    }
}

//! Blob storage backends
//!
//! Matrices, trained models and fitted feature creators are opaque byte
//! blobs written under a project root. The core only ever needs "write
//! bytes at key" and "read bytes at key", so every backend implements the
//! small synchronous [`BlobStore`] trait:
//!
//! - [`LocalBlobStore`]: a directory on local disk (atomic writes)
//! - [`MemoryBlobStore`]: `DashMap`-backed, also the object-store stand-in
//! - `CompressedBlobStore` (feature `compression`): transparent LZ4/ZSTD,
//!   applied with [`ProjectStorage::compressed`]
//!
//! [`ProjectStorage`] resolves a project root (local path or object-store
//! URI) into a backend plus a key prefix.
//!
//! # Example
//!
//! ```rust
//! use legisml::blob::{ProjectStorage, StorageArea};
//!
//! # fn main() -> legisml::Result<()> {
//! let storage = ProjectStorage::open("mem://bucket/project", None)?;
//! storage.put(StorageArea::Models, "abc", b"weights".to_vec())?;
//! assert_eq!(storage.get(StorageArea::Models, "abc")?, b"weights".to_vec());
//! assert!(!storage.exists(StorageArea::Matrices, "abc")?);
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "compression")]
mod compressed;
mod local;
mod memory;

#[cfg(feature = "compression")]
pub use compressed::{CompressedBlobStore, Compression};
pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;

use crate::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Byte store addressed by string keys.
pub trait BlobStore: Send + Sync {
    /// Get a blob by key.
    ///
    /// Returns `None` if the key doesn't exist.
    ///
    /// # Errors
    /// Returns error if the backend cannot be read
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a blob, replacing any existing value.
    ///
    /// # Errors
    /// Returns error if the backend cannot be written
    fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Delete a blob. No-op if the key doesn't exist.
    ///
    /// # Errors
    /// Returns error if the backend cannot be written
    fn delete(&self, key: &str) -> Result<()>;

    /// Check if a key exists.
    ///
    /// # Errors
    /// Returns error if the backend cannot be read
    fn exists(&self, key: &str) -> Result<bool>;

    /// Get multiple keys; values come back in key order.
    ///
    /// # Errors
    /// Returns error on the first failing read
    fn batch_get(&self, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }
}

impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        (**self).exists(key)
    }

    fn batch_get(&self, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        (**self).batch_get(keys)
    }
}

/// Where a project root lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    /// Directory on local disk
    Local(PathBuf),
    /// Bucket in an object store, e.g. `s3://bucket/prefix`
    ObjectStore {
        /// URI scheme (`s3`, `gs`, `mem`, ...)
        scheme: String,
        /// Bucket name
        bucket: String,
        /// Key prefix inside the bucket, without trailing slash
        prefix: String,
    },
}

impl StorageLocation {
    /// Classify a project root by its prefix.
    ///
    /// Anything with a `scheme://` is an object store; everything else is a
    /// local path.
    ///
    /// # Errors
    /// Returns error if an object-store URI has no bucket
    pub fn parse(root: &str) -> Result<Self> {
        let Some((scheme, rest)) = root.split_once("://") else {
            return Ok(Self::Local(PathBuf::from(root)));
        };
        if scheme == "file" {
            return Ok(Self::Local(PathBuf::from(rest)));
        }
        let rest = rest.trim_matches('/');
        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(Error::Config(format!("object-store root '{root}' has no bucket")));
        }
        Ok(Self::ObjectStore {
            scheme: scheme.to_string(),
            bucket: bucket.to_string(),
            prefix: prefix.trim_end_matches('/').to_string(),
        })
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::ObjectStore {
                scheme,
                bucket,
                prefix,
            } if prefix.is_empty() => write!(f, "{scheme}://{bucket}"),
            Self::ObjectStore {
                scheme,
                bucket,
                prefix,
            } => write!(f, "{scheme}://{bucket}/{prefix}"),
        }
    }
}

/// Sub-path of the project root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageArea {
    /// Train/test feature matrices
    Matrices,
    /// Trained estimator artifacts
    Models,
    /// Fitted vectorizers
    FeatureModels,
}

impl StorageArea {
    /// Directory name under the project root
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Matrices => "matrices",
            Self::Models => "models",
            Self::FeatureModels => "feature_models",
        }
    }
}

/// A project root bound to a blob backend.
#[derive(Clone)]
pub struct ProjectStorage {
    location: StorageLocation,
    store: Arc<dyn BlobStore>,
    prefix: String,
}

impl fmt::Debug for ProjectStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectStorage")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl ProjectStorage {
    /// Open a project root.
    ///
    /// Local paths get a [`LocalBlobStore`]. Object-store roots use the
    /// supplied client; `mem://` roots create a fresh [`MemoryBlobStore`]
    /// when no client is given.
    ///
    /// # Errors
    /// Returns error if an object-store root has no client, or the local
    /// directory cannot be created
    pub fn open(root: &str, client: Option<Arc<dyn BlobStore>>) -> Result<Self> {
        let location = StorageLocation::parse(root)?;
        let (store, prefix): (Arc<dyn BlobStore>, String) = match &location {
            StorageLocation::Local(path) => {
                let store: Arc<dyn BlobStore> = match client {
                    Some(client) => client,
                    None => Arc::new(LocalBlobStore::new(path)?),
                };
                (store, String::new())
            }
            StorageLocation::ObjectStore { scheme, prefix, .. } => {
                let store: Arc<dyn BlobStore> = match client {
                    Some(client) => client,
                    None if scheme == "mem" => Arc::new(MemoryBlobStore::new()),
                    None => {
                        return Err(Error::Config(format!(
                            "project root '{root}' is an object store but no {scheme} client was supplied"
                        )))
                    }
                };
                (store, prefix.clone())
            }
        };
        debug!(root = %location, "opened project storage");
        Ok(Self {
            location,
            store,
            prefix,
        })
    }

    /// Compress every blob written through this handle.
    ///
    /// Blobs written compressed can only be read back through a handle
    /// with the same algorithm.
    #[cfg(feature = "compression")]
    #[must_use]
    pub fn compressed(self, compression: Compression) -> Self {
        debug!(root = %self.location, compression = compression.as_str(), "compressing blobs");
        Self {
            store: Arc::new(CompressedBlobStore::new(self.store, compression)),
            ..self
        }
    }

    /// Resolved project root
    #[must_use]
    pub const fn location(&self) -> &StorageLocation {
        &self.location
    }

    /// Underlying backend
    #[must_use]
    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Backend key of `name` in `area`
    #[must_use]
    pub fn key(&self, area: StorageArea, name: &str) -> String {
        if self.prefix.is_empty() {
            format!("{}/{name}", area.as_str())
        } else {
            format!("{}/{}/{name}", self.prefix, area.as_str())
        }
    }

    /// Write a blob.
    ///
    /// # Errors
    /// Returns error if the backend write fails
    pub fn put(&self, area: StorageArea, name: &str, bytes: Vec<u8>) -> Result<()> {
        let key = self.key(area, name);
        debug!(key = %key, bytes = bytes.len(), "writing blob");
        self.store.set(&key, bytes)
    }

    /// Read a blob that must exist.
    ///
    /// # Errors
    /// Returns a storage error if the blob is missing or unreadable
    pub fn get(&self, area: StorageArea, name: &str) -> Result<Vec<u8>> {
        let key = self.key(area, name);
        self.store
            .get(&key)?
            .ok_or_else(|| Error::Storage(format!("blob '{key}' not found under {}", self.location)))
    }

    /// Whether a blob exists.
    ///
    /// # Errors
    /// Returns error if the backend cannot be read
    pub fn exists(&self, area: StorageArea, name: &str) -> Result<bool> {
        self.store.exists(&self.key(area, name))
    }

    /// Delete a blob.
    ///
    /// # Errors
    /// Returns error if the backend write fails
    pub fn delete(&self, area: StorageArea, name: &str) -> Result<()> {
        self.store.delete(&self.key(area, name))
    }
}

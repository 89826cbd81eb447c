//! Compressed blob store wrapper
//!
//! Transparent LZ4/ZSTD compression for any `BlobStore` backend. Sparse
//! matrix documents are highly repetitive JSON and shrink well.

use super::BlobStore;
use crate::{Error, Result};

/// Compression algorithm for stored blobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// LZ4 - fast (default)
    #[default]
    Lz4,
    /// ZSTD - better ratio, slower
    Zstd,
}

impl Compression {
    /// Algorithm name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }

    /// Compress data
    ///
    /// # Errors
    /// Returns error if ZSTD fails
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
            Self::Zstd => zstd::encode_all(data, 3)
                .map_err(|e| Error::Storage(format!("ZSTD compression failed: {e}"))),
        }
    }

    /// Decompress data
    ///
    /// # Errors
    /// Returns error if the data is corrupted
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| Error::Storage(format!("LZ4 decompression failed: {e}"))),
            Self::Zstd => zstd::decode_all(data)
                .map_err(|e| Error::Storage(format!("ZSTD decompression failed: {e}"))),
        }
    }
}

impl std::str::FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lz4" => Ok(Self::Lz4),
            "zstd" => Ok(Self::Zstd),
            other => Err(Error::Config(format!(
                "unknown compression '{other}' (expected lz4 or zstd)"
            ))),
        }
    }
}

/// Wraps a `BlobStore` and compresses values transparently.
///
/// # Example
///
/// ```rust
/// use legisml::blob::{BlobStore, CompressedBlobStore, Compression, MemoryBlobStore};
///
/// # fn main() -> legisml::Result<()> {
/// let store = CompressedBlobStore::new(MemoryBlobStore::new(), Compression::Zstd);
/// store.set("k", vec![0u8; 10_000])?;
/// assert_eq!(store.get("k")?.map(|v| v.len()), Some(10_000));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct CompressedBlobStore<S: BlobStore> {
    inner: S,
    compression: Compression,
}

impl<S: BlobStore> CompressedBlobStore<S> {
    /// Wrap `inner`
    #[must_use]
    pub const fn new(inner: S, compression: Compression) -> Self {
        Self { inner, compression }
    }

    /// Inner store
    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    /// Compression algorithm
    #[must_use]
    pub const fn compression(&self) -> Compression {
        self.compression
    }
}

impl<S: BlobStore> BlobStore for CompressedBlobStore<S> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner
            .get(key)?
            .map(|compressed| self.compression.decompress(&compressed))
            .transpose()
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let compressed = self.compression.compress(&value)?;
        self.inner.set(key, compressed)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;

    #[test]
    fn test_round_trip_both_algorithms() {
        let payload = br#"{"matrix": {"0,0": 1.0, "0,1": 1.0}}"#.repeat(100);
        for compression in [Compression::Lz4, Compression::Zstd] {
            let store = CompressedBlobStore::new(MemoryBlobStore::new(), compression);
            store.set("m", payload.clone()).unwrap();
            assert_eq!(store.get("m").unwrap(), Some(payload.clone()));

            let raw = store.inner().get("m").unwrap().unwrap();
            assert!(raw.len() < payload.len(), "{} did not compress", compression.as_str());
        }
    }

    #[test]
    fn test_parse_compression_names() {
        assert_eq!("lz4".parse::<Compression>().unwrap(), Compression::Lz4);
        assert_eq!("ZSTD".parse::<Compression>().unwrap(), Compression::Zstd);
        assert!(matches!("gzip".parse::<Compression>(), Err(Error::Config(_))));
    }

    #[test]
    fn test_corrupted_blob_is_storage_error() {
        let store = CompressedBlobStore::new(MemoryBlobStore::new(), Compression::Lz4);
        store.inner().set("m", vec![0xff, 0xff, 0xff, 0xff, 1]).unwrap();
        assert!(matches!(store.get("m"), Err(Error::Storage(_))));
    }
}

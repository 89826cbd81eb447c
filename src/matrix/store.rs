//! Matrix persistence on a project's blob backend
//!
//! Sparse matrices are stored as `matrices/<uuid>.json` plus the sibling
//! labels document `matrices/<uuid>.labels.json`; dense matrices as
//! `matrices/<uuid>.parquet` with labels inline. The matrix blob is written
//! last so its presence marks a complete write.

use super::codec::{decode_labels, decode_sparse, encode_labels, encode_sparse};
use super::dense::{decode_dense, encode_dense};
use super::{SparseMatrix, StorageFormat};
use crate::blob::{ProjectStorage, StorageArea};
use crate::labels::{IssueArea, LabelTable};
use crate::Result;
use tracing::{debug, info};

/// A matrix read back from storage together with its labels
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMatrix {
    /// Feature values
    pub matrix: SparseMatrix,
    /// Labels for the same rows
    pub labels: LabelTable,
}

impl StoredMatrix {
    /// One issue area's labels in matrix row order.
    ///
    /// # Errors
    /// Returns error if a matrix row has no labels
    pub fn label_column(&self, area: IssueArea) -> Result<Vec<u8>> {
        self.labels.aligned_column(area, self.matrix.row_keys())
    }
}

/// Reads and writes matrices under `matrices/`.
#[derive(Debug, Clone)]
pub struct MatrixStore {
    storage: ProjectStorage,
}

impl MatrixStore {
    /// Bind to a project root
    #[must_use]
    pub const fn new(storage: ProjectStorage) -> Self {
        Self { storage }
    }

    /// Underlying project storage
    #[must_use]
    pub const fn storage(&self) -> &ProjectStorage {
        &self.storage
    }

    fn matrix_name(uuid: &str, format: StorageFormat) -> String {
        format!("{uuid}.{}", format.extension())
    }

    fn labels_name(uuid: &str) -> String {
        format!("{uuid}.labels.json")
    }

    /// Serialize and store a matrix.
    ///
    /// # Errors
    /// Returns error if encoding or the backend write fails
    pub fn write(
        &self,
        uuid: &str,
        format: StorageFormat,
        matrix: &SparseMatrix,
        labels: &LabelTable,
    ) -> Result<()> {
        let bytes = match format {
            StorageFormat::Sparse => {
                let label_bytes = encode_labels(labels)?;
                self.storage
                    .put(StorageArea::Matrices, &Self::labels_name(uuid), label_bytes)?;
                encode_sparse(matrix)?
            }
            StorageFormat::Dense => encode_dense(matrix, labels)?,
        };
        let size = bytes.len();
        self.storage
            .put(StorageArea::Matrices, &Self::matrix_name(uuid, format), bytes)?;
        info!(
            matrix_uuid = uuid,
            format = %format,
            rows = matrix.n_rows(),
            cols = matrix.n_cols(),
            nnz = matrix.nnz(),
            bytes = size,
            "stored matrix"
        );
        Ok(())
    }

    /// Load a stored matrix.
    ///
    /// # Errors
    /// Returns a storage error if the blob is missing, or a codec error if
    /// it cannot be decoded
    pub fn read(&self, uuid: &str, format: StorageFormat) -> Result<StoredMatrix> {
        let bytes = self
            .storage
            .get(StorageArea::Matrices, &Self::matrix_name(uuid, format))?;
        debug!(matrix_uuid = uuid, bytes = bytes.len(), "loaded matrix");
        match format {
            StorageFormat::Sparse => {
                let matrix = decode_sparse(&bytes)?;
                let labels = decode_labels(
                    &self
                        .storage
                        .get(StorageArea::Matrices, &Self::labels_name(uuid))?,
                )?;
                Ok(StoredMatrix { matrix, labels })
            }
            StorageFormat::Dense => {
                let (matrix, labels) = decode_dense(bytes)?;
                Ok(StoredMatrix { matrix, labels })
            }
        }
    }

    /// Whether a complete matrix is stored.
    ///
    /// # Errors
    /// Returns error if the backend cannot be read
    pub fn exists(&self, uuid: &str, format: StorageFormat) -> Result<bool> {
        let matrix = self
            .storage
            .exists(StorageArea::Matrices, &Self::matrix_name(uuid, format))?;
        match format {
            StorageFormat::Sparse if matrix => self
                .storage
                .exists(StorageArea::Matrices, &Self::labels_name(uuid)),
            _ => Ok(matrix),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::IssueLabels;
    use crate::matrix::{RowKey, Vocabulary};
    use crate::Error;
    use chrono::NaiveDate;

    fn sample() -> (SparseMatrix, LabelTable) {
        let key = RowKey::new(7, NaiveDate::from_ymd_opt(2019, 3, 1).unwrap());
        let vocabulary = Vocabulary::from_terms(vec!["bill".into(), "tax".into()]).unwrap();
        let matrix =
            SparseMatrix::from_triplets(vec![key], vocabulary, [(0, 0, 1.0), (0, 1, 1.0)]).unwrap();
        let labels = LabelTable::new(vec![(key, IssueLabels::new().with(IssueArea::Passage, 1))]);
        (matrix, labels)
    }

    #[test]
    fn test_write_read_both_formats() {
        let store = MatrixStore::new(ProjectStorage::open("mem://bucket/p", None).unwrap());
        let (matrix, labels) = sample();

        for format in [StorageFormat::Sparse, StorageFormat::Dense] {
            assert!(!store.exists("abc", format).unwrap());
            store.write("abc", format, &matrix, &labels).unwrap();
            assert!(store.exists("abc", format).unwrap());

            let stored = store.read("abc", format).unwrap();
            assert_eq!(stored.matrix, matrix);
            assert_eq!(stored.label_column(IssueArea::Passage).unwrap(), vec![1]);
        }
    }

    #[test]
    fn test_missing_matrix_is_storage_error() {
        let store = MatrixStore::new(ProjectStorage::open("mem://bucket", None).unwrap());
        let err = store.read("missing", StorageFormat::Sparse).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_sparse_without_labels_is_incomplete() {
        let storage = ProjectStorage::open("mem://bucket", None).unwrap();
        let (matrix, _) = sample();
        storage
            .put(
                StorageArea::Matrices,
                "abc.json",
                crate::matrix::codec::encode_sparse(&matrix).unwrap(),
            )
            .unwrap();
        let store = MatrixStore::new(storage);
        assert!(!store.exists("abc", StorageFormat::Sparse).unwrap());
    }
}

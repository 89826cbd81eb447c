//! Sparse matrix document codec
//!
//! A stored sparse matrix is a self-describing JSON document with exactly
//! three maps:
//!
//! ```json
//! {
//!   "matrix":     {"0,1": 1.0, "1,0": 2.0},
//!   "vocabulary": {"bill": 0, "tax": 1},
//!   "id_mapping": {"7, 2019-01-01": 0, "9, 2019-01-01": 1}
//! }
//! ```
//!
//! Only non-zero entries appear in `matrix`. Decoding restores the row order
//! from `id_mapping` and yields exactly the original non-zeros.
//!
//! The label table for the same rows travels as a sibling document (see
//! [`encode_labels`]).

use super::{RowKey, SparseMatrix, Vocabulary};
use crate::labels::{IssueLabels, LabelTable};
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Serialized form of a [`SparseMatrix`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SparseMatrixDocument {
    /// `"row,col"` → non-zero value
    pub matrix: BTreeMap<String, f64>,
    /// term → column index
    pub vocabulary: Vocabulary,
    /// `"entity_id, as_of_date"` → row index
    pub id_mapping: BTreeMap<String, usize>,
}

impl SparseMatrixDocument {
    /// Build the document for a matrix.
    ///
    /// # Errors
    /// Returns error if a stored value is NaN or infinite
    pub fn from_matrix(matrix: &SparseMatrix) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for (row, column, value) in matrix.iter_nonzero() {
            if !value.is_finite() {
                return Err(Error::Codec(format!(
                    "non-finite value {value} at ({row}, {column})"
                )));
            }
            entries.insert(format!("{row},{column}"), value);
        }

        let id_mapping = matrix
            .row_keys()
            .iter()
            .enumerate()
            .map(|(row, key)| (key.to_string(), row))
            .collect();

        Ok(Self {
            matrix: entries,
            vocabulary: matrix.vocabulary().clone(),
            id_mapping,
        })
    }

    /// Rebuild the matrix.
    ///
    /// # Errors
    /// Returns error if row indices are not contiguous, a key is malformed
    /// or an entry points outside the matrix
    pub fn into_matrix(self) -> Result<SparseMatrix> {
        let n_rows = self.id_mapping.len();
        let mut slots: Vec<Option<RowKey>> = vec![None; n_rows];
        for (key, row) in &self.id_mapping {
            let slot = slots.get_mut(*row).ok_or_else(|| {
                Error::Codec(format!("id_mapping row {row} out of range for {n_rows} rows"))
            })?;
            if slot.is_some() {
                return Err(Error::Codec(format!("id_mapping row {row} is used twice")));
            }
            *slot = Some(key.parse()?);
        }
        let rows: Vec<RowKey> = slots.into_iter().flatten().collect();

        let mut triplets = Vec::with_capacity(self.matrix.len());
        for (key, value) in self.matrix {
            let (row, column) = parse_cell_key(&key)?;
            triplets.push((row, column, value));
        }

        SparseMatrix::from_triplets(rows, self.vocabulary, triplets)
    }
}

fn parse_cell_key(key: &str) -> Result<(usize, usize)> {
    let (row, column) = key
        .split_once(',')
        .ok_or_else(|| Error::Codec(format!("matrix key '{key}' is not 'row,col'")))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<usize>()
            .map_err(|e| Error::Codec(format!("matrix key '{key}': {e}")))
    };
    Ok((parse(row)?, parse(column)?))
}

/// Encode a matrix as its JSON document.
///
/// # Errors
/// Returns error if a value is not finite
pub fn encode_sparse(matrix: &SparseMatrix) -> Result<Vec<u8>> {
    let document = SparseMatrixDocument::from_matrix(matrix)?;
    serde_json::to_vec(&document).map_err(|e| Error::Codec(format!("encode matrix: {e}")))
}

/// Decode a matrix from its JSON document.
///
/// # Errors
/// Returns error if the document is malformed
pub fn decode_sparse(bytes: &[u8]) -> Result<SparseMatrix> {
    let document: SparseMatrixDocument =
        serde_json::from_slice(bytes).map_err(|e| Error::Codec(format!("decode matrix: {e}")))?;
    document.into_matrix()
}

#[derive(Debug, Serialize, Deserialize)]
struct LabelRow {
    entity_id: i64,
    as_of_date: NaiveDate,
    labels: IssueLabels,
}

#[derive(Debug, Serialize, Deserialize)]
struct LabelsDocument {
    rows: Vec<LabelRow>,
}

/// Encode a label table as the sibling labels document.
///
/// # Errors
/// Returns error if serialization fails
pub fn encode_labels(labels: &LabelTable) -> Result<Vec<u8>> {
    let document = LabelsDocument {
        rows: labels
            .rows()
            .iter()
            .map(|(key, labels)| LabelRow {
                entity_id: key.entity_id,
                as_of_date: key.as_of_date,
                labels: *labels,
            })
            .collect(),
    };
    serde_json::to_vec(&document).map_err(|e| Error::Codec(format!("encode labels: {e}")))
}

/// Decode the sibling labels document.
///
/// # Errors
/// Returns error if the document is malformed
pub fn decode_labels(bytes: &[u8]) -> Result<LabelTable> {
    let document: LabelsDocument =
        serde_json::from_slice(bytes).map_err(|e| Error::Codec(format!("decode labels: {e}")))?;
    Ok(LabelTable::new(
        document
            .rows
            .into_iter()
            .map(|r| (RowKey::new(r.entity_id, r.as_of_date), r.labels))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::IssueArea;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn sample() -> SparseMatrix {
        let vocabulary = Vocabulary::from_terms(vec!["bill".into(), "tax".into()]).unwrap();
        SparseMatrix::from_triplets(
            vec![
                RowKey::new(9, date("2019-01-01")),
                RowKey::new(7, date("2019-01-01")),
            ],
            vocabulary,
            [(0, 0, 1.0), (1, 0, 1.0), (1, 1, 0.1 + 0.2)],
        )
        .unwrap()
    }

    #[test]
    fn test_document_shape() {
        let bytes = encode_sparse(&sample()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["vocabulary"]["bill"], 0);
        assert_eq!(json["vocabulary"]["tax"], 1);
        assert_eq!(json["id_mapping"]["9, 2019-01-01"], 0);
        assert_eq!(json["id_mapping"]["7, 2019-01-01"], 1);
        assert_eq!(json["matrix"]["1,0"], 1.0);
        assert!(json["matrix"].get("0,1").is_none());
        assert_eq!(json.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_round_trip_preserves_order_and_values() {
        let m = sample();
        let back = decode_sparse(&encode_sparse(&m).unwrap()).unwrap();
        assert_eq!(back, m);
        // exact float survives
        assert_eq!(back.get(1, 1).to_bits(), (0.1f64 + 0.2).to_bits());
    }

    #[test]
    fn test_encode_rejects_nan() {
        let vocabulary = Vocabulary::from_terms(vec!["a".into()]).unwrap();
        let m = SparseMatrix::from_triplets(
            vec![RowKey::new(1, date("2019-01-01"))],
            vocabulary,
            [(0, 0, f64::NAN)],
        )
        .unwrap();
        assert!(matches!(encode_sparse(&m), Err(Error::Codec(_))));
    }

    #[test]
    fn test_decode_rejects_bad_documents() {
        let gap = br#"{"matrix": {}, "vocabulary": {}, "id_mapping": {"1, 2019-01-01": 1}}"#;
        assert!(decode_sparse(gap).is_err());

        let out_of_range =
            br#"{"matrix": {"0,3": 1.0}, "vocabulary": {"a": 0}, "id_mapping": {"1, 2019-01-01": 0}}"#;
        assert!(decode_sparse(out_of_range).is_err());

        let bad_key =
            br#"{"matrix": {"x": 1.0}, "vocabulary": {"a": 0}, "id_mapping": {"1, 2019-01-01": 0}}"#;
        assert!(decode_sparse(bad_key).is_err());
    }

    #[test]
    fn test_labels_round_trip() {
        let key = RowKey::new(7, date("2019-03-01"));
        let table = LabelTable::new(vec![(key, IssueLabels::new().with(IssueArea::LgbtRights, 1))]);
        let back = decode_labels(&encode_labels(&table).unwrap()).unwrap();
        assert_eq!(back, table);
    }
}

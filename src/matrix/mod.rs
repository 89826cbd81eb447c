//! Sparse feature matrices
//!
//! A [`SparseMatrix`] is a compressed-sparse-row table whose rows are
//! cohort members (`entity_id`, `as_of_date`) in a stable order and whose
//! columns are vocabulary terms. Only non-zero entries are stored.
//!
//! Serialization lives in [`codec`] (sparse JSON document) and [`dense`]
//! (Parquet fallback); [`store`] puts either onto a blob backend.

pub mod codec;
pub mod dense;
pub mod store;

use crate::{Error, Result};
use chrono::NaiveDate;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub use store::{MatrixStore, StoredMatrix};

/// Date format used in every serialized row key and registry column
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Row identity: one cohort member at one as-of-date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey {
    /// Bill identifier
    pub entity_id: i64,
    /// Snapshot date
    pub as_of_date: NaiveDate,
}

impl RowKey {
    /// Create a row key
    #[must_use]
    pub const fn new(entity_id: i64, as_of_date: NaiveDate) -> Self {
        Self {
            entity_id,
            as_of_date,
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.entity_id, self.as_of_date.format(DATE_FORMAT))
    }
}

impl FromStr for RowKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (entity, date) = s
            .split_once(',')
            .ok_or_else(|| Error::Codec(format!("row key '{s}' is not 'entity_id, as_of_date'")))?;
        let entity_id = entity
            .trim()
            .parse::<i64>()
            .map_err(|e| Error::Codec(format!("row key '{s}': bad entity_id: {e}")))?;
        let as_of_date = NaiveDate::parse_from_str(date.trim(), DATE_FORMAT)
            .map_err(|e| Error::Codec(format!("row key '{s}': bad as_of_date: {e}")))?;
        Ok(Self::new(entity_id, as_of_date))
    }
}

/// Which side of a time split a matrix belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatrixType {
    /// Built from the train window; the vocabulary is fitted on it
    Train,
    /// Built from the test window with the train vocabulary
    Test,
}

impl MatrixType {
    /// Registry string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for MatrixType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatrixType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Self::Train),
            "test" => Ok(Self::Test),
            other => Err(Error::Codec(format!("unknown matrix type '{other}'"))),
        }
    }
}

/// On-disk representation of a matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    /// JSON document with non-zero entries, vocabulary and id mapping
    #[default]
    Sparse,
    /// Parquet table with one column per term (memory hungry)
    Dense,
}

impl StorageFormat {
    /// Registry string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sparse => "sparse",
            Self::Dense => "dense",
        }
    }

    /// File extension of the stored matrix blob
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Sparse => "json",
            Self::Dense => "parquet",
        }
    }
}

impl fmt::Display for StorageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sparse" => Ok(Self::Sparse),
            "dense" => Ok(Self::Dense),
            other => Err(Error::Codec(format!("unknown storage format '{other}'"))),
        }
    }
}

/// Term → column-index mapping.
///
/// Indices are always contiguous `0..len`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, usize>", into = "BTreeMap<String, usize>")]
pub struct Vocabulary {
    terms: Vec<String>,
    index: FxHashMap<String, usize>,
}

impl Vocabulary {
    /// Build a vocabulary whose column order is the order of `terms`.
    ///
    /// # Errors
    /// Returns error if a term appears twice
    pub fn from_terms(terms: Vec<String>) -> Result<Self> {
        let mut index = FxHashMap::default();
        index.reserve(terms.len());
        for (i, term) in terms.iter().enumerate() {
            if index.insert(term.clone(), i).is_some() {
                return Err(Error::Codec(format!("duplicate vocabulary term '{term}'")));
            }
        }
        Ok(Self { terms, index })
    }

    /// Column index of a term
    #[must_use]
    pub fn get(&self, term: &str) -> Option<usize> {
        self.index.get(term).copied()
    }

    /// Term at a column index
    #[must_use]
    pub fn term(&self, column: usize) -> Option<&str> {
        self.terms.get(column).map(String::as_str)
    }

    /// Terms in column order
    #[must_use]
    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// Number of terms
    #[must_use]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Whether the vocabulary has no terms
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

impl TryFrom<BTreeMap<String, usize>> for Vocabulary {
    type Error = Error;

    fn try_from(map: BTreeMap<String, usize>) -> Result<Self> {
        let mut slots: Vec<Option<String>> = vec![None; map.len()];
        for (term, column) in map {
            let slot = slots.get_mut(column).ok_or_else(|| {
                Error::Codec(format!("vocabulary index {column} for '{term}' is out of range"))
            })?;
            if slot.is_some() {
                return Err(Error::Codec(format!("vocabulary index {column} is used twice")));
            }
            *slot = Some(term);
        }
        // a map of n unique terms filling n slots cannot leave holes
        Self::from_terms(slots.into_iter().flatten().collect())
    }
}

impl From<Vocabulary> for BTreeMap<String, usize> {
    fn from(vocabulary: Vocabulary) -> Self {
        vocabulary
            .terms
            .into_iter()
            .enumerate()
            .map(|(i, term)| (term, i))
            .collect()
    }
}

/// Borrowed view of one matrix row
#[derive(Debug, Clone, Copy)]
pub struct SparseRow<'a> {
    /// Column indices, ascending
    pub columns: &'a [usize],
    /// Values aligned with `columns`
    pub values: &'a [f64],
}

impl SparseRow<'_> {
    /// Iterate `(column, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.columns.iter().copied().zip(self.values.iter().copied())
    }
}

/// Compressed-sparse-row feature matrix with entity/date row keys.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    rows: Vec<RowKey>,
    vocabulary: Vocabulary,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    values: Vec<f64>,
}

impl SparseMatrix {
    /// A zero-row matrix over `vocabulary`
    #[must_use]
    pub fn empty(vocabulary: Vocabulary) -> Self {
        Self {
            rows: Vec::new(),
            vocabulary,
            indptr: vec![0],
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Build from per-row `(column, value)` entries.
    ///
    /// Entries are sorted by column; explicit zeros are dropped.
    ///
    /// # Errors
    /// Returns error if row keys repeat, a column is out of range, a column
    /// repeats within a row, or `entries` does not match `rows`
    pub fn from_rows(
        rows: Vec<RowKey>,
        vocabulary: Vocabulary,
        entries: Vec<Vec<(usize, f64)>>,
    ) -> Result<Self> {
        if rows.len() != entries.len() {
            return Err(Error::Codec(format!(
                "{} row keys but {} rows of entries",
                rows.len(),
                entries.len()
            )));
        }

        let mut seen = std::collections::HashSet::with_capacity(rows.len());
        for key in &rows {
            if !seen.insert(*key) {
                return Err(Error::Codec(format!("duplicate row key '{key}'")));
            }
        }

        let n_cols = vocabulary.len();
        let mut indptr = Vec::with_capacity(rows.len() + 1);
        let mut indices = Vec::new();
        let mut values = Vec::new();
        indptr.push(0);

        for (row, mut row_entries) in entries.into_iter().enumerate() {
            row_entries.sort_by_key(|&(column, _)| column);
            let mut previous = None;
            for (column, value) in row_entries {
                if column >= n_cols {
                    return Err(Error::Codec(format!(
                        "column {column} out of range for {n_cols} terms (row {row})"
                    )));
                }
                if previous == Some(column) {
                    return Err(Error::Codec(format!("column {column} repeated in row {row}")));
                }
                previous = Some(column);
                if value != 0.0 {
                    indices.push(column);
                    values.push(value);
                }
            }
            indptr.push(indices.len());
        }

        Ok(Self {
            rows,
            vocabulary,
            indptr,
            indices,
            values,
        })
    }

    /// Build from `(row, column, value)` triplets in any order.
    ///
    /// # Errors
    /// Returns error if a row index is out of range or see [`Self::from_rows`]
    pub fn from_triplets(
        rows: Vec<RowKey>,
        vocabulary: Vocabulary,
        triplets: impl IntoIterator<Item = (usize, usize, f64)>,
    ) -> Result<Self> {
        let mut entries = vec![Vec::new(); rows.len()];
        for (row, column, value) in triplets {
            entries
                .get_mut(row)
                .ok_or_else(|| {
                    Error::Codec(format!("row {row} out of range for {} rows", rows.len()))
                })?
                .push((column, value));
        }
        Self::from_rows(rows, vocabulary, entries)
    }

    /// Number of rows
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns (vocabulary size)
    #[must_use]
    pub fn n_cols(&self) -> usize {
        self.vocabulary.len()
    }

    /// Number of stored non-zero entries
    #[must_use]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Row keys in row order
    #[must_use]
    pub fn row_keys(&self) -> &[RowKey] {
        &self.rows
    }

    /// Column vocabulary
    #[must_use]
    pub const fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Row index of a key
    #[must_use]
    pub fn row_index(&self, key: &RowKey) -> Option<usize> {
        self.rows.iter().position(|k| k == key)
    }

    /// Borrow one row.
    ///
    /// # Panics
    /// Panics if `row >= n_rows()`
    #[must_use]
    pub fn row(&self, row: usize) -> SparseRow<'_> {
        let (start, end) = (self.indptr[row], self.indptr[row + 1]);
        SparseRow {
            columns: &self.indices[start..end],
            values: &self.values[start..end],
        }
    }

    /// Iterate rows in order
    pub fn rows(&self) -> impl Iterator<Item = SparseRow<'_>> + '_ {
        (0..self.n_rows()).map(|row| self.row(row))
    }

    /// Iterate all non-zero `(row, column, value)` entries
    pub fn iter_nonzero(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.n_rows()).flat_map(move |row| {
            self.row(row)
                .iter()
                .map(move |(column, value)| (row, column, value))
                .collect::<Vec<_>>()
        })
    }

    /// Value at `(row, column)`, zero when not stored
    #[must_use]
    pub fn get(&self, row: usize, column: usize) -> f64 {
        if row >= self.n_rows() {
            return 0.0;
        }
        let view = self.row(row);
        view.columns
            .binary_search(&column)
            .map_or(0.0, |pos| view.values[pos])
    }

    /// Entity-indexed lookup: value of `term` for `key`.
    ///
    /// Returns `None` when the row or term is unknown, `Some(0.0)` for a
    /// known cell that is not stored.
    #[must_use]
    pub fn value(&self, key: &RowKey, term: &str) -> Option<f64> {
        let row = self.row_index(key)?;
        let column = self.vocabulary.get(term)?;
        Some(self.get(row, column))
    }

    /// Materialize as dense rows (zeros everywhere not stored)
    #[must_use]
    pub fn to_dense(&self) -> Vec<Vec<f64>> {
        self.rows()
            .map(|row| {
                let mut dense = vec![0.0; self.n_cols()];
                for (column, value) in row.iter() {
                    dense[column] = value;
                }
                dense
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn vocab(terms: &[&str]) -> Vocabulary {
        Vocabulary::from_terms(terms.iter().map(ToString::to_string).collect()).unwrap()
    }

    #[test]
    fn test_row_key_display_and_parse() {
        let key = RowKey::new(7, date("2019-01-01"));
        assert_eq!(key.to_string(), "7, 2019-01-01");
        assert_eq!("7, 2019-01-01".parse::<RowKey>().unwrap(), key);
        assert_eq!("7,2019-01-01".parse::<RowKey>().unwrap(), key);
        assert!("7".parse::<RowKey>().is_err());
        assert!("x, 2019-01-01".parse::<RowKey>().is_err());
    }

    #[test]
    fn test_vocabulary_rejects_gaps_and_duplicates() {
        let mut map = BTreeMap::new();
        map.insert("bill".to_string(), 0);
        map.insert("tax".to_string(), 2);
        assert!(Vocabulary::try_from(map).is_err());

        assert!(Vocabulary::from_terms(vec!["a".into(), "a".into()]).is_err());
    }

    #[test]
    fn test_vocabulary_map_conversion() {
        let v = vocab(&["bill", "tax"]);
        let map: BTreeMap<String, usize> = v.clone().into();
        assert_eq!(map["bill"], 0);
        assert_eq!(map["tax"], 1);
        assert_eq!(Vocabulary::try_from(map).unwrap(), v);
    }

    #[test]
    fn test_from_rows_drops_zeros_and_sorts() {
        let rows = vec![RowKey::new(1, date("2019-01-01")), RowKey::new(2, date("2019-01-01"))];
        let m = SparseMatrix::from_rows(
            rows,
            vocab(&["a", "b", "c"]),
            vec![vec![(2, 3.0), (0, 1.0), (1, 0.0)], vec![]],
        )
        .unwrap();

        assert_eq!(m.nnz(), 2);
        assert_eq!(m.row(0).columns, &[0, 2]);
        assert!((m.get(0, 2) - 3.0).abs() < f64::EPSILON);
        assert!(m.get(1, 0).abs() < f64::EPSILON);
        assert_eq!(m.to_dense(), vec![vec![1.0, 0.0, 3.0], vec![0.0, 0.0, 0.0]]);
    }

    #[test]
    fn test_from_rows_validation() {
        let key = RowKey::new(1, date("2019-01-01"));
        assert!(SparseMatrix::from_rows(vec![key, key], vocab(&["a"]), vec![vec![], vec![]]).is_err());
        assert!(SparseMatrix::from_rows(vec![key], vocab(&["a"]), vec![vec![(1, 1.0)]]).is_err());
        assert!(SparseMatrix::from_rows(vec![key], vocab(&["a"]), vec![]).is_err());
    }

    #[test]
    fn test_entity_indexed_lookup() {
        let key = RowKey::new(7, date("2019-03-01"));
        let m = SparseMatrix::from_triplets(vec![key], vocab(&["bill", "tax"]), [(0, 1, 2.0)]).unwrap();
        assert_eq!(m.value(&key, "tax"), Some(2.0));
        assert_eq!(m.value(&key, "bill"), Some(0.0));
        assert_eq!(m.value(&key, "new"), None);
    }

    #[test]
    fn test_empty_matrix() {
        let m = SparseMatrix::empty(vocab(&["a"]));
        assert_eq!(m.n_rows(), 0);
        assert_eq!(m.n_cols(), 1);
        assert_eq!(m.iter_nonzero().count(), 0);
    }
}

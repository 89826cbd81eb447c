//! Bag-of-words vectorizers
//!
//! A [`SparseMatrixBuilder`] holds one feature-group configuration. It is
//! fitted on the train side of a split only; the resulting
//! [`FittedVectorizer`] transforms both sides with the same vocabulary, so
//! terms that only occur in test text are ignored.
//!
//! Tokens are maximal runs of two or more alphanumeric characters
//! (underscore included). Vocabulary columns are assigned in alphabetical
//! term order.

use crate::matrix::{RowKey, SparseMatrix, Vocabulary};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Vectorizer family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureType {
    /// Raw term counts
    Count,
    /// 1 if the term occurs, else 0
    Binary,
    /// Term frequency times inverse document frequency
    Tfidf,
}

impl FeatureType {
    /// Configuration name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Binary => "binary",
            Self::Tfidf => "tfidf",
        }
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "count" => Ok(Self::Count),
            "binary" => Ok(Self::Binary),
            "tfidf" => Ok(Self::Tfidf),
            other => Err(Error::Config(format!(
                "unknown feature type '{other}' (expected count, binary or tfidf)"
            ))),
        }
    }
}

/// Row normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Norm {
    /// Divide by the sum of absolute values
    #[serde(rename = "l1")]
    L1,
    /// Divide by the Euclidean length
    #[serde(rename = "l2")]
    L2,
    /// Leave rows as computed
    #[serde(rename = "none")]
    Identity,
}

/// Fully resolved vectorizer hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VectorizerParams {
    /// Lowercase before tokenizing
    pub lowercase: bool,
    /// Minimum number of train documents a term must appear in
    pub min_df: usize,
    /// Maximum share of train documents a term may appear in
    pub max_df: f64,
    /// Keep only the most frequent terms
    pub max_features: Option<usize>,
    /// Smallest and largest n-gram length
    pub ngram_range: (usize, usize),
    /// Row normalization
    pub norm: Norm,
    /// Weight by inverse document frequency
    pub use_idf: bool,
    /// Add one to document frequencies
    pub smooth_idf: bool,
    /// Replace tf with 1 + ln(tf)
    pub sublinear_tf: bool,
}

impl VectorizerParams {
    /// Defaults of a feature type
    #[must_use]
    pub const fn defaults(feature_type: FeatureType) -> Self {
        let tfidf = matches!(feature_type, FeatureType::Tfidf);
        Self {
            lowercase: true,
            min_df: 1,
            max_df: 1.0,
            max_features: None,
            ngram_range: (1, 1),
            norm: if tfidf { Norm::L2 } else { Norm::Identity },
            use_idf: tfidf,
            smooth_idf: true,
            sublinear_tf: false,
        }
    }

    /// Overlay configured hyperparameters on the type's defaults.
    ///
    /// # Errors
    /// Returns a configuration error for unknown keys or invalid values
    pub fn resolve(feature_type: FeatureType, overrides: Option<&Map<String, Value>>) -> Result<Self> {
        let mut merged = match serde_json::to_value(Self::defaults(feature_type))? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Some(overrides) = overrides {
            for (key, value) in overrides {
                merged.insert(key.clone(), value.clone());
            }
        }
        let params: Self = serde_json::from_value(Value::Object(merged))
            .map_err(|e| Error::Config(format!("{feature_type} hyperparameters: {e}")))?;
        params.validate()?;
        Ok(params)
    }

    fn validate(&self) -> Result<()> {
        if !(self.max_df > 0.0 && self.max_df <= 1.0) {
            return Err(Error::Config(format!("max_df must be in (0, 1], got {}", self.max_df)));
        }
        if self.max_features == Some(0) {
            return Err(Error::Config("max_features must be positive".to_string()));
        }
        let (lo, hi) = self.ngram_range;
        if lo == 0 || lo > hi {
            return Err(Error::Config(format!("invalid ngram_range ({lo}, {hi})")));
        }
        Ok(())
    }
}

fn tokenize(text: &str, params: &VectorizerParams) -> Vec<String> {
    let text = if params.lowercase {
        text.to_lowercase()
    } else {
        text.to_string()
    };
    let unigrams: Vec<&str> = text
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.chars().count() >= 2)
        .collect();

    let (lo, hi) = params.ngram_range;
    let mut terms = Vec::new();
    for n in lo..=hi {
        if n > unigrams.len() {
            break;
        }
        terms.extend(unigrams.windows(n).map(|w| w.join(" ")));
    }
    terms
}

/// Unfitted vectorizer for one feature-group configuration.
///
/// # Example
///
/// ```rust
/// use legisml::text::{FeatureType, SparseMatrixBuilder};
///
/// # fn main() -> legisml::Result<()> {
/// let builder = SparseMatrixBuilder::new(FeatureType::Count, None)?;
/// let fitted = builder.fit(&["tax bill", "bill"]);
/// assert_eq!(fitted.vocabulary().get("bill"), Some(0));
/// assert_eq!(fitted.vocabulary().get("tax"), Some(1));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrixBuilder {
    feature_type: FeatureType,
    params: VectorizerParams,
}

impl SparseMatrixBuilder {
    /// Create from a feature type and optional hyperparameter overrides.
    ///
    /// # Errors
    /// Returns a configuration error for unknown or invalid hyperparameters
    pub fn new(feature_type: FeatureType, hyperparameters: Option<&Map<String, Value>>) -> Result<Self> {
        Ok(Self {
            feature_type,
            params: VectorizerParams::resolve(feature_type, hyperparameters)?,
        })
    }

    /// Vectorizer family
    #[must_use]
    pub const fn feature_type(&self) -> FeatureType {
        self.feature_type
    }

    /// Resolved parameters
    #[must_use]
    pub const fn params(&self) -> &VectorizerParams {
        &self.params
    }

    /// Every effective hyperparameter, defaults included, as JSON
    #[must_use]
    pub fn resolved_hyperparameters(&self) -> Value {
        serde_json::to_value(&self.params).unwrap_or(Value::Null)
    }

    /// Learn the vocabulary (and idf weights) from train-side documents.
    #[must_use]
    pub fn fit(&self, documents: &[&str]) -> FittedVectorizer {
        let n_docs = documents.len();
        let mut document_frequency: HashMap<String, usize> = HashMap::new();
        let mut total_count: HashMap<String, usize> = HashMap::new();

        for document in documents {
            let mut seen = std::collections::HashSet::new();
            for term in tokenize(document, &self.params) {
                *total_count.entry(term.clone()).or_default() += 1;
                if seen.insert(term.clone()) {
                    *document_frequency.entry(term).or_default() += 1;
                }
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let max_count = self.params.max_df * n_docs as f64;
        let mut kept: Vec<(String, usize)> = document_frequency
            .into_iter()
            .filter(|(_, df)| {
                #[allow(clippy::cast_precision_loss)]
                let df_f = *df as f64;
                *df >= self.params.min_df && df_f <= max_count
            })
            .collect();

        if let Some(limit) = self.params.max_features {
            kept.sort_by(|(a, _), (b, _)| {
                total_count[b].cmp(&total_count[a]).then_with(|| a.cmp(b))
            });
            kept.truncate(limit);
        }

        kept.sort_by(|(a, _), (b, _)| a.cmp(b));

        #[allow(clippy::cast_precision_loss)]
        let idf: Vec<f64> = if self.params.use_idf {
            let n = n_docs as f64;
            kept.iter()
                .map(|(_, df)| {
                    let df = *df as f64;
                    if self.params.smooth_idf {
                        ((1.0 + n) / (1.0 + df)).ln() + 1.0
                    } else {
                        (n / df).ln() + 1.0
                    }
                })
                .collect()
        } else {
            Vec::new()
        };

        let terms = kept.into_iter().map(|(term, _)| term).collect();
        // terms come from a map, so they are unique
        let vocabulary = Vocabulary::from_terms(terms).unwrap_or_default();

        FittedVectorizer {
            feature_type: self.feature_type,
            params: self.params.clone(),
            vocabulary,
            idf,
        }
    }
}

/// A vectorizer with a learned vocabulary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedVectorizer {
    feature_type: FeatureType,
    params: VectorizerParams,
    vocabulary: Vocabulary,
    idf: Vec<f64>,
}

impl FittedVectorizer {
    /// Learned vocabulary
    #[must_use]
    pub const fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Vectorizer family
    #[must_use]
    pub const fn feature_type(&self) -> FeatureType {
        self.feature_type
    }

    /// Inverse document frequencies by column (empty without idf)
    #[must_use]
    pub fn idf(&self) -> &[f64] {
        &self.idf
    }

    /// Vectorize documents; `rows[i]` is the key of `documents[i]`.
    ///
    /// Out-of-vocabulary terms are ignored. Zero documents yield a zero-row
    /// matrix.
    ///
    /// # Errors
    /// Returns error if `rows` and `documents` differ in length or a row key
    /// repeats
    pub fn transform(&self, rows: Vec<RowKey>, documents: &[&str]) -> Result<SparseMatrix> {
        if rows.len() != documents.len() {
            return Err(Error::Codec(format!(
                "{} row keys for {} documents",
                rows.len(),
                documents.len()
            )));
        }

        let entries = documents
            .iter()
            .map(|document| self.vectorize(document))
            .collect();
        SparseMatrix::from_rows(rows, self.vocabulary.clone(), entries)
    }

    fn vectorize(&self, document: &str) -> Vec<(usize, f64)> {
        let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
        for term in tokenize(document, &self.params) {
            if let Some(column) = self.vocabulary.get(&term) {
                *counts.entry(column).or_default() += 1;
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let mut row: Vec<(usize, f64)> = counts
            .into_iter()
            .map(|(column, count)| {
                let tf = match self.feature_type {
                    FeatureType::Binary => 1.0,
                    _ if self.params.sublinear_tf => 1.0 + (count as f64).ln(),
                    _ => count as f64,
                };
                let weight = self.idf.get(column).copied().unwrap_or(1.0);
                (column, tf * weight)
            })
            .collect();

        let scale = match self.params.norm {
            Norm::Identity => None,
            Norm::L1 => Some(row.iter().map(|(_, v)| v.abs()).sum::<f64>()),
            Norm::L2 => Some(row.iter().map(|(_, v)| v * v).sum::<f64>().sqrt()),
        };
        if let Some(scale) = scale.filter(|s| *s > 0.0) {
            for (_, value) in &mut row {
                *value /= scale;
            }
        }
        row
    }

    /// Serialize for the feature-model store.
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Restore a stored vectorizer.
    ///
    /// # Errors
    /// Returns a codec error if the bytes are not a fitted vectorizer
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Codec(format!("fitted vectorizer: {e}")))
    }
}

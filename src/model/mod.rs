//! Estimators and the model grid
//!
//! Model types are resolved through an explicit [`EstimatorFactory`]
//! mapping identifiers such as `linear.LogisticRegression` to
//! constructors. Every estimator is a binary classifier over a
//! [`SparseMatrix`] that scores rows with the probability of the positive
//! class, and exports its fitted state as a [`ModelArtifact`].

mod estimators;
pub mod grid;

pub use estimators::{LogisticRegression, MultinomialNb, PriorClassifier};
pub use grid::{expand_grid, CellFailure, GridConfig, GridReport, ModelGrid};

use crate::matrix::SparseMatrix;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// A binary classifier trained on one issue area's labels
pub trait Estimator {
    /// Registered model-type identifier
    fn model_type(&self) -> &'static str;

    /// Resolved hyperparameters, defaults included
    fn hyperparameters(&self) -> Value;

    /// Fit on `matrix` with one 0/1 label per row.
    ///
    /// # Errors
    /// Returns a model error on an empty matrix or mismatched labels
    fn fit(&mut self, matrix: &SparseMatrix, labels: &[u8]) -> Result<()>;

    /// Probability of the positive class for every row.
    ///
    /// # Errors
    /// Returns a model error if the estimator is not fitted or the matrix
    /// has a different number of columns than the training matrix
    fn predict_proba(&self, matrix: &SparseMatrix) -> Result<Vec<f64>>;

    /// Fitted state as JSON.
    ///
    /// # Errors
    /// Returns a model error if the estimator is not fitted
    fn state(&self) -> Result<Value>;

    /// Restore a fitted state produced by [`Estimator::state`].
    ///
    /// # Errors
    /// Returns a model error if the state does not match this estimator
    fn load_state(&mut self, state: Value) -> Result<()>;
}

/// Serialized trained estimator, stored under `models/<model_hash>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Model-type identifier
    pub model_type: String,
    /// Resolved hyperparameters
    pub hyperparameters: Value,
    /// Fitted state
    pub state: Value,
}

impl ModelArtifact {
    /// Capture a fitted estimator.
    ///
    /// # Errors
    /// Returns a model error if the estimator is not fitted
    pub fn from_estimator(estimator: &dyn Estimator) -> Result<Self> {
        Ok(Self {
            model_type: estimator.model_type().to_string(),
            hyperparameters: estimator.hyperparameters(),
            state: estimator.state()?,
        })
    }

    /// Encode as JSON bytes.
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode JSON bytes.
    ///
    /// # Errors
    /// Returns a codec error if the bytes are not an artifact
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Codec(format!("model artifact: {e}")))
    }
}

type Constructor = fn(&Map<String, Value>) -> Result<Box<dyn Estimator>>;

/// Maps model-type identifiers to estimator constructors
#[derive(Clone)]
pub struct EstimatorFactory {
    constructors: BTreeMap<String, Constructor>,
}

impl fmt::Debug for EstimatorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EstimatorFactory")
            .field("model_types", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for EstimatorFactory {
    fn default() -> Self {
        let mut factory = Self::empty();
        factory.register(LogisticRegression::MODEL_TYPE, |hp| {
            Ok(Box::new(LogisticRegression::from_hyperparameters(hp)?))
        });
        factory.register(MultinomialNb::MODEL_TYPE, |hp| {
            Ok(Box::new(MultinomialNb::from_hyperparameters(hp)?))
        });
        factory.register(PriorClassifier::MODEL_TYPE, |hp| {
            Ok(Box::new(PriorClassifier::from_hyperparameters(hp)?))
        });
        factory
    }
}

impl EstimatorFactory {
    /// Factory with no model types
    #[must_use]
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Register (or replace) a model type
    pub fn register(&mut self, model_type: impl Into<String>, constructor: Constructor) {
        self.constructors.insert(model_type.into(), constructor);
    }

    /// Whether `model_type` is known
    #[must_use]
    pub fn contains(&self, model_type: &str) -> bool {
        self.constructors.contains_key(model_type)
    }

    /// Known model types, sorted
    pub fn model_types(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Construct an unfitted estimator.
    ///
    /// `hyperparameters` must be a JSON object (or null for defaults).
    ///
    /// # Errors
    /// Returns a config error for an unknown model type and a model error
    /// for invalid hyperparameters
    pub fn build(&self, model_type: &str, hyperparameters: &Value) -> Result<Box<dyn Estimator>> {
        let constructor = self.constructors.get(model_type).ok_or_else(|| {
            Error::Config(format!(
                "unknown model type '{model_type}' (known: {})",
                self.model_types().collect::<Vec<_>>().join(", ")
            ))
        })?;
        match hyperparameters {
            Value::Null => constructor(&Map::new()),
            Value::Object(map) => constructor(map),
            other => Err(Error::Model(format!(
                "{model_type}: hyperparameters must be an object, got {other}"
            ))),
        }
    }

    /// Rebuild a fitted estimator from a stored artifact.
    ///
    /// # Errors
    /// Returns error if the model type is unknown or the state is invalid
    pub fn load(&self, artifact: &ModelArtifact) -> Result<Box<dyn Estimator>> {
        let mut estimator = self.build(&artifact.model_type, &artifact.hyperparameters)?;
        estimator.load_state(artifact.state.clone())?;
        Ok(estimator)
    }
}

/// Typed reader over a hyperparameter object that rejects unknown keys
pub(crate) struct HyperParams<'a> {
    model_type: &'static str,
    values: &'a Map<String, Value>,
    seen: Vec<&'static str>,
}

impl<'a> HyperParams<'a> {
    pub(crate) const fn new(model_type: &'static str, values: &'a Map<String, Value>) -> Self {
        Self {
            model_type,
            values,
            seen: Vec::new(),
        }
    }

    fn invalid(&self, key: &str, expected: &str, got: &Value) -> Error {
        Error::Model(format!(
            "{}: hyperparameter '{key}' must be {expected}, got {got}",
            self.model_type
        ))
    }

    fn lookup(&mut self, key: &'static str) -> Option<&'a Value> {
        self.seen.push(key);
        self.values.get(key)
    }

    pub(crate) fn f64(&mut self, key: &'static str, default: f64) -> Result<f64> {
        match self.lookup(key) {
            None => Ok(default),
            Some(v) => v
                .as_f64()
                .filter(|x| x.is_finite())
                .ok_or_else(|| self.invalid(key, "a finite number", v)),
        }
    }

    pub(crate) fn usize(&mut self, key: &'static str, default: usize) -> Result<usize> {
        match self.lookup(key) {
            None => Ok(default),
            Some(v) => v
                .as_u64()
                .and_then(|x| usize::try_from(x).ok())
                .ok_or_else(|| self.invalid(key, "a non-negative integer", v)),
        }
    }

    pub(crate) fn bool(&mut self, key: &'static str, default: bool) -> Result<bool> {
        match self.lookup(key) {
            None => Ok(default),
            Some(v) => v
                .as_bool()
                .ok_or_else(|| self.invalid(key, "a boolean", v)),
        }
    }

    pub(crate) fn string(&mut self, key: &'static str, default: &str) -> Result<String> {
        match self.lookup(key) {
            None => Ok(default.to_string()),
            Some(v) => v
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| self.invalid(key, "a string", v)),
        }
    }

    /// Fail on keys that were never read
    pub(crate) fn finish(self) -> Result<()> {
        let unknown: Vec<&str> = self
            .values
            .keys()
            .map(String::as_str)
            .filter(|k| !self.seen.iter().any(|s| s == k))
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(Error::Model(format!(
                "{}: unknown hyperparameters: {}",
                self.model_type,
                unknown.join(", ")
            )))
        }
    }
}

pub(crate) fn check_training_input(
    model_type: &str,
    matrix: &SparseMatrix,
    labels: &[u8],
) -> Result<()> {
    if matrix.n_rows() == 0 {
        return Err(Error::Model(format!(
            "{model_type}: cannot fit on an empty matrix"
        )));
    }
    if labels.len() != matrix.n_rows() {
        return Err(Error::Model(format!(
            "{model_type}: {} labels for {} rows",
            labels.len(),
            matrix.n_rows()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{RowKey, Vocabulary};
    use chrono::NaiveDate;
    use serde_json::json;

    fn toy_matrix() -> (SparseMatrix, Vec<u8>) {
        let date = NaiveDate::from_ymd_opt(2019, 1, 1).unwrap();
        let keys: Vec<RowKey> = (0..4).map(|i| RowKey::new(i, date)).collect();
        let vocabulary =
            Vocabulary::from_terms(vec!["abortion".into(), "tax".into()]).unwrap();
        let matrix = SparseMatrix::from_triplets(
            keys,
            vocabulary,
            [(0, 0, 2.0), (1, 0, 1.0), (2, 1, 1.0), (3, 1, 3.0)],
        )
        .unwrap();
        (matrix, vec![1, 1, 0, 0])
    }

    #[test]
    fn test_factory_knows_builtin_types() {
        let factory = EstimatorFactory::default();
        let types: Vec<_> = factory.model_types().collect();
        assert_eq!(
            types,
            vec![
                "baseline.PriorClassifier",
                "linear.LogisticRegression",
                "naive_bayes.MultinomialNB"
            ]
        );
        assert!(!factory.contains("sklearn.ensemble.RandomForestClassifier"));
    }

    #[test]
    fn test_unknown_model_type_is_config_error() {
        let err = EstimatorFactory::default()
            .build("tree.DecisionTree", &json!({}))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_unknown_hyperparameter_is_model_error() {
        let err = EstimatorFactory::default()
            .build("linear.LogisticRegression", &json!({"penalty": "l1"}))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Model(ref m) if m.contains("penalty")));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_artifact_round_trip_preserves_scores() {
        let factory = EstimatorFactory::default();
        let (matrix, labels) = toy_matrix();
        for model_type in ["linear.LogisticRegression", "naive_bayes.MultinomialNB"] {
            let mut estimator = factory.build(model_type, &Value::Null).unwrap();
            estimator.fit(&matrix, &labels).unwrap();
            let before = estimator.predict_proba(&matrix).unwrap();

            let artifact = ModelArtifact::from_estimator(estimator.as_ref()).unwrap();
            let bytes = artifact.to_bytes().unwrap();
            let restored = factory
                .load(&ModelArtifact::from_bytes(&bytes).unwrap())
                .unwrap();
            assert_eq!(restored.predict_proba(&matrix).unwrap(), before);
        }
    }

    #[test]
    fn test_empty_matrix_cannot_be_fitted() {
        let factory = EstimatorFactory::default();
        let empty = SparseMatrix::empty(Vocabulary::default());
        for model_type in factory.model_types() {
            let mut estimator = factory.build(model_type, &Value::Null).unwrap();
            assert!(matches!(estimator.fit(&empty, &[]), Err(Error::Model(_))));
        }
    }
}

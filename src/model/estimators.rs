//! Built-in estimators

use super::{check_training_input, Estimator, HyperParams};
use crate::matrix::{SparseMatrix, SparseRow};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;
use trueno::Vector;

fn squared_norm(values: &[f32]) -> Result<f64> {
    if values.is_empty() {
        return Ok(0.0);
    }
    let v = Vector::from_slice(values);
    v.dot(&v)
        .map(f64::from)
        .map_err(|e| Error::Model(format!("dot product failed: {e}")))
}

fn total(values: &[f32]) -> Result<f64> {
    if values.is_empty() {
        return Ok(0.0);
    }
    Vector::from_slice(values)
        .sum()
        .map(f64::from)
        .map_err(|e| Error::Model(format!("sum failed: {e}")))
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn not_fitted(model_type: &str) -> Error {
    Error::Model(format!("{model_type}: estimator is not fitted"))
}

fn check_columns(model_type: &str, expected: usize, matrix: &SparseMatrix) -> Result<()> {
    if matrix.n_cols() == expected {
        Ok(())
    } else {
        Err(Error::Model(format!(
            "{model_type}: fitted on {expected} columns, matrix has {}",
            matrix.n_cols()
        )))
    }
}

fn bad_state(model_type: &str, e: &serde_json::Error) -> Error {
    Error::Model(format!("{model_type}: invalid state: {e}"))
}

// ============================================================
// linear.LogisticRegression
// ============================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LinearState {
    weights: Vec<f32>,
    intercept: f32,
}

impl LinearState {
    fn decision(&self, row: &SparseRow<'_>) -> f64 {
        row.iter()
            .map(|(column, value)| f64::from(self.weights[column]) * value)
            .sum::<f64>()
            + f64::from(self.intercept)
    }
}

/// L2-regularized logistic regression fitted by batch gradient descent.
///
/// Minimizes the mean log-loss plus `||w||² / (2·C·n)`. Iteration stops
/// after `max_iter` steps or once the gradient norm drops below `tol`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticRegression {
    c: f64,
    max_iter: usize,
    learning_rate: f64,
    tol: f64,
    fit_intercept: bool,
    state: Option<LinearState>,
}

impl LogisticRegression {
    /// Model-type identifier
    pub const MODEL_TYPE: &'static str = "linear.LogisticRegression";

    /// Construct from a hyperparameter object.
    ///
    /// Recognized keys: `C` (> 0, default 1.0), `max_iter` (default 100),
    /// `learning_rate` (default 0.5), `tol` (default 1e-4),
    /// `fit_intercept` (default true).
    ///
    /// # Errors
    /// Returns a model error for unknown keys or out-of-range values
    pub fn from_hyperparameters(hyperparameters: &Map<String, Value>) -> Result<Self> {
        let mut hp = HyperParams::new(Self::MODEL_TYPE, hyperparameters);
        let model = Self {
            c: hp.f64("C", 1.0)?,
            max_iter: hp.usize("max_iter", 100)?,
            learning_rate: hp.f64("learning_rate", 0.5)?,
            tol: hp.f64("tol", 1e-4)?,
            fit_intercept: hp.bool("fit_intercept", true)?,
            state: None,
        };
        hp.finish()?;

        if model.c <= 0.0 {
            return Err(Error::Model(format!(
                "{}: C must be positive, got {}",
                Self::MODEL_TYPE,
                model.c
            )));
        }
        if model.learning_rate <= 0.0 {
            return Err(Error::Model(format!(
                "{}: learning_rate must be positive",
                Self::MODEL_TYPE
            )));
        }
        if model.max_iter == 0 || model.tol < 0.0 {
            return Err(Error::Model(format!(
                "{}: max_iter must be at least 1 and tol non-negative",
                Self::MODEL_TYPE
            )));
        }
        Ok(model)
    }
}

impl Estimator for LogisticRegression {
    fn model_type(&self) -> &'static str {
        Self::MODEL_TYPE
    }

    fn hyperparameters(&self) -> Value {
        json!({
            "C": self.c,
            "max_iter": self.max_iter,
            "learning_rate": self.learning_rate,
            "tol": self.tol,
            "fit_intercept": self.fit_intercept,
        })
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn fit(&mut self, matrix: &SparseMatrix, labels: &[u8]) -> Result<()> {
        check_training_input(Self::MODEL_TYPE, matrix, labels)?;
        let n = matrix.n_rows() as f64;
        let penalty = 1.0 / (self.c * n);

        let mut state = LinearState {
            weights: vec![0.0; matrix.n_cols()],
            intercept: 0.0,
        };
        let mut gradient = vec![0.0_f32; matrix.n_cols()];
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iter {
            iterations += 1;
            gradient.fill(0.0);
            let mut intercept_gradient = 0.0;

            for (row, &label) in matrix.rows().zip(labels) {
                let error = sigmoid(state.decision(&row)) - f64::from(label);
                for (column, value) in row.iter() {
                    gradient[column] += (error * value) as f32;
                }
                intercept_gradient += error;
            }

            for (g, &w) in gradient.iter_mut().zip(&state.weights) {
                *g = (f64::from(*g) / n + penalty * f64::from(w)) as f32;
            }
            intercept_gradient = if self.fit_intercept {
                intercept_gradient / n
            } else {
                0.0
            };

            for (w, &g) in state.weights.iter_mut().zip(&gradient) {
                *w -= (self.learning_rate * f64::from(g)) as f32;
            }
            state.intercept -= (self.learning_rate * intercept_gradient) as f32;

            let norm = (squared_norm(&gradient)? + intercept_gradient * intercept_gradient).sqrt();
            if !norm.is_finite() {
                return Err(Error::Model(format!(
                    "{}: gradient diverged after {iterations} iterations",
                    Self::MODEL_TYPE
                )));
            }
            if norm < self.tol {
                converged = true;
                break;
            }
        }

        debug!(
            model_type = Self::MODEL_TYPE,
            iterations, converged, "fitted estimator"
        );
        self.state = Some(state);
        Ok(())
    }

    fn predict_proba(&self, matrix: &SparseMatrix) -> Result<Vec<f64>> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| not_fitted(Self::MODEL_TYPE))?;
        check_columns(Self::MODEL_TYPE, state.weights.len(), matrix)?;
        Ok(matrix
            .rows()
            .map(|row| sigmoid(state.decision(&row)))
            .collect())
    }

    fn state(&self) -> Result<Value> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| not_fitted(Self::MODEL_TYPE))?;
        Ok(serde_json::to_value(state)?)
    }

    fn load_state(&mut self, state: Value) -> Result<()> {
        let state: LinearState =
            serde_json::from_value(state).map_err(|e| bad_state(Self::MODEL_TYPE, &e))?;
        self.state = Some(state);
        Ok(())
    }
}

// ============================================================
// naive_bayes.MultinomialNB
// ============================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct NbState {
    class_count: [f64; 2],
    feature_count: [Vec<f32>; 2],
}

/// Multinomial naive Bayes with additive smoothing
#[derive(Debug, Clone, PartialEq)]
pub struct MultinomialNb {
    alpha: f64,
    state: Option<NbState>,
}

impl MultinomialNb {
    /// Model-type identifier
    pub const MODEL_TYPE: &'static str = "naive_bayes.MultinomialNB";

    /// Construct from a hyperparameter object: `alpha` (> 0, default 1.0).
    ///
    /// # Errors
    /// Returns a model error for unknown keys or a non-positive alpha
    pub fn from_hyperparameters(hyperparameters: &Map<String, Value>) -> Result<Self> {
        let mut hp = HyperParams::new(Self::MODEL_TYPE, hyperparameters);
        let alpha = hp.f64("alpha", 1.0)?;
        hp.finish()?;
        if alpha <= 0.0 {
            return Err(Error::Model(format!(
                "{}: alpha must be positive, got {alpha}",
                Self::MODEL_TYPE
            )));
        }
        Ok(Self { alpha, state: None })
    }

    #[allow(clippy::cast_precision_loss)]
    fn feature_log_prob(&self, feature_count: &[f32]) -> Result<Vec<f64>> {
        let denominator = total(feature_count)? + self.alpha * feature_count.len() as f64;
        Ok(feature_count
            .iter()
            .map(|&count| ((f64::from(count) + self.alpha) / denominator).ln())
            .collect())
    }
}

impl Estimator for MultinomialNb {
    fn model_type(&self) -> &'static str {
        Self::MODEL_TYPE
    }

    fn hyperparameters(&self) -> Value {
        json!({ "alpha": self.alpha })
    }

    #[allow(clippy::cast_possible_truncation)]
    fn fit(&mut self, matrix: &SparseMatrix, labels: &[u8]) -> Result<()> {
        check_training_input(Self::MODEL_TYPE, matrix, labels)?;
        let mut state = NbState {
            class_count: [0.0; 2],
            feature_count: [vec![0.0; matrix.n_cols()], vec![0.0; matrix.n_cols()]],
        };
        for (row, &label) in matrix.rows().zip(labels) {
            let class = usize::from(label != 0);
            state.class_count[class] += 1.0;
            for (column, value) in row.iter() {
                if value < 0.0 {
                    return Err(Error::Model(format!(
                        "{}: negative feature value {value} in column {column}",
                        Self::MODEL_TYPE
                    )));
                }
                state.feature_count[class][column] += value as f32;
            }
        }
        debug!(
            model_type = Self::MODEL_TYPE,
            negatives = state.class_count[0],
            positives = state.class_count[1],
            "fitted estimator"
        );
        self.state = Some(state);
        Ok(())
    }

    fn predict_proba(&self, matrix: &SparseMatrix) -> Result<Vec<f64>> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| not_fitted(Self::MODEL_TYPE))?;
        check_columns(Self::MODEL_TYPE, state.feature_count[0].len(), matrix)?;

        let n = state.class_count[0] + state.class_count[1];
        let log_prior = state.class_count.map(|count| (count / n).ln());
        let log_prob = [
            self.feature_log_prob(&state.feature_count[0])?,
            self.feature_log_prob(&state.feature_count[1])?,
        ];

        Ok(matrix
            .rows()
            .map(|row| {
                let joint = [0, 1].map(|class| {
                    log_prior[class]
                        + row
                            .iter()
                            .map(|(column, value)| value * log_prob[class][column])
                            .sum::<f64>()
                });
                sigmoid(joint[1] - joint[0])
            })
            .collect())
    }

    fn state(&self) -> Result<Value> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| not_fitted(Self::MODEL_TYPE))?;
        Ok(serde_json::to_value(state)?)
    }

    fn load_state(&mut self, state: Value) -> Result<()> {
        let state: NbState =
            serde_json::from_value(state).map_err(|e| bad_state(Self::MODEL_TYPE, &e))?;
        if state.feature_count[0].len() != state.feature_count[1].len() {
            return Err(Error::Model(format!(
                "{}: invalid state: class feature counts differ in length",
                Self::MODEL_TYPE
            )));
        }
        self.state = Some(state);
        Ok(())
    }
}

// ============================================================
// baseline.PriorClassifier
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PriorStrategy {
    Prior,
    Constant,
}

/// Scores every row with the training positive rate, or a fixed constant
#[derive(Debug, Clone, PartialEq)]
pub struct PriorClassifier {
    strategy: PriorStrategy,
    constant: f64,
    positive_rate: Option<f64>,
}

impl PriorClassifier {
    /// Model-type identifier
    pub const MODEL_TYPE: &'static str = "baseline.PriorClassifier";

    /// Construct from a hyperparameter object: `strategy` (`prior` or
    /// `constant`, default `prior`) and `constant` (in `[0, 1]`, default 0.5).
    ///
    /// # Errors
    /// Returns a model error for unknown keys or values
    pub fn from_hyperparameters(hyperparameters: &Map<String, Value>) -> Result<Self> {
        let mut hp = HyperParams::new(Self::MODEL_TYPE, hyperparameters);
        let strategy = match hp.string("strategy", "prior")?.as_str() {
            "prior" => PriorStrategy::Prior,
            "constant" => PriorStrategy::Constant,
            other => {
                return Err(Error::Model(format!(
                    "{}: unknown strategy '{other}' (expected prior or constant)",
                    Self::MODEL_TYPE
                )))
            }
        };
        let constant = hp.f64("constant", 0.5)?;
        hp.finish()?;
        if !(0.0..=1.0).contains(&constant) {
            return Err(Error::Model(format!(
                "{}: constant must lie in [0, 1], got {constant}",
                Self::MODEL_TYPE
            )));
        }
        Ok(Self {
            strategy,
            constant,
            positive_rate: None,
        })
    }
}

impl Estimator for PriorClassifier {
    fn model_type(&self) -> &'static str {
        Self::MODEL_TYPE
    }

    fn hyperparameters(&self) -> Value {
        let strategy = match self.strategy {
            PriorStrategy::Prior => "prior",
            PriorStrategy::Constant => "constant",
        };
        json!({ "strategy": strategy, "constant": self.constant })
    }

    #[allow(clippy::cast_precision_loss)]
    fn fit(&mut self, matrix: &SparseMatrix, labels: &[u8]) -> Result<()> {
        check_training_input(Self::MODEL_TYPE, matrix, labels)?;
        let rate = match self.strategy {
            PriorStrategy::Prior => {
                labels.iter().filter(|&&l| l != 0).count() as f64 / labels.len() as f64
            }
            PriorStrategy::Constant => self.constant,
        };
        self.positive_rate = Some(rate);
        Ok(())
    }

    fn predict_proba(&self, matrix: &SparseMatrix) -> Result<Vec<f64>> {
        let rate = self
            .positive_rate
            .ok_or_else(|| not_fitted(Self::MODEL_TYPE))?;
        Ok(vec![rate; matrix.n_rows()])
    }

    fn state(&self) -> Result<Value> {
        let rate = self
            .positive_rate
            .ok_or_else(|| not_fitted(Self::MODEL_TYPE))?;
        Ok(json!({ "positive_rate": rate }))
    }

    fn load_state(&mut self, state: Value) -> Result<()> {
        let rate = state
            .get("positive_rate")
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                Error::Model(format!(
                    "{}: invalid state: missing positive_rate",
                    Self::MODEL_TYPE
                ))
            })?;
        self.positive_rate = Some(rate);
        Ok(())
    }
}

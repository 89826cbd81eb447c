//! Hyperparameter grid training
//!
//! The grid is walked issue area → model type → hyperparameter
//! combination → time split. One model group row is written per
//! combination, one model row per cell. A cell whose failure is
//! recoverable (missing matrix, invalid hyperparameter, estimator error)
//! is logged and skipped; registry failures abort the grid.

use super::{EstimatorFactory, ModelArtifact};
use crate::blob::StorageArea;
use crate::evaluation::EvaluationConfig;
use crate::labels::IssueArea;
use crate::matrix::{MatrixStore, MatrixType, StoredMatrix};
use crate::registry::{
    hashing, EvaluationRecord, MatrixPair, MatrixRef, PredictionRecord, PredictionTable, Registry,
};
use crate::{Error, Result};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use tracing::{debug, info, warn};

/// Model type → hyperparameter name → candidate values
pub type GridConfig = BTreeMap<String, BTreeMap<String, Vec<Value>>>;

/// Cartesian product of a hyperparameter grid.
///
/// Keys are iterated in sorted order, so the combination order is
/// deterministic. An empty grid yields a single empty combination; a key
/// with no candidate values yields none.
///
/// # Example
///
/// ```rust
/// use legisml::model::expand_grid;
/// use serde_json::json;
/// use std::collections::BTreeMap;
///
/// let grid = BTreeMap::from([
///     ("a".to_string(), vec![json!(1), json!(2)]),
///     ("b".to_string(), vec![json!("x"), json!("y")]),
/// ]);
/// let combos = expand_grid(&grid);
/// assert_eq!(combos.len(), 4);
/// assert_eq!(combos[1], json!({"a": 1, "b": "y"}));
/// ```
#[must_use]
pub fn expand_grid(grid: &BTreeMap<String, Vec<Value>>) -> Vec<Value> {
    let mut combos: Vec<Map<String, Value>> = vec![Map::new()];
    for (name, candidates) in grid {
        combos = combos
            .into_iter()
            .flat_map(|combo| {
                candidates.iter().map(move |value| {
                    let mut next = combo.clone();
                    next.insert(name.clone(), value.clone());
                    next
                })
            })
            .collect();
    }
    combos.into_iter().map(Value::Object).collect()
}

/// A grid cell that was skipped
#[derive(Debug, Clone, PartialEq)]
pub struct CellFailure {
    /// Target label
    pub issue_area: IssueArea,
    /// Model type
    pub model_type: String,
    /// Hyperparameter combination
    pub hyperparameters: Value,
    /// Split index
    pub time_split_index: usize,
    /// Rendered error
    pub error: String,
}

/// Outcome of a grid run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridReport {
    /// Cells started
    pub cells_attempted: usize,
    /// Cells that wrote their predictions
    pub cells_succeeded: usize,
    /// Cells skipped after a recoverable error
    pub failures: Vec<CellFailure>,
    /// Prediction rows written, train and test
    pub predictions_written: usize,
    /// Cells that loaded a stored model instead of fitting
    pub models_reused: usize,
}

impl GridReport {
    /// Whether every attempted cell succeeded
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Default)]
struct MatrixCache {
    loaded: HashMap<MatrixRef, Rc<StoredMatrix>>,
}

impl MatrixCache {
    fn load(&mut self, store: &MatrixStore, matrix: &MatrixRef) -> Result<Rc<StoredMatrix>> {
        if let Some(hit) = self.loaded.get(matrix) {
            return Ok(Rc::clone(hit));
        }
        debug!(matrix_uuid = %matrix.uuid, "loading matrix");
        let stored = Rc::new(store.read(&matrix.uuid, matrix.format)?);
        self.loaded.insert(matrix.clone(), Rc::clone(&stored));
        Ok(stored)
    }
}

struct Cell<'c> {
    issue_area: IssueArea,
    model_type: &'c str,
    hyperparameters: &'c Value,
    model_group_id: i64,
    pair: &'c MatrixPair,
}

struct CellOutcome {
    predictions: usize,
    reused: bool,
}

/// Trains every grid cell against cached matrix pairs
#[derive(Debug)]
pub struct ModelGrid<'a> {
    registry: &'a Registry,
    matrices: &'a MatrixStore,
    factory: &'a EstimatorFactory,
    experiment_hash: String,
    grid: GridConfig,
    issue_areas: Vec<IssueArea>,
    evaluation: Option<EvaluationConfig>,
}

impl<'a> ModelGrid<'a> {
    /// Create an empty grid for `experiment_hash`
    #[must_use]
    pub fn new(
        registry: &'a Registry,
        matrices: &'a MatrixStore,
        factory: &'a EstimatorFactory,
        experiment_hash: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            matrices,
            factory,
            experiment_hash: experiment_hash.into(),
            grid: GridConfig::new(),
            issue_areas: Vec::new(),
            evaluation: None,
        }
    }

    /// Set the hyperparameter grid
    #[must_use]
    pub fn with_grid(mut self, grid: GridConfig) -> Self {
        self.grid = grid;
        self
    }

    /// Set the issue areas to train
    #[must_use]
    pub fn with_issue_areas(mut self, issue_areas: Vec<IssueArea>) -> Self {
        self.issue_areas = issue_areas;
        self
    }

    /// Evaluate every scored matrix
    #[must_use]
    pub fn with_evaluation(mut self, evaluation: Option<EvaluationConfig>) -> Self {
        self.evaluation = evaluation;
        self
    }

    /// Train and score every cell over `pairs`.
    ///
    /// # Errors
    /// Returns error on registry failures or an unknown model type;
    /// recoverable cell failures are collected in the report instead
    pub fn run(&self, pairs: &[MatrixPair]) -> Result<GridReport> {
        let mut report = GridReport::default();
        let mut cache = MatrixCache::default();

        for &issue_area in &self.issue_areas {
            info!(issue_area = %issue_area, "running model grid");
            for (model_type, hp_grid) in &self.grid {
                if !self.factory.contains(model_type) {
                    return Err(Error::Config(format!("unknown model type '{model_type}'")));
                }
                for hyperparameters in expand_grid(hp_grid) {
                    let model_group_id = self.registry.register_model_group(
                        model_type,
                        &hyperparameters,
                        &self.experiment_hash,
                    )?;
                    info!(
                        model_group_id,
                        model_type = %model_type,
                        hyperparameters = %hyperparameters,
                        "processing model group"
                    );

                    for pair in pairs {
                        report.cells_attempted += 1;
                        let cell = Cell {
                            issue_area,
                            model_type,
                            hyperparameters: &hyperparameters,
                            model_group_id,
                            pair,
                        };
                        match self.run_cell(&mut cache, &cell) {
                            Ok(outcome) => {
                                report.cells_succeeded += 1;
                                report.predictions_written += outcome.predictions;
                                report.models_reused += usize::from(outcome.reused);
                            }
                            Err(e) if e.is_recoverable() => {
                                warn!(
                                    issue_area = %issue_area,
                                    model_type = %model_type,
                                    hyperparameters = %hyperparameters,
                                    time_split_index = pair.time_split_index,
                                    error = %e,
                                    "skipping grid cell"
                                );
                                report.failures.push(CellFailure {
                                    issue_area,
                                    model_type: model_type.clone(),
                                    hyperparameters: hyperparameters.clone(),
                                    time_split_index: pair.time_split_index,
                                    error: e.to_string(),
                                });
                            }
                            Err(e) => return Err(e),
                        }
                    }
                }
            }
        }

        info!(
            attempted = report.cells_attempted,
            succeeded = report.cells_succeeded,
            skipped = report.failures.len(),
            predictions = report.predictions_written,
            "model grid finished"
        );
        Ok(report)
    }

    fn run_cell(&self, cache: &mut MatrixCache, cell: &Cell<'_>) -> Result<CellOutcome> {
        let pair = cell.pair;
        let model_hash = hashing::model_hash(
            cell.model_type,
            &pair.train.uuid,
            cell.hyperparameters,
            cell.issue_area,
        );
        let model_id = self.registry.register_model(
            &model_hash,
            cell.model_group_id,
            &self.experiment_hash,
            &pair.train.uuid,
            cell.issue_area,
        )?;
        debug!(model_id, model_hash = %model_hash, time_split_index = pair.time_split_index, "model registered");

        let train = cache.load(self.matrices, &pair.train)?;
        let train_labels = train.label_column(cell.issue_area)?;

        let storage = self.matrices.storage();
        let (estimator, reused) = if storage.exists(StorageArea::Models, &model_hash)? {
            let bytes = storage.get(StorageArea::Models, &model_hash)?;
            let estimator = self.factory.load(&ModelArtifact::from_bytes(&bytes)?)?;
            info!(model_id, "reusing stored model");
            (estimator, true)
        } else {
            let mut estimator = self.factory.build(cell.model_type, cell.hyperparameters)?;
            info!(model_id, rows = train.matrix.n_rows(), "training model");
            estimator.fit(&train.matrix, &train_labels)?;
            let artifact = ModelArtifact::from_estimator(estimator.as_ref())?;
            storage.put(StorageArea::Models, &model_hash, artifact.to_bytes()?)?;
            (estimator, false)
        };

        let test = cache.load(self.matrices, &pair.test)?;
        let test_labels = test.label_column(cell.issue_area)?;

        // Score both sides before writing so a scoring failure leaves no rows
        let train_scores = estimator.predict_proba(&train.matrix)?;
        let test_scores = estimator.predict_proba(&test.matrix)?;

        let mut predictions = 0;
        for (matrix_type, stored, labels, scores) in [
            (MatrixType::Train, &train, &train_labels, &train_scores),
            (MatrixType::Test, &test, &test_labels, &test_scores),
        ] {
            let matrix_uuid = match matrix_type {
                MatrixType::Train => &pair.train.uuid,
                MatrixType::Test => &pair.test.uuid,
            };
            predictions += self.write_scores(
                cell,
                model_id,
                matrix_uuid,
                PredictionTable::from(matrix_type),
                stored,
                labels,
                scores,
            )?;
        }

        Ok(CellOutcome {
            predictions,
            reused,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn write_scores(
        &self,
        cell: &Cell<'_>,
        model_id: i64,
        matrix_uuid: &str,
        table: PredictionTable,
        stored: &StoredMatrix,
        labels: &[u8],
        scores: &[f64],
    ) -> Result<usize> {
        let rows: Vec<PredictionRecord> = stored
            .matrix
            .row_keys()
            .iter()
            .zip(labels)
            .zip(scores)
            .map(|((key, &label_value), &score)| PredictionRecord {
                entity_id: key.entity_id,
                as_of_date: key.as_of_date,
                model_id,
                matrix_uuid: matrix_uuid.to_string(),
                experiment_hash: self.experiment_hash.clone(),
                issue_area: cell.issue_area,
                label_value,
                score,
            })
            .collect();
        let written = self.registry.write_predictions(table, &rows)?;

        if let Some(evaluation) = &self.evaluation {
            let records: Vec<EvaluationRecord> = evaluation
                .evaluate(scores, labels)
                .into_iter()
                .map(|m| EvaluationRecord {
                    model_id,
                    matrix_uuid: matrix_uuid.to_string(),
                    experiment_hash: self.experiment_hash.clone(),
                    issue_area: cell.issue_area,
                    metric: m.metric.to_string(),
                    parameter: m.parameter,
                    value: m.value,
                })
                .collect();
            self.registry.write_evaluations(&records)?;
        }
        Ok(written)
    }
}

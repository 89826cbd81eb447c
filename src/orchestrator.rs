//! Experiment orchestration
//!
//! One [`ExperimentOrchestrator::run`] call registers the experiment,
//! appends a `started` run row, builds (or reuses) the train/test matrices
//! of every time split, hands the matrix pairs to the [`ModelGrid`] and
//! records the final run status. A non-recoverable error marks the run
//! `failed` and is returned to the caller.

use crate::blob::{ProjectStorage, StorageArea};
use crate::cohort::CohortResolver;
use crate::config::ExperimentConfig;
use crate::labels::{LabelJoiner, LabelTable, LabeledDocument};
use crate::matrix::{MatrixStore, MatrixType, RowKey, SparseMatrix};
use crate::model::{EstimatorFactory, GridReport, ModelGrid};
use crate::registry::{
    hashing, FeatureGroup, MatrixMetadata, MatrixPair, MatrixRecord, MatrixRef, Registry,
    RunRecord, RunStatus,
};
use crate::temporal::{TemporalChopper, TimeSplit};
use crate::text::{
    DocumentKey, FittedVectorizer, SparseMatrixBuilder, TextPreprocessor, TextRetriever,
    TextSource,
};
use crate::{Error, Result};
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

/// Upstream collaborators used to build matrices
pub struct DataSources {
    /// Cohort membership
    pub cohort: Box<dyn CohortResolver>,
    /// Documents and labels
    pub labels: Box<dyn LabelJoiner>,
    /// Document text
    pub text: Box<dyn TextSource>,
}

impl std::fmt::Debug for DataSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSources").finish_non_exhaustive()
    }
}

/// Where the matrix pairs of a run come from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MatrixSource {
    /// Build every split (with cache hits on already-stored matrices)
    #[default]
    Build,
    /// Reuse the matrices registered by an earlier experiment
    ReuseFrom(String),
}

/// Outcome of one run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Experiment identity
    pub experiment_hash: String,
    /// Run row id
    pub run_id: i64,
    /// Final status
    pub status: RunStatus,
    /// Matrix pairs handed to the grid
    pub matrix_pairs: Vec<MatrixPair>,
    /// Splits whose matrices were already stored
    pub splits_reused: usize,
    /// Splits skipped after a recoverable error
    pub splits_skipped: usize,
    /// Grid outcome
    pub grid: GridReport,
}

enum Inputs {
    Splits(Vec<TimeSplit>),
    Pairs(Vec<MatrixPair>),
}

/// Builds an [`ExperimentOrchestrator`]
pub struct ExperimentOrchestratorBuilder {
    config: ExperimentConfig,
    registry: Registry,
    storage: ProjectStorage,
    chopper: Option<Box<dyn TemporalChopper>>,
    sources: Option<DataSources>,
    factory: EstimatorFactory,
    matrix_source: MatrixSource,
    log_location: Option<String>,
}

impl ExperimentOrchestratorBuilder {
    /// Temporal split service
    #[must_use]
    pub fn chopper(mut self, chopper: Box<dyn TemporalChopper>) -> Self {
        self.chopper = Some(chopper);
        self
    }

    /// Upstream data sources
    #[must_use]
    pub fn sources(mut self, sources: DataSources) -> Self {
        self.sources = Some(sources);
        self
    }

    /// Estimator factory (defaults to the built-in model types)
    #[must_use]
    pub fn factory(mut self, factory: EstimatorFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Skip matrix building and reuse another experiment's matrices
    #[must_use]
    pub fn reuse_matrices_from(mut self, experiment_hash: impl Into<String>) -> Self {
        self.matrix_source = MatrixSource::ReuseFrom(experiment_hash.into());
        self
    }

    /// Run-scoped log file recorded on the run row
    #[must_use]
    pub fn log_location(mut self, path: impl Into<String>) -> Self {
        self.log_location = Some(path.into());
        self
    }

    /// Validate the configuration and assemble the orchestrator.
    ///
    /// # Errors
    /// Returns a configuration error if the config is invalid, or if
    /// matrices are to be built without a chopper or data sources
    pub fn build(self) -> Result<ExperimentOrchestrator> {
        self.config.validate(&self.factory)?;
        if self.matrix_source == MatrixSource::Build {
            if self.chopper.is_none() {
                return Err(Error::Config(
                    "building matrices requires a temporal chopper".to_string(),
                ));
            }
            if self.sources.is_none() {
                return Err(Error::Config(
                    "building matrices requires cohort, label and text sources".to_string(),
                ));
            }
        }
        Ok(ExperimentOrchestrator {
            matrices: MatrixStore::new(self.storage),
            config: self.config,
            registry: self.registry,
            chopper: self.chopper,
            sources: self.sources,
            factory: self.factory,
            matrix_source: self.matrix_source,
            log_location: self.log_location,
        })
    }
}

/// Top-level experiment controller
pub struct ExperimentOrchestrator {
    config: ExperimentConfig,
    registry: Registry,
    matrices: MatrixStore,
    chopper: Option<Box<dyn TemporalChopper>>,
    sources: Option<DataSources>,
    factory: EstimatorFactory,
    matrix_source: MatrixSource,
    log_location: Option<String>,
}

impl ExperimentOrchestrator {
    /// Start building an orchestrator
    #[must_use]
    pub fn builder(
        config: ExperimentConfig,
        registry: Registry,
        storage: ProjectStorage,
    ) -> ExperimentOrchestratorBuilder {
        ExperimentOrchestratorBuilder {
            config,
            registry,
            storage,
            chopper: None,
            sources: None,
            factory: EstimatorFactory::default(),
            matrix_source: MatrixSource::Build,
            log_location: None,
        }
    }

    /// The provenance registry
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The matrix store
    #[must_use]
    pub const fn matrices(&self) -> &MatrixStore {
        &self.matrices
    }

    /// Run the experiment once.
    ///
    /// # Errors
    /// Returns error if the inputs cannot be resolved, a registry write
    /// fails, or any other non-recoverable error occurs; in the latter
    /// cases the run row is marked `failed` first
    pub fn run(&self) -> Result<RunSummary> {
        let inputs = match &self.matrix_source {
            MatrixSource::Build => {
                let chopper = self
                    .chopper
                    .as_ref()
                    .ok_or_else(|| Error::Config("no temporal chopper".to_string()))?;
                Inputs::Splits(chopper.chop(&self.config.temporal_config)?)
            }
            MatrixSource::ReuseFrom(hash) => {
                let pairs = self.registry.matrix_pairs(hash)?;
                if pairs.is_empty() {
                    return Err(Error::RegistryLookup(format!(
                        "experiment {hash} has no registered matrices"
                    )));
                }
                Inputs::Pairs(pairs)
            }
        };
        let split_count = match &inputs {
            Inputs::Splits(splits) => splits.len(),
            Inputs::Pairs(pairs) => pairs.len(),
        };

        let experiment_hash = self
            .registry
            .register_experiment(&self.config.to_value()?, split_count)?;
        let mut run = RunRecord::builder(
            experiment_hash.clone(),
            self.matrices.storage().location().to_string(),
        );
        if let Some(log) = &self.log_location {
            run = run.log_location(log.clone());
        }
        let run = self.registry.start_run(&run.build())?;
        let run_id = run
            .run_id()
            .ok_or_else(|| Error::registry_write("experiment_runs", "run row has no id"))?;
        info!(experiment_hash = %experiment_hash, run_id, splits = split_count, "experiment run started");

        match self.run_body(&experiment_hash, run_id, inputs) {
            Ok(summary) => {
                self.registry.finish_run(run_id, summary.status)?;
                Ok(summary)
            }
            Err(e) => {
                error!(run_id, error = %e, "experiment run failed");
                if let Err(mark) = self.registry.finish_run(run_id, RunStatus::Failed) {
                    error!(run_id, error = %mark, "could not mark run as failed");
                }
                Err(e)
            }
        }
    }

    fn run_body(&self, experiment_hash: &str, run_id: i64, inputs: Inputs) -> Result<RunSummary> {
        let mut splits_reused = 0;
        let mut splits_skipped = 0;

        let matrix_pairs = match inputs {
            Inputs::Pairs(pairs) => {
                for pair in &pairs {
                    self.registry.link_matrix(
                        experiment_hash,
                        &pair.train.uuid,
                        pair.time_split_index,
                        MatrixType::Train,
                    )?;
                    self.registry.link_matrix(
                        experiment_hash,
                        &pair.test.uuid,
                        pair.time_split_index,
                        MatrixType::Test,
                    )?;
                }
                info!(pairs = pairs.len(), "reusing registered matrices");
                pairs
            }
            Inputs::Splits(splits) => {
                let builder = SparseMatrixBuilder::new(
                    self.config.features.feature_type,
                    self.config.features.hyperparameters.as_ref(),
                )?;
                let feature_group = self.registry.register_feature_group(
                    builder.feature_type().as_str(),
                    &builder.resolved_hyperparameters(),
                    experiment_hash,
                )?;

                let mut pairs = Vec::with_capacity(splits.len());
                for split in &splits {
                    match self.build_split(split, &builder, &feature_group, experiment_hash) {
                        Ok((pair, reused)) => {
                            splits_reused += usize::from(reused);
                            pairs.push(pair);
                        }
                        Err(e) if e.is_recoverable() => {
                            warn!(time_split_index = split.index(), error = %e, "skipping time split");
                            splits_skipped += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
                pairs
            }
        };

        let grid = ModelGrid::new(
            &self.registry,
            &self.matrices,
            &self.factory,
            experiment_hash,
        )
        .with_grid(self.config.grid_config.clone())
        .with_issue_areas(self.config.issue_areas()?)
        .with_evaluation(self.config.evaluation.clone())
        .run(&matrix_pairs)?;

        let status = if splits_skipped == 0 && grid.is_complete() {
            RunStatus::Completed
        } else if grid.cells_succeeded > 0 {
            RunStatus::PartiallyCompleted
        } else {
            RunStatus::Failed
        };
        debug!(run_id, status = %status, "run body finished");

        Ok(RunSummary {
            experiment_hash: experiment_hash.to_string(),
            run_id,
            status,
            matrix_pairs,
            splits_reused,
            splits_skipped,
            grid,
        })
    }

    fn sources(&self) -> Result<&DataSources> {
        self.sources
            .as_ref()
            .ok_or_else(|| Error::Config("no data sources configured".to_string()))
    }

    /// Cohort rows of one side of a split, in as-of-date then source order
    fn cohort_rows(&self, split: &TimeSplit, matrix_type: MatrixType) -> Result<Vec<LabeledDocument>> {
        let sources = self.sources()?;
        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        for &as_of_date in split.dates(matrix_type) {
            let entity_ids = sources.cohort.resolve(as_of_date)?;
            if entity_ids.is_empty() {
                warn!(as_of_date = %as_of_date, matrix_type = %matrix_type, "empty cohort");
            }
            for document in sources.labels.join(&entity_ids, as_of_date)? {
                if seen.insert(document.row_key()) {
                    rows.push(document);
                }
            }
        }
        Ok(rows)
    }

    fn build_split(
        &self,
        split: &TimeSplit,
        builder: &SparseMatrixBuilder,
        feature_group: &FeatureGroup,
        experiment_hash: &str,
    ) -> Result<(MatrixPair, bool)> {
        info!(time_split_index = split.index(), "building matrices");
        let format = self.config.feature_matrix_storage_format;

        let train_rows = self.cohort_rows(split, MatrixType::Train)?;
        let test_rows = self.cohort_rows(split, MatrixType::Test)?;
        let cohort_of = |rows: &[LabeledDocument]| {
            let keys: Vec<RowKey> = rows.iter().map(LabeledDocument::row_key).collect();
            hashing::cohort_hash(&keys)
        };
        let train_uuid = hashing::matrix_uuid(
            &feature_group.hash,
            &cohort_of(&train_rows),
            MatrixType::Train,
            split.train_as_of_dates(),
        );
        let test_uuid = hashing::test_matrix_uuid(
            &train_uuid,
            &cohort_of(&test_rows),
            split.test_as_of_dates(),
        );
        let pair = MatrixPair {
            time_split_index: split.index(),
            train: MatrixRef {
                uuid: train_uuid.clone(),
                format,
            },
            test: MatrixRef {
                uuid: test_uuid.clone(),
                format,
            },
        };

        let resolved = builder.resolved_hyperparameters();
        let creator_hash = hashing::feature_creator_hash(
            builder.feature_type().as_str(),
            &train_uuid,
            &resolved,
        );

        if self.is_cached(&pair, &creator_hash)? {
            info!(
                time_split_index = split.index(),
                train_uuid = %train_uuid,
                test_uuid = %test_uuid,
                "matrix cache hit"
            );
            self.registry
                .link_matrix(experiment_hash, &train_uuid, split.index(), MatrixType::Train)?;
            self.registry
                .link_matrix(experiment_hash, &test_uuid, split.index(), MatrixType::Test)?;
            return Ok((pair, true));
        }

        let preprocessor = TextPreprocessor::new(self.config.preprocessing_config.clone());
        let train_text = self.texts(&train_rows, &preprocessor)?;
        let test_text = self.texts(&test_rows, &preprocessor)?;

        // Vocabulary comes from the train side only
        let fitted = builder.fit(&as_strs(&train_text));
        let train_matrix = transform(&fitted, &train_rows, &train_text)?;
        let test_matrix = transform(&fitted, &test_rows, &test_text)?;
        debug_assert!(within_window(&train_matrix, split, MatrixType::Train));
        debug_assert!(within_window(&test_matrix, split, MatrixType::Test));

        let storage = self.matrices.storage();
        storage.put(StorageArea::FeatureModels, &creator_hash, fitted.to_bytes()?)?;
        let creator_id = self.registry.register_feature_creator(
            &creator_hash,
            feature_group.id,
            experiment_hash,
            &train_uuid,
        )?;

        for (matrix_type, uuid, matrix, rows) in [
            (MatrixType::Train, &train_uuid, &train_matrix, &train_rows),
            (MatrixType::Test, &test_uuid, &test_matrix, &test_rows),
        ] {
            let labels = label_table(rows);
            self.matrices.write(uuid, format, matrix, &labels)?;
            let record = self.matrix_record(
                split,
                matrix_type,
                uuid,
                creator_id,
                matrix,
                feature_group,
                experiment_hash,
            );
            self.registry.register_matrix(&record, experiment_hash)?;
        }

        Ok((pair, false))
    }

    fn is_cached(&self, pair: &MatrixPair, creator_hash: &str) -> Result<bool> {
        for side in [&pair.train, &pair.test] {
            if self.registry.matrix(&side.uuid)?.is_none()
                || !self.matrices.exists(&side.uuid, side.format)?
            {
                return Ok(false);
            }
        }
        Ok(self.registry.feature_creator_id(creator_hash)?.is_some()
            && self
                .matrices
                .storage()
                .exists(StorageArea::FeatureModels, creator_hash)?)
    }

    /// Preprocessed text per row; rows whose text is missing get an empty document
    fn texts(&self, rows: &[LabeledDocument], preprocessor: &TextPreprocessor) -> Result<Vec<String>> {
        let sources = self.sources()?;
        let retriever = TextRetriever::new(
            sources.text.as_ref(),
            self.config.es_config.query_size,
            self.config.es_config.text_field.clone(),
        );
        let keys: Vec<DocumentKey> = rows
            .iter()
            .map(|r| DocumentKey::new(r.entity_id, r.doc_id.clone()))
            .collect();
        let found = retriever.retrieve(&keys)?;
        Ok(keys
            .iter()
            .map(|key| {
                found
                    .get(key)
                    .map(|text| preprocessor.process(text))
                    .unwrap_or_default()
            })
            .collect())
    }

    #[allow(clippy::too_many_arguments)]
    fn matrix_record(
        &self,
        split: &TimeSplit,
        matrix_type: MatrixType,
        uuid: &str,
        feature_creator_id: i64,
        matrix: &SparseMatrix,
        feature_group: &FeatureGroup,
        experiment_hash: &str,
    ) -> MatrixRecord {
        let temporal = &self.config.temporal_config;
        let dates = split.dates(matrix_type);
        let window = split.window(matrix_type);
        let frequencies = match matrix_type {
            MatrixType::Train => &temporal.training_as_of_date_frequencies,
            MatrixType::Test => &temporal.test_as_of_date_frequencies,
        };
        let keys: Vec<RowKey> = matrix.row_keys().to_vec();
        let metadata = MatrixMetadata {
            matrix_id: format!("{}_{}", window.start, window.end),
            matrix_type,
            as_of_times: dates.to_vec(),
            end_time: window.end,
            feature_start_time: temporal.feature_start_time,
            as_of_date_frequency: joined(frequencies),
            max_training_history: joined(&temporal.max_training_histories),
            label_timespan: joined(&temporal.label_timespans),
            indices: vec!["entity_id".to_string(), "as_of_date".to_string()],
            cohort_hash: hashing::cohort_hash(&keys),
            feature_group_hash: feature_group.hash.clone(),
            n_rows: matrix.n_rows(),
            n_cols: matrix.n_cols(),
        };
        MatrixRecord {
            matrix_uuid: uuid.to_string(),
            matrix_type,
            time_split_index: split.index(),
            feature_creator_id,
            stored_file_format: self.config.feature_matrix_storage_format,
            built_by_experiment: experiment_hash.to_string(),
            feature_start_time: temporal.feature_start_time,
            lookback_duration: joined(&temporal.max_training_histories),
            metadata,
        }
    }
}

fn joined(values: &[String]) -> Option<String> {
    if values.is_empty() {
        None
    } else {
        Some(values.join(","))
    }
}

fn as_strs(texts: &[String]) -> Vec<&str> {
    texts.iter().map(String::as_str).collect()
}

fn transform(
    fitted: &FittedVectorizer,
    rows: &[LabeledDocument],
    texts: &[String],
) -> Result<SparseMatrix> {
    let keys = rows.iter().map(LabeledDocument::row_key).collect();
    fitted.transform(keys, &as_strs(texts))
}

fn label_table(rows: &[LabeledDocument]) -> LabelTable {
    LabelTable::new(rows.iter().map(|r| (r.row_key(), r.labels)).collect())
}

fn within_window(matrix: &SparseMatrix, split: &TimeSplit, matrix_type: MatrixType) -> bool {
    let window = split.window(matrix_type);
    matrix
        .row_keys()
        .iter()
        .all(|key| window.contains(key.as_of_date))
}

//! Registry rows
//!
//! ```text
//! ExperimentRecord (1) ──< RunRecord (N)
//!        │
//!        ├──< FeatureGroup ──< feature creator ──< MatrixRecord (train, test)
//!        └──< model group ──< ModelRecord ──< PredictionRecord / EvaluationRecord
//! ```

use crate::labels::IssueArea;
use crate::matrix::{MatrixType, StorageFormat};
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of an experiment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is executing (or crashed without finishing)
    Started,
    /// Every split and grid cell succeeded
    Completed,
    /// Some splits or grid cells were skipped after recoverable failures
    PartiallyCompleted,
    /// The run aborted, or nothing succeeded
    Failed,
}

impl RunStatus {
    /// Registry string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::PartiallyCompleted => "partially_completed",
            Self::Failed => "failed",
        }
    }

    /// Whether the run has finished
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Started)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "started" => Ok(Self::Started),
            "completed" => Ok(Self::Completed),
            "partially_completed" => Ok(Self::PartiallyCompleted),
            "failed" => Ok(Self::Failed),
            other => Err(Error::RegistryLookup(format!("unknown run status '{other}'"))),
        }
    }
}

/// A registered experiment configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    experiment_hash: String,
    config: serde_json::Value,
    time_splits_count: usize,
}

impl ExperimentRecord {
    /// Create a record
    #[must_use]
    pub fn new(
        experiment_hash: impl Into<String>,
        config: serde_json::Value,
        time_splits_count: usize,
    ) -> Self {
        Self {
            experiment_hash: experiment_hash.into(),
            config,
            time_splits_count,
        }
    }

    /// Get the experiment hash.
    #[must_use]
    pub fn experiment_hash(&self) -> &str {
        &self.experiment_hash
    }

    /// Get the full configuration.
    #[must_use]
    pub const fn config(&self) -> &serde_json::Value {
        &self.config
    }

    /// Number of time splits the experiment was chopped into.
    #[must_use]
    pub const fn time_splits_count(&self) -> usize {
        self.time_splits_count
    }
}

/// One execution of an experiment.
///
/// An experiment hash may have many runs; each `run()` appends one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    run_id: Option<i64>,
    experiment_hash: String,
    status: RunStatus,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    project_folder: String,
    log_location: Option<String>,
}

impl RunRecord {
    /// Create a run record in `Started` status, timestamped now.
    #[must_use]
    pub fn new(experiment_hash: impl Into<String>, project_folder: impl Into<String>) -> Self {
        Self::builder(experiment_hash, project_folder).build()
    }

    /// Create a builder for a run record with optional fields.
    #[must_use]
    pub fn builder(
        experiment_hash: impl Into<String>,
        project_folder: impl Into<String>,
    ) -> RunRecordBuilder {
        RunRecordBuilder::new(experiment_hash, project_folder)
    }

    /// Registry id, once written.
    #[must_use]
    pub const fn run_id(&self) -> Option<i64> {
        self.run_id
    }

    /// Get the parent experiment hash.
    #[must_use]
    pub fn experiment_hash(&self) -> &str {
        &self.experiment_hash
    }

    /// Get the current run status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Get the start timestamp.
    #[must_use]
    pub const fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Get the end timestamp, if the run has finished.
    #[must_use]
    pub const fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// Project root the run writes to.
    #[must_use]
    pub fn project_folder(&self) -> &str {
        &self.project_folder
    }

    /// Run-scoped log file, if any.
    #[must_use]
    pub fn log_location(&self) -> Option<&str> {
        self.log_location.as_deref()
    }

    /// Finish the run with `status`, setting `end_time` to now.
    pub fn complete(&mut self, status: RunStatus) {
        self.status = status;
        self.end_time = Some(Utc::now());
    }

    pub(crate) fn with_id(mut self, run_id: i64) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub(crate) const fn from_row(
        run_id: i64,
        experiment_hash: String,
        status: RunStatus,
        start_time: DateTime<Utc>,
        end_time: Option<DateTime<Utc>>,
        project_folder: String,
        log_location: Option<String>,
    ) -> Self {
        Self {
            run_id: Some(run_id),
            experiment_hash,
            status,
            start_time,
            end_time,
            project_folder,
            log_location,
        }
    }
}

/// Builder for `RunRecord`.
#[derive(Debug)]
pub struct RunRecordBuilder {
    experiment_hash: String,
    project_folder: String,
    log_location: Option<String>,
    start_time: Option<DateTime<Utc>>,
}

impl RunRecordBuilder {
    /// Create a builder with required fields.
    #[must_use]
    pub fn new(experiment_hash: impl Into<String>, project_folder: impl Into<String>) -> Self {
        Self {
            experiment_hash: experiment_hash.into(),
            project_folder: project_folder.into(),
            log_location: None,
            start_time: None,
        }
    }

    /// Set the run-scoped log file.
    #[must_use]
    pub fn log_location(mut self, path: impl Into<String>) -> Self {
        self.log_location = Some(path.into());
        self
    }

    /// Override the start timestamp (defaults to now).
    #[must_use]
    pub const fn start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// Build the `RunRecord`.
    #[must_use]
    pub fn build(self) -> RunRecord {
        RunRecord {
            run_id: None,
            experiment_hash: self.experiment_hash,
            status: RunStatus::Started,
            start_time: self.start_time.unwrap_or_else(Utc::now),
            end_time: None,
            project_folder: self.project_folder,
            log_location: self.log_location,
        }
    }
}

/// A registered vectorizer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureGroup {
    /// `text_feature_group_id`
    pub id: i64,
    /// Content hash of type and hyperparameters
    pub hash: String,
}

/// Descriptive metadata stored with every matrix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixMetadata {
    /// `<first>_<last>` as-of-date
    pub matrix_id: String,
    /// Train or test
    pub matrix_type: MatrixType,
    /// Every as-of-date in the matrix
    pub as_of_times: Vec<NaiveDate>,
    /// Last as-of-date
    pub end_time: NaiveDate,
    /// Start of the feature window, when configured
    pub feature_start_time: Option<NaiveDate>,
    /// Spacing of the as-of-dates, when configured
    pub as_of_date_frequency: Option<String>,
    /// Longest training history, when configured
    pub max_training_history: Option<String>,
    /// Training label timespan, when configured
    pub label_timespan: Option<String>,
    /// Row index columns
    pub indices: Vec<String>,
    /// Hash of the cohort rows
    pub cohort_hash: String,
    /// Hash of the vectorizer configuration
    pub feature_group_hash: String,
    /// Number of rows
    pub n_rows: usize,
    /// Number of vocabulary columns
    pub n_cols: usize,
}

/// A registered matrix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixRecord {
    /// Content-derived identity
    pub matrix_uuid: String,
    /// Train or test
    pub matrix_type: MatrixType,
    /// Split the matrix belongs to
    pub time_split_index: usize,
    /// Fitted vectorizer that produced it
    pub feature_creator_id: i64,
    /// Sparse or dense
    pub stored_file_format: StorageFormat,
    /// Experiment that first built it
    pub built_by_experiment: String,
    /// Feature window start
    pub feature_start_time: Option<NaiveDate>,
    /// Feature lookback (max training history)
    pub lookback_duration: Option<String>,
    /// Descriptive metadata
    pub metadata: MatrixMetadata,
}

impl MatrixRecord {
    /// Reference used to load the matrix
    #[must_use]
    pub fn matrix_ref(&self) -> MatrixRef {
        MatrixRef {
            uuid: self.matrix_uuid.clone(),
            format: self.stored_file_format,
        }
    }
}

/// How to load a stored matrix
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatrixRef {
    /// Matrix identity
    pub uuid: String,
    /// Storage format
    pub format: StorageFormat,
}

/// The train and test matrices of one split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixPair {
    /// Split index
    pub time_split_index: usize,
    /// Train matrix
    pub train: MatrixRef,
    /// Test matrix
    pub test: MatrixRef,
}

/// A registered trained model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRecord {
    /// `model_id`
    pub model_id: i64,
    /// Content hash
    pub model_hash: String,
    /// Owning model group
    pub model_group_id: i64,
    /// Experiment that first trained it
    pub built_by_experiment: String,
    /// Training matrix
    pub train_matrix_uuid: String,
    /// Target label
    pub issue_area: IssueArea,
}

/// One scored row
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    /// Bill identifier
    pub entity_id: i64,
    /// Snapshot date
    pub as_of_date: NaiveDate,
    /// Scoring model
    pub model_id: i64,
    /// Scored matrix
    pub matrix_uuid: String,
    /// Experiment that produced the score
    pub experiment_hash: String,
    /// Target label
    pub issue_area: IssueArea,
    /// True label
    pub label_value: u8,
    /// Predicted probability of the positive class
    pub score: f64,
}

/// One evaluation metric value
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRecord {
    /// Evaluated model
    pub model_id: i64,
    /// Evaluated matrix
    pub matrix_uuid: String,
    /// Experiment that computed it
    pub experiment_hash: String,
    /// Target label
    pub issue_area: IssueArea,
    /// Metric name, e.g. `precision@`
    pub metric: String,
    /// Metric parameter, e.g. `10_pct` or `50_abs`; empty if none
    pub parameter: String,
    /// Metric value
    pub value: f64,
}

//! Registry DDL
//!
//! Every content-addressed table carries a UNIQUE hash column so that
//! registration is a single `INSERT ... ON CONFLICT` statement.

/// Tables of the provenance registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryTable {
    /// `experiments`
    Experiments,
    /// `experiment_runs`
    ExperimentRuns,
    /// `text_feature_groups`
    TextFeatureGroups,
    /// `text_feature_creators`
    TextFeatureCreators,
    /// `matrices`
    Matrices,
    /// `experiment_matrices`
    ExperimentMatrices,
    /// `model_groups`
    ModelGroups,
    /// `models`
    Models,
    /// `train_predictions`
    TrainPredictions,
    /// `test_predictions`
    TestPredictions,
    /// `evaluations`
    Evaluations,
}

impl RegistryTable {
    /// SQL table name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Experiments => "experiments",
            Self::ExperimentRuns => "experiment_runs",
            Self::TextFeatureGroups => "text_feature_groups",
            Self::TextFeatureCreators => "text_feature_creators",
            Self::Matrices => "matrices",
            Self::ExperimentMatrices => "experiment_matrices",
            Self::ModelGroups => "model_groups",
            Self::Models => "models",
            Self::TrainPredictions => "train_predictions",
            Self::TestPredictions => "test_predictions",
            Self::Evaluations => "evaluations",
        }
    }
}

pub(crate) const SCHEMA: &str = r"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS experiments (
    experiment_hash     TEXT PRIMARY KEY,
    config_json         TEXT NOT NULL,
    time_splits_count   INTEGER NOT NULL,
    created_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS experiment_runs (
    run_id              INTEGER PRIMARY KEY AUTOINCREMENT,
    experiment_hash     TEXT NOT NULL REFERENCES experiments(experiment_hash),
    start_time          TEXT NOT NULL,
    end_time            TEXT,
    run_status          TEXT NOT NULL,
    project_folder      TEXT NOT NULL,
    log_location        TEXT
);

CREATE TABLE IF NOT EXISTS text_feature_groups (
    text_feature_group_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    feature_group_hash      TEXT NOT NULL UNIQUE,
    feature_type            TEXT NOT NULL,
    hyperparameters_json    TEXT NOT NULL,
    experiment_hash         TEXT NOT NULL REFERENCES experiments(experiment_hash)
);

CREATE TABLE IF NOT EXISTS text_feature_creators (
    feature_creator_id      INTEGER PRIMARY KEY AUTOINCREMENT,
    feature_creator_hash    TEXT NOT NULL UNIQUE,
    text_feature_group_id   INTEGER NOT NULL REFERENCES text_feature_groups(text_feature_group_id),
    built_by_experiment     TEXT NOT NULL REFERENCES experiments(experiment_hash),
    train_matrix_uuid       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS matrices (
    matrix_id               TEXT NOT NULL,
    matrix_uuid             TEXT PRIMARY KEY,
    matrix_type             TEXT NOT NULL,
    feature_start_time      TEXT,
    lookback_duration       TEXT,
    metadata_json           TEXT NOT NULL,
    built_by_experiment     TEXT NOT NULL REFERENCES experiments(experiment_hash),
    time_split_index        INTEGER NOT NULL,
    feature_creator_id      INTEGER NOT NULL REFERENCES text_feature_creators(feature_creator_id),
    stored_file_format      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS experiment_matrices (
    experiment_hash     TEXT NOT NULL REFERENCES experiments(experiment_hash),
    matrix_uuid         TEXT NOT NULL REFERENCES matrices(matrix_uuid),
    time_split_index    INTEGER NOT NULL,
    matrix_type         TEXT NOT NULL,
    PRIMARY KEY (experiment_hash, time_split_index, matrix_type)
);

CREATE TABLE IF NOT EXISTS model_groups (
    model_group_id          INTEGER PRIMARY KEY AUTOINCREMENT,
    model_type              TEXT NOT NULL,
    hyperparameters_json    TEXT NOT NULL,
    experiment_hash         TEXT NOT NULL REFERENCES experiments(experiment_hash)
);

CREATE TABLE IF NOT EXISTS models (
    model_id                INTEGER PRIMARY KEY AUTOINCREMENT,
    model_hash              TEXT NOT NULL UNIQUE,
    model_group_id          INTEGER NOT NULL REFERENCES model_groups(model_group_id),
    built_by_experiment     TEXT NOT NULL REFERENCES experiments(experiment_hash),
    train_matrix_uuid       TEXT NOT NULL REFERENCES matrices(matrix_uuid),
    issue_area              TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS train_predictions (
    entity_id           INTEGER NOT NULL,
    as_of_date          TEXT NOT NULL,
    model_id            INTEGER NOT NULL REFERENCES models(model_id),
    matrix_uuid         TEXT NOT NULL REFERENCES matrices(matrix_uuid),
    experiment_hash     TEXT NOT NULL,
    issue_area          TEXT NOT NULL,
    label_value         INTEGER NOT NULL,
    score               REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS test_predictions (
    entity_id           INTEGER NOT NULL,
    as_of_date          TEXT NOT NULL,
    model_id            INTEGER NOT NULL REFERENCES models(model_id),
    matrix_uuid         TEXT NOT NULL REFERENCES matrices(matrix_uuid),
    experiment_hash     TEXT NOT NULL,
    issue_area          TEXT NOT NULL,
    label_value         INTEGER NOT NULL,
    score               REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS evaluations (
    model_id            INTEGER NOT NULL REFERENCES models(model_id),
    matrix_uuid         TEXT NOT NULL REFERENCES matrices(matrix_uuid),
    experiment_hash     TEXT NOT NULL,
    issue_area          TEXT NOT NULL,
    metric              TEXT NOT NULL,
    parameter           TEXT NOT NULL,
    value               REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_status ON experiment_runs(run_status, start_time);
CREATE INDEX IF NOT EXISTS idx_train_predictions_model ON train_predictions(model_id);
CREATE INDEX IF NOT EXISTS idx_test_predictions_model ON test_predictions(model_id);
";

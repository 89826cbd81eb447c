//! End-to-end experiment runs against in-memory sources
//!
//! One split: train as-of-dates 2019-01-01 and 2019-02-01, test as-of-date
//! 2019-03-01, cohort {7, 9}. Bill 7 passed, bill 9 did not. The multi-split
//! test adds 2019-04-01.

use chrono::NaiveDate;
use legisml::blob::ProjectStorage;
use legisml::cohort::StaticCohortResolver;
use legisml::config::ExperimentConfig;
use legisml::labels::{DatedDocument, IssueArea, IssueLabels, StaticLabelJoiner};
use legisml::matrix::{MatrixType, RowKey};
use legisml::orchestrator::{DataSources, ExperimentOrchestrator};
use legisml::registry::{hashing, PredictionTable, Registry, RegistryTable, RunStatus};
use legisml::temporal::{StaticChopper, TimeSplit};
use legisml::text::MemoryTextSource;
use legisml::Error;
use serde_json::json;

const CONFIG: &str = r#"
temporal_config:
  feature_start_time: 2018-01-01
  label_timespans: 1y
  max_training_histories: 2month
cohort_config:
  query: "SELECT bill_id FROM bills WHERE introduced_date < '{as_of_date}'"
features:
  type: count
preprocessing_config: [lowercase, remove_punctuation, collapse_whitespace]
grid_config:
  linear.LogisticRegression:
    C: [1.0]
issue_areas: [passage]
evaluation:
  percentiles: [50.0]
  top_n: [1]
"#;

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn split() -> TimeSplit {
    TimeSplit::new(
        0,
        vec![date("2019-01-01"), date("2019-02-01")],
        vec![date("2019-03-01")],
    )
    .unwrap()
}

fn sources(text: MemoryTextSource) -> DataSources {
    let all_dates = [
        date("2019-01-01"),
        date("2019-02-01"),
        date("2019-03-01"),
        date("2019-04-01"),
    ];
    let passed = IssueLabels::new().with(IssueArea::Passage, 1);
    DataSources {
        cohort: Box::new(StaticCohortResolver::new().with_cohort_for_all(&all_dates, &[7, 9])),
        labels: Box::new(StaticLabelJoiner::new(vec![
            DatedDocument {
                entity_id: 7,
                doc_id: "7-v1".to_string(),
                doc_date: date("2018-12-01"),
                labels: passed,
            },
            DatedDocument {
                entity_id: 7,
                doc_id: "7-v2".to_string(),
                doc_date: date("2019-02-15"),
                labels: passed,
            },
            DatedDocument {
                entity_id: 9,
                doc_id: "9-v1".to_string(),
                doc_date: date("2018-12-15"),
                labels: IssueLabels::new(),
            },
        ])),
        text: Box::new(text),
    }
}

fn full_text() -> MemoryTextSource {
    MemoryTextSource::new()
        .with_document(7, "7-v1", "Tax bill.")
        .with_document(7, "7-v2", "New tax bill")
        .with_document(9, "9-v1", "BILL")
}

fn orchestrator(yaml: &str, registry: Registry, storage: ProjectStorage) -> ExperimentOrchestrator {
    with_splits(yaml, registry, storage, vec![split()])
}

fn with_splits(
    yaml: &str,
    registry: Registry,
    storage: ProjectStorage,
    splits: Vec<TimeSplit>,
) -> ExperimentOrchestrator {
    ExperimentOrchestrator::builder(ExperimentConfig::from_yaml_str(yaml).unwrap(), registry, storage)
        .chopper(Box::new(StaticChopper::new(splits)))
        .sources(sources(full_text()))
        .build()
        .unwrap()
}

fn in_memory(yaml: &str) -> ExperimentOrchestrator {
    orchestrator(
        yaml,
        Registry::open_in_memory().unwrap(),
        ProjectStorage::open("mem://legisml-test/project", None).unwrap(),
    )
}

#[test]
fn test_unseen_test_terms_are_ignored() {
    let orch = in_memory(CONFIG);
    let summary = orch.run().unwrap();
    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.matrix_pairs.len(), 1);

    let pair = &summary.matrix_pairs[0];
    let test = orch.matrices().read(&pair.test.uuid, pair.test.format).unwrap();
    assert_eq!(test.matrix.vocabulary().terms(), ["bill", "tax"]);

    let row = test
        .matrix
        .row_index(&RowKey::new(7, date("2019-03-01")))
        .unwrap();
    assert_eq!(test.matrix.get(row, 0), 1.0);
    assert_eq!(test.matrix.get(row, 1), 1.0);
    assert_eq!(test.matrix.row(row).columns, [0, 1]);
}

#[test]
fn test_matrices_stay_inside_their_window() {
    let orch = in_memory(CONFIG);
    let summary = orch.run().unwrap();
    let pair = &summary.matrix_pairs[0];
    let split = split();

    for (matrix_ref, matrix_type) in [(&pair.train, MatrixType::Train), (&pair.test, MatrixType::Test)] {
        let stored = orch.matrices().read(&matrix_ref.uuid, matrix_ref.format).unwrap();
        let window = split.window(matrix_type);
        assert!(stored
            .matrix
            .row_keys()
            .iter()
            .all(|key| window.contains(key.as_of_date)));

        let record = orch.registry().matrix(&matrix_ref.uuid).unwrap().unwrap();
        assert_eq!(record.matrix_type, matrix_type);
        assert_eq!(record.metadata.as_of_times, split.dates(matrix_type));
        assert_eq!(record.metadata.n_rows, stored.matrix.n_rows());
        assert_eq!(record.lookback_duration.as_deref(), Some("2month"));
    }

    let train = orch.matrices().read(&pair.train.uuid, pair.train.format).unwrap();
    assert_eq!(train.matrix.n_rows(), 4);
    assert_eq!(
        train.label_column(IssueArea::Passage).unwrap(),
        vec![1, 0, 1, 0]
    );
    assert_eq!(
        orch.registry().matrix(&pair.train.uuid).unwrap().unwrap().metadata.matrix_id,
        "2019-01-01_2019-02-01"
    );
}

#[test]
fn test_predictions_and_evaluations_are_recorded() {
    let orch = in_memory(CONFIG);
    let summary = orch.run().unwrap();
    let pair = &summary.matrix_pairs[0];
    assert_eq!(summary.grid.cells_succeeded, 1);
    assert_eq!(summary.grid.predictions_written, 6);

    let model_hash = hashing::model_hash(
        "linear.LogisticRegression",
        &pair.train.uuid,
        &json!({"C": 1.0}),
        IssueArea::Passage,
    );
    let model = orch.registry().model_by_hash(&model_hash).unwrap().unwrap();
    assert_eq!(model.train_matrix_uuid, pair.train.uuid);

    let test = orch
        .registry()
        .predictions(PredictionTable::Test, model.model_id)
        .unwrap();
    assert_eq!(test.len(), 2);
    let passed = test.iter().find(|p| p.entity_id == 7).unwrap();
    let failed = test.iter().find(|p| p.entity_id == 9).unwrap();
    assert_eq!((passed.label_value, failed.label_value), (1, 0));
    assert!(passed.score > failed.score);
    assert!(test.iter().all(|p| p.matrix_uuid == pair.test.uuid));

    assert_eq!(
        orch.registry()
            .predictions(PredictionTable::Train, model.model_id)
            .unwrap()
            .len(),
        4
    );
    assert!(orch.registry().table_row_count(RegistryTable::Evaluations).unwrap() > 0);
}

#[test]
fn test_rerun_hits_matrix_and_model_cache() {
    let orch = in_memory(CONFIG);
    let first = orch.run().unwrap();
    let second = orch.run().unwrap();

    assert_eq!(first.experiment_hash, second.experiment_hash);
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.matrix_pairs, second.matrix_pairs);
    assert_eq!(first.splits_reused, 0);
    assert_eq!(second.splits_reused, 1);
    assert_eq!(second.grid.models_reused, 1);

    let registry = orch.registry();
    assert_eq!(registry.table_row_count(RegistryTable::Experiments).unwrap(), 1);
    assert_eq!(registry.table_row_count(RegistryTable::ExperimentRuns).unwrap(), 2);
    assert_eq!(registry.table_row_count(RegistryTable::TextFeatureGroups).unwrap(), 1);
    assert_eq!(registry.table_row_count(RegistryTable::TextFeatureCreators).unwrap(), 1);
    assert_eq!(registry.table_row_count(RegistryTable::Matrices).unwrap(), 2);
    assert_eq!(registry.table_row_count(RegistryTable::Models).unwrap(), 1);
    // model groups get a fresh row per run
    assert_eq!(registry.table_row_count(RegistryTable::ModelGroups).unwrap(), 2);
}

#[test]
fn test_reuse_matrices_from_earlier_experiment() {
    let dir = tempfile::tempdir().unwrap();
    let registry_path = dir.path().join("registry.db");
    let storage = ProjectStorage::open(dir.path().join("project").to_str().unwrap(), None).unwrap();

    let first = orchestrator(CONFIG, Registry::open(&registry_path).unwrap(), storage.clone())
        .run()
        .unwrap();

    let yaml = CONFIG.replace("C: [1.0]", "C: [0.5]");
    let reuse = ExperimentOrchestrator::builder(
        ExperimentConfig::from_yaml_str(&yaml).unwrap(),
        Registry::open(&registry_path).unwrap(),
        storage,
    )
    .reuse_matrices_from(&first.experiment_hash)
    .build()
    .unwrap();
    let second = reuse.run().unwrap();

    assert_ne!(first.experiment_hash, second.experiment_hash);
    assert_eq!(first.matrix_pairs, second.matrix_pairs);
    assert_eq!(second.status, RunStatus::Completed);

    let registry = reuse.registry();
    assert_eq!(registry.table_row_count(RegistryTable::Matrices).unwrap(), 2);
    assert_eq!(registry.table_row_count(RegistryTable::ExperimentMatrices).unwrap(), 4);
    assert_eq!(registry.matrix_pairs(&second.experiment_hash).unwrap(), second.matrix_pairs);
    assert_eq!(registry.table_row_count(RegistryTable::Models).unwrap(), 2);
}

/// Splits 0 and 1 share a test window, splits 0 and 2 share a train window
fn overlapping_splits() -> Vec<TimeSplit> {
    vec![
        TimeSplit::new(0, vec![date("2019-02-01")], vec![date("2019-03-01")]).unwrap(),
        TimeSplit::new(1, vec![date("2019-01-01")], vec![date("2019-03-01")]).unwrap(),
        TimeSplit::new(2, vec![date("2019-02-01")], vec![date("2019-04-01")]).unwrap(),
    ]
}

#[test]
fn test_splits_sharing_a_window_keep_their_own_matrices() {
    let dir = tempfile::tempdir().unwrap();
    let registry_path = dir.path().join("registry.db");
    let storage = ProjectStorage::open(dir.path().join("project").to_str().unwrap(), None).unwrap();

    let orch = with_splits(
        CONFIG,
        Registry::open(&registry_path).unwrap(),
        storage.clone(),
        overlapping_splits(),
    );
    let first = orch.run().unwrap();
    assert_eq!(first.status, RunStatus::Completed, "{:?}", first.grid.failures);
    assert_eq!(first.grid.cells_succeeded, 3);

    let pairs = &first.matrix_pairs;
    assert_eq!(pairs.len(), 3);
    // same test dates, different train windows
    assert_ne!(pairs[0].train.uuid, pairs[1].train.uuid);
    assert_ne!(pairs[0].test.uuid, pairs[1].test.uuid);
    // same train window, different test dates
    assert_eq!(pairs[0].train.uuid, pairs[2].train.uuid);
    assert_ne!(pairs[0].test.uuid, pairs[2].test.uuid);

    for pair in pairs {
        let train = orch.matrices().read(&pair.train.uuid, pair.train.format).unwrap();
        let test = orch.matrices().read(&pair.test.uuid, pair.test.format).unwrap();
        assert_eq!(test.matrix.vocabulary(), train.matrix.vocabulary());
    }

    // every split keeps both of its links
    let registry = orch.registry();
    assert_eq!(registry.matrix_pairs(&first.experiment_hash).unwrap(), *pairs);
    assert_eq!(registry.table_row_count(RegistryTable::ExperimentMatrices).unwrap(), 6);
    assert_eq!(registry.table_row_count(RegistryTable::Matrices).unwrap(), 5);

    let yaml = CONFIG.replace("C: [1.0]", "C: [0.5]");
    let reuse = ExperimentOrchestrator::builder(
        ExperimentConfig::from_yaml_str(&yaml).unwrap(),
        Registry::open(&registry_path).unwrap(),
        storage,
    )
    .reuse_matrices_from(&first.experiment_hash)
    .build()
    .unwrap();
    let second = reuse.run().unwrap();
    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(second.matrix_pairs, first.matrix_pairs);
    assert_eq!(second.grid.cells_succeeded, 3);
}

#[test]
fn test_reuse_from_unknown_experiment_fails() {
    let orch = ExperimentOrchestrator::builder(
        ExperimentConfig::from_yaml_str(CONFIG).unwrap(),
        Registry::open_in_memory().unwrap(),
        ProjectStorage::open("mem://legisml-test/reuse", None).unwrap(),
    )
    .reuse_matrices_from("0123abcd")
    .build()
    .unwrap();
    assert!(matches!(orch.run(), Err(Error::RegistryLookup(_))));
    assert_eq!(
        orch.registry().table_row_count(RegistryTable::ExperimentRuns).unwrap(),
        0
    );
}

#[test]
fn test_invalid_hyperparameter_only_skips_its_cell() {
    let orch = in_memory(&CONFIG.replace("C: [1.0]", "C: [1.0, -1.0]"));
    let summary = orch.run().unwrap();

    assert_eq!(summary.status, RunStatus::PartiallyCompleted);
    assert_eq!(summary.grid.cells_attempted, 2);
    assert_eq!(summary.grid.cells_succeeded, 1);
    assert_eq!(summary.grid.failures.len(), 1);
    assert_eq!(summary.grid.failures[0].hyperparameters, json!({"C": -1.0}));
    assert_eq!(
        orch.registry().table_row_count(RegistryTable::TestPredictions).unwrap(),
        2
    );

    let run = orch.registry().run(summary.run_id).unwrap().unwrap();
    assert_eq!(run.status(), RunStatus::PartiallyCompleted);
    assert!(run.end_time().is_some());
}

#[test]
fn test_run_without_any_successful_cell_is_failed() {
    let orch = in_memory(&CONFIG.replace("C: [1.0]", "C: [-1.0]"));
    let summary = orch.run().unwrap();
    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(
        orch.registry().run(summary.run_id).unwrap().unwrap().status(),
        RunStatus::Failed
    );
    assert_eq!(
        orch.registry().table_row_count(RegistryTable::TestPredictions).unwrap(),
        0
    );
}

#[test]
fn test_missing_text_yields_empty_row() {
    let orch = ExperimentOrchestrator::builder(
        ExperimentConfig::from_yaml_str(CONFIG).unwrap(),
        Registry::open_in_memory().unwrap(),
        ProjectStorage::open("mem://legisml-test/missing", None).unwrap(),
    )
    .chopper(Box::new(StaticChopper::new(vec![split()])))
    .sources(sources(
        MemoryTextSource::new()
            .with_document(7, "7-v1", "tax bill")
            .with_document(7, "7-v2", "new tax bill"),
    ))
    .build()
    .unwrap();

    let summary = orch.run().unwrap();
    let pair = &summary.matrix_pairs[0];
    let test = orch.matrices().read(&pair.test.uuid, pair.test.format).unwrap();
    assert_eq!(test.matrix.n_rows(), 2);
    let row = test
        .matrix
        .row_index(&RowKey::new(9, date("2019-03-01")))
        .unwrap();
    assert!(test.matrix.row(row).columns.is_empty());
}

#[test]
fn test_unknown_issue_area_rejected_at_build() {
    let result = ExperimentOrchestrator::builder(
        ExperimentConfig::from_yaml_str(&CONFIG.replace("[passage]", "[taxes]")).unwrap(),
        Registry::open_in_memory().unwrap(),
        ProjectStorage::open("mem://legisml-test/bad", None).unwrap(),
    )
    .chopper(Box::new(StaticChopper::new(vec![split()])))
    .sources(sources(full_text()))
    .build();
    assert!(matches!(result, Err(Error::UnknownIssueArea(ref name)) if name == "taxes"));
}

#[test]
fn test_build_requires_sources() {
    let result = ExperimentOrchestrator::builder(
        ExperimentConfig::from_yaml_str(CONFIG).unwrap(),
        Registry::open_in_memory().unwrap(),
        ProjectStorage::open("mem://legisml-test/nosources", None).unwrap(),
    )
    .chopper(Box::new(StaticChopper::new(vec![split()])))
    .build();
    assert!(matches!(result, Err(Error::Config(_))));
}

//! Experiment runs backed by a SQLite bill-tracking database

use chrono::NaiveDate;
use legisml::blob::ProjectStorage;
use legisml::cohort::{CohortQuery, CohortResolver};
use legisml::config::ExperimentConfig;
use legisml::labels::{IssueArea, IssueLabels, LabelJoiner};
use legisml::matrix::RowKey;
use legisml::orchestrator::{DataSources, ExperimentOrchestrator};
use legisml::registry::{Registry, RunStatus};
use legisml::sources::BillDatabase;
use legisml::temporal::StaticChopper;
use std::path::Path;
use std::rc::Rc;

const CONFIG: &str = r#"
cohort_config:
  query: "SELECT bill_id FROM bills WHERE introduced_date < '{as_of_date}' ORDER BY bill_id"
features:
  type: tfidf
preprocessing_config: [lowercase, remove_stopwords]
es_config:
  query_size: 1
  text_field: description
grid_config:
  naive_bayes.MultinomialNB:
    alpha: [1.0]
  baseline.PriorClassifier: {}
issue_areas: [passage, voting_rights]
"#;

const SPLITS: &str = r#"[
  {"index": 0, "train_as_of_dates": ["2019-01-01", "2019-02-01"], "test_as_of_dates": ["2019-03-01"]}
]"#;

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn seed(path: &Path) {
    let db = BillDatabase::open(path).unwrap();
    db.upsert_bill(7, "NY", date("2018-11-01")).unwrap();
    db.upsert_bill(9, "CA", date("2018-12-01")).unwrap();
    db.upsert_bill(11, "TX", date("2019-02-20")).unwrap();
    db.upsert_document(7, "7-v1", date("2018-12-01")).unwrap();
    db.upsert_document(7, "7-v2", date("2019-02-15")).unwrap();
    db.upsert_document(9, "9-v1", date("2018-12-15")).unwrap();
    db.upsert_document(11, "11-v1", date("2019-02-20")).unwrap();
    db.upsert_labels(7, IssueLabels::new().with(IssueArea::Passage, 1))
        .unwrap();
    db.upsert_labels(9, IssueLabels::new().with(IssueArea::VotingRights, 1))
        .unwrap();
    db.upsert_text("7-v1", "description", "An act on the tax bill").unwrap();
    db.upsert_text("7-v2", "description", "New tax bill").unwrap();
    db.upsert_text("9-v1", "description", "Voting bill").unwrap();
    db.upsert_text("11-v1", "title", "Unlabeled title only").unwrap();
}

#[test]
fn test_run_against_bill_database() {
    let dir = tempfile::tempdir().unwrap();
    let bills = dir.path().join("bills.db");
    seed(&bills);

    let config = ExperimentConfig::from_yaml_str(CONFIG).unwrap();
    let database = Rc::new(
        BillDatabase::open(&bills)
            .unwrap()
            .with_cohort_query(config.cohort_query().unwrap()),
    );
    let orch = ExperimentOrchestrator::builder(
        config,
        Registry::open(dir.path().join("registry.db")).unwrap(),
        ProjectStorage::open(dir.path().join("project").to_str().unwrap(), None).unwrap(),
    )
    .chopper(Box::new(StaticChopper::from_json(SPLITS).unwrap()))
    .sources(DataSources {
        cohort: Box::new(Rc::clone(&database)),
        labels: Box::new(Rc::clone(&database)),
        text: Box::new(database),
    })
    .build()
    .unwrap();

    let summary = orch.run().unwrap();
    assert_eq!(summary.status, RunStatus::Completed);
    // 2 issue areas x 2 model types x 1 split
    assert_eq!(summary.grid.cells_attempted, 4);
    assert_eq!(summary.grid.cells_succeeded, 4);

    let pair = &summary.matrix_pairs[0];
    let train = orch.matrices().read(&pair.train.uuid, pair.train.format).unwrap();
    let test = orch.matrices().read(&pair.test.uuid, pair.test.format).unwrap();
    assert_eq!(train.matrix.n_rows(), 4);
    // bill 11 joins the cohort on the test date with a title but no description
    assert_eq!(test.matrix.n_rows(), 3);
    let row = test
        .matrix
        .row_index(&RowKey::new(11, date("2019-03-01")))
        .unwrap();
    assert!(test.matrix.row(row).columns.is_empty());
    assert_eq!(
        test.label_column(IssueArea::VotingRights).unwrap(),
        vec![0, 1, 0]
    );
    assert!(train.matrix.vocabulary().get("new").is_none());
    assert!(train.matrix.vocabulary().get("the").is_none());
}

#[test]
fn test_cohort_placeholder_is_bound_not_interpolated() {
    let db = BillDatabase::open_in_memory()
        .unwrap()
        .with_cohort_query(
            CohortQuery::parse(
                "SELECT bill_id FROM bills WHERE introduced_date < '{as_of_date}' ORDER BY bill_id",
            )
            .unwrap(),
        );
    db.upsert_bill(1, "NY", date("2019-01-01")).unwrap();
    db.upsert_bill(2, "NY", date("2019-06-01")).unwrap();
    assert_eq!(db.resolve(date("2019-03-01")).unwrap(), vec![1]);
    assert_eq!(db.resolve(date("2020-01-01")).unwrap(), vec![1, 2]);
}

#[test]
fn test_labels_default_to_zero_without_label_row() {
    let db = BillDatabase::open_in_memory().unwrap();
    db.upsert_bill(3, "WA", date("2019-01-01")).unwrap();
    db.upsert_document(3, "3-v1", date("2019-01-02")).unwrap();

    let joined = db.join(&[3], date("2019-02-01")).unwrap();
    assert_eq!(joined.len(), 1);
    assert_eq!(joined[0].labels, IssueLabels::new());
    assert!(db.join(&[3], date("2019-01-02")).unwrap().is_empty());
}

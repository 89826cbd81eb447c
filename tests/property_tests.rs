//! Property-based tests for legisml
//!
//! - Matrix documents survive encode/decode exactly
//! - Content hashes ignore key order and track every value
//! - Grid expansion is a full cartesian product
//! - Run with ProptestConfig::with_cases(100)

use chrono::{Duration, NaiveDate};
use legisml::labels::{IssueArea, IssueLabels, LabelTable};
use legisml::matrix::codec::{decode_sparse, encode_sparse};
use legisml::matrix::dense::{decode_dense, encode_dense};
use legisml::matrix::{MatrixType, RowKey, SparseMatrix, Vocabulary};
use legisml::model::expand_grid;
use legisml::registry::hashing;
use legisml::temporal::TimeSplit;
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};

// ============================================================================
// Strategies
// ============================================================================

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2019, 1, 1).unwrap()
}

/// Sparse matrix with distinct row keys; roughly half the cells are set
fn arb_sparse_matrix() -> impl Strategy<Value = SparseMatrix> {
    (0usize..8, 1usize..6).prop_flat_map(|(n_rows, n_cols)| {
        proptest::collection::vec(
            proptest::collection::vec(proptest::option::of(-1000.0f64..1000.0), n_cols),
            n_rows,
        )
        .prop_map(move |cells| {
            let rows: Vec<RowKey> = (0..n_rows)
                .map(|i| {
                    let i = i64::try_from(i).unwrap();
                    RowKey::new(100 + i * 3, base_date() + Duration::days(i % 3))
                })
                .collect();
            let vocabulary =
                Vocabulary::from_terms((0..n_cols).map(|c| format!("term{c}")).collect()).unwrap();
            let entries = cells
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .enumerate()
                        .filter_map(|(c, v)| v.map(|v| (c, v)))
                        .collect()
                })
                .collect();
            SparseMatrix::from_rows(rows, vocabulary, entries).unwrap()
        })
    })
}

fn arb_hyperparameters() -> impl Strategy<Value = Map<String, Value>> {
    proptest::collection::btree_map("[a-z_]{1,8}", -100i64..100, 1..6).prop_map(|m| {
        m.into_iter()
            .map(|(k, v)| (k, Value::from(v)))
            .collect::<Map<String, Value>>()
    })
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: decode(encode(M)) == M, row order included
    #[test]
    fn prop_sparse_codec_round_trip(matrix in arb_sparse_matrix()) {
        let decoded = decode_sparse(&encode_sparse(&matrix).unwrap()).unwrap();
        prop_assert_eq!(decoded.row_keys(), matrix.row_keys());
        prop_assert_eq!(decoded.vocabulary(), matrix.vocabulary());
        prop_assert_eq!(
            decoded.iter_nonzero().collect::<Vec<_>>(),
            matrix.iter_nonzero().collect::<Vec<_>>()
        );
    }

    /// Property: the Parquet fallback keeps values and labels
    #[test]
    fn prop_dense_codec_round_trip(matrix in arb_sparse_matrix(), passed in any::<bool>()) {
        let labels = LabelTable::new(
            matrix
                .row_keys()
                .iter()
                .map(|k| (*k, IssueLabels::new().with(IssueArea::Passage, u8::from(passed))))
                .collect(),
        );
        let (decoded, decoded_labels) =
            decode_dense(encode_dense(&matrix, &labels).unwrap()).unwrap();
        prop_assert_eq!(decoded.to_dense(), matrix.to_dense());
        prop_assert_eq!(decoded.row_keys(), matrix.row_keys());
        prop_assert_eq!(decoded_labels, labels);
    }

    /// Property: hashes ignore key order
    #[test]
    fn prop_feature_group_hash_ignores_key_order(hp in arb_hyperparameters()) {
        let forward = Value::Object(hp.clone());
        let reversed = Value::Object(hp.into_iter().rev().collect());
        prop_assert_eq!(
            hashing::feature_group_hash("tfidf", &forward),
            hashing::feature_group_hash("tfidf", &reversed)
        );
    }

    /// Property: changing any hyperparameter changes the hash
    #[test]
    fn prop_feature_group_hash_tracks_values(hp in arb_hyperparameters(), pick in any::<prop::sample::Index>()) {
        let before = hashing::feature_group_hash("count", &Value::Object(hp.clone()));
        let mut changed = hp;
        let key = changed.keys().nth(pick.index(changed.len())).cloned().unwrap();
        let old = changed[&key].as_i64().unwrap();
        changed.insert(key, Value::from(old + 1));
        prop_assert_ne!(before, hashing::feature_group_hash("count", &Value::Object(changed)));
    }

    /// Property: the cohort hash is a function of the row set
    #[test]
    fn prop_cohort_hash_ignores_order(ids in proptest::collection::vec(0i64..1000, 0..20)) {
        let keys: Vec<RowKey> = ids.iter().map(|&id| RowKey::new(id, base_date())).collect();
        let mut shuffled = keys.clone();
        shuffled.reverse();
        prop_assert_eq!(hashing::cohort_hash(&keys), hashing::cohort_hash(&shuffled));
    }

    /// Property: matrix identity differs between the two sides of a split
    #[test]
    fn prop_matrix_uuid_is_deterministic(days in 1i64..400) {
        let dates = [base_date(), base_date() + Duration::days(days)];
        let train = hashing::matrix_uuid("fg", "cohort", MatrixType::Train, &dates);
        prop_assert_eq!(&train, &hashing::matrix_uuid("fg", "cohort", MatrixType::Train, &dates));
        prop_assert_ne!(&train, &hashing::matrix_uuid("fg", "cohort", MatrixType::Test, &dates));
        prop_assert_eq!(train.len(), 32);
    }

    /// Property: the grid expands to the product of its value counts
    #[test]
    fn prop_grid_expansion_is_cartesian(sizes in proptest::collection::vec(1usize..4, 0..4)) {
        let grid: BTreeMap<String, Vec<Value>> = sizes
            .iter()
            .enumerate()
            .map(|(i, &n)| (format!("p{i}"), (0..n).map(Value::from).collect()))
            .collect();
        let combos = expand_grid(&grid);
        prop_assert_eq!(combos.len(), sizes.iter().product::<usize>());

        let distinct: HashSet<String> = combos.iter().map(hashing::canonical_json).collect();
        prop_assert_eq!(distinct.len(), combos.len());
        for combo in &combos {
            prop_assert_eq!(combo.as_object().unwrap().len(), sizes.len());
        }
    }

    /// Property: a split never accepts a train date on or after a test date
    #[test]
    fn prop_time_split_rejects_overlap(train_end in 0i64..60, test_start in 0i64..60) {
        let split = TimeSplit::new(
            0,
            vec![base_date(), base_date() + Duration::days(train_end)],
            vec![base_date() + Duration::days(test_start)],
        );
        let leaks = train_end >= test_start;
        prop_assert_eq!(split.is_err(), leaks);
    }
}

#[test]
fn test_two_by_two_grid() {
    let grid = BTreeMap::from([
        ("a".to_string(), vec![json!(1), json!(2)]),
        ("b".to_string(), vec![json!("x"), json!("y")]),
    ]);
    let combos = expand_grid(&grid);
    assert_eq!(combos.len(), 4);
    assert!(combos.contains(&json!({"a": 1, "b": "x"})));
    assert!(combos.contains(&json!({"a": 2, "b": "y"})));
}

//! Content hashes
//!
//! Every identity is the SHA-256 hex digest of a canonical JSON array
//! `[kind, part, ...]`. Object keys are sorted recursively before
//! serialization, so reordered hyperparameter maps hash identically.

use crate::labels::IssueArea;
use crate::matrix::{MatrixType, RowKey, DATE_FORMAT};
use chrono::NaiveDate;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Serialize `value` with object keys sorted at every depth
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn digest(parts: &Value) -> String {
    let hash = Sha256::digest(canonical_json(parts).as_bytes());
    let mut hex = String::with_capacity(64);
    for byte in hash {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Identity of a vectorizer configuration
#[must_use]
pub fn feature_group_hash(feature_type: &str, hyperparameters: &Value) -> String {
    digest(&json!(["feature_group", feature_type, hyperparameters]))
}

/// Identity of a vectorizer fitted on one train matrix
#[must_use]
pub fn feature_creator_hash(
    feature_type: &str,
    train_matrix_uuid: &str,
    hyperparameters: &Value,
) -> String {
    digest(&json!([
        "feature_creator",
        feature_type,
        train_matrix_uuid,
        hyperparameters
    ]))
}

/// Identity of one trained model.
///
/// The training matrix is part of the identity, so the same
/// hyperparameters trained on another matrix yield another model.
#[must_use]
pub fn model_hash(
    model_type: &str,
    train_matrix_uuid: &str,
    hyperparameters: &Value,
    issue_area: IssueArea,
) -> String {
    digest(&json!([
        "model",
        model_type,
        train_matrix_uuid,
        hyperparameters,
        issue_area.as_str()
    ]))
}

/// Identity of a full experiment configuration
#[must_use]
pub fn experiment_hash(config: &Value) -> String {
    digest(&json!(["experiment", config]))
}

/// Identity of a cohort: the sorted set of its row keys
#[must_use]
pub fn cohort_hash(rows: &[RowKey]) -> String {
    let mut rows = rows.to_vec();
    rows.sort_unstable();
    rows.dedup();
    let keys: Vec<String> = rows.iter().map(ToString::to_string).collect();
    digest(&json!(["cohort", keys]))
}

/// Content-derived matrix identity (32 hex characters)
#[must_use]
pub fn matrix_uuid(
    feature_group_hash: &str,
    cohort_hash: &str,
    matrix_type: MatrixType,
    as_of_dates: &[NaiveDate],
) -> String {
    let dates: Vec<String> = as_of_dates
        .iter()
        .map(|d| d.format(DATE_FORMAT).to_string())
        .collect();
    let mut hex = digest(&json!([
        "matrix",
        feature_group_hash,
        cohort_hash,
        matrix_type.as_str(),
        dates
    ]));
    hex.truncate(32);
    hex
}

/// Identity of a test matrix.
///
/// Test columns come from the vocabulary fitted on the train matrix, so the
/// train uuid stands in for the feature group.
#[must_use]
pub fn test_matrix_uuid(train_uuid: &str, cohort_hash: &str, as_of_dates: &[NaiveDate]) -> String {
    matrix_uuid(train_uuid, cohort_hash, MatrixType::Test, as_of_dates)
}

//! SQLite-backed provenance registry
//!
//! The registry connection is the only shared mutable state of a run.
//! Content-addressed rows (feature groups, feature creators, matrices,
//! models) are written with one atomic `INSERT ... ON CONFLICT` statement
//! each, so two orchestrators racing on the same hash converge on one row.
//!
//! Any failed write is logged and surfaced as [`Error::RegistryWrite`];
//! callers must never continue with an unregistered id.

use super::hashing;
use super::records::{
    EvaluationRecord, ExperimentRecord, FeatureGroup, MatrixMetadata, MatrixPair, MatrixRecord,
    MatrixRef, ModelRecord, PredictionRecord, RunRecord, RunStatus,
};
use super::schema::{RegistryTable, SCHEMA};
use crate::labels::IssueArea;
use crate::matrix::{MatrixType, DATE_FORMAT};
use crate::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, error, info, warn};

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::RegistryLookup(format!("bad timestamp '{s}': {e}")))
}

fn write_failed(table: &'static str) -> impl FnOnce(rusqlite::Error) -> Error {
    move |e| {
        error!(table, error = %e, "registry write failed");
        Error::registry_write(table, e)
    }
}

type RunRow = (i64, String, String, String, Option<String>, String, Option<String>);

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn to_usize(n: i64) -> usize {
    usize::try_from(n).unwrap_or_default()
}

/// Which predictions table a scored matrix goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionTable {
    /// Scores on the training matrix
    Train,
    /// Scores on the test matrix
    Test,
}

impl PredictionTable {
    const fn table(self) -> RegistryTable {
        match self {
            Self::Train => RegistryTable::TrainPredictions,
            Self::Test => RegistryTable::TestPredictions,
        }
    }
}

impl From<MatrixType> for PredictionTable {
    fn from(matrix_type: MatrixType) -> Self {
        match matrix_type {
            MatrixType::Train => Self::Train,
            MatrixType::Test => Self::Test,
        }
    }
}

/// Relational provenance store.
///
/// # Example
///
/// ```rust
/// use legisml::registry::Registry;
/// use serde_json::json;
///
/// # fn main() -> legisml::Result<()> {
/// let registry = Registry::open_in_memory()?;
/// let exp = registry.register_experiment(&json!({"issue_areas": ["passage"]}), 1)?;
/// let a = registry.register_feature_group("tfidf", &json!({"min_df": 2}), &exp)?;
/// let b = registry.register_feature_group("tfidf", &json!({"min_df": 2}), &exp)?;
/// assert_eq!(a.id, b.id);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Registry {
    conn: Connection,
}

impl Registry {
    /// Open (and create if needed) a registry database file.
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or the schema applied
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::with_connection(conn)
    }

    /// Open a private in-memory registry.
    ///
    /// # Errors
    /// Returns error if the schema cannot be applied
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Number of rows in a table.
    ///
    /// # Errors
    /// Returns error if the query fails
    pub fn table_row_count(&self, table: RegistryTable) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(to_usize(count))
    }

    // ============================================================
    // Experiments and runs
    // ============================================================

    /// Register a configuration; returns its experiment hash.
    ///
    /// Registering the same configuration again is a no-op.
    ///
    /// # Errors
    /// Returns a registry write error if the insert fails
    pub fn register_experiment(&self, config: &Value, time_splits_count: usize) -> Result<String> {
        let experiment_hash = hashing::experiment_hash(config);
        let inserted = self
            .conn
            .execute(
                "INSERT INTO experiments (experiment_hash, config_json, time_splits_count, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(experiment_hash) DO NOTHING",
                params![
                    experiment_hash,
                    hashing::canonical_json(config),
                    to_i64(time_splits_count),
                    timestamp(Utc::now())
                ],
            )
            .map_err(write_failed("experiments"))?;

        if inserted == 0 {
            info!(experiment_hash = %experiment_hash, "experiment already registered");
        } else {
            info!(experiment_hash = %experiment_hash, time_splits_count, "registered experiment");
        }
        Ok(experiment_hash)
    }

    /// Look up an experiment.
    ///
    /// # Errors
    /// Returns error if the query fails or the stored config is corrupt
    pub fn experiment(&self, experiment_hash: &str) -> Result<Option<ExperimentRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT config_json, time_splits_count FROM experiments WHERE experiment_hash = ?1",
                params![experiment_hash],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        row.map(|(config, count)| {
            Ok(ExperimentRecord::new(
                experiment_hash,
                serde_json::from_str(&config)?,
                to_usize(count),
            ))
        })
        .transpose()
    }

    /// Append a run row; returns the record with its id.
    ///
    /// # Errors
    /// Returns a registry write error if the insert fails
    pub fn start_run(&self, run: &RunRecord) -> Result<RunRecord> {
        self.conn
            .execute(
                "INSERT INTO experiment_runs
                    (experiment_hash, start_time, end_time, run_status, project_folder, log_location)
                 VALUES (?1, ?2, NULL, ?3, ?4, ?5)",
                params![
                    run.experiment_hash(),
                    timestamp(run.start_time()),
                    run.status().as_str(),
                    run.project_folder(),
                    run.log_location()
                ],
            )
            .map_err(write_failed("experiment_runs"))?;
        let run_id = self.conn.last_insert_rowid();
        info!(run_id, experiment_hash = run.experiment_hash(), "run started");
        Ok(run.clone().with_id(run_id))
    }

    /// Record a run's final status.
    ///
    /// # Errors
    /// Returns a registry write error if the run does not exist or the
    /// update fails
    pub fn finish_run(&self, run_id: i64, status: RunStatus) -> Result<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE experiment_runs SET run_status = ?1, end_time = ?2 WHERE run_id = ?3",
                params![status.as_str(), timestamp(Utc::now()), run_id],
            )
            .map_err(write_failed("experiment_runs"))?;
        if updated == 0 {
            error!(run_id, "no run row to finish");
            return Err(Error::registry_write(
                "experiment_runs",
                format!("run {run_id} does not exist"),
            ));
        }
        info!(run_id, status = %status, "run finished");
        Ok(())
    }

    fn run_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
        ))
    }

    fn runs_where(&self, clause: &str, param: &dyn rusqlite::ToSql) -> Result<Vec<RunRecord>> {
        let sql = format!(
            "SELECT run_id, experiment_hash, run_status, start_time, end_time, project_folder, log_location
             FROM experiment_runs WHERE {clause} ORDER BY run_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([param], Self::run_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, hash, status, start, end, folder, log)| {
                Ok(RunRecord::from_row(
                    id,
                    hash,
                    status.parse()?,
                    parse_timestamp(&start)?,
                    end.as_deref().map(parse_timestamp).transpose()?,
                    folder,
                    log,
                ))
            })
            .collect()
    }

    /// Every run of an experiment, oldest first.
    ///
    /// # Errors
    /// Returns error if the query fails
    pub fn runs_for_experiment(&self, experiment_hash: &str) -> Result<Vec<RunRecord>> {
        self.runs_where("experiment_hash = ?1", &experiment_hash)
    }

    /// One run by id.
    ///
    /// # Errors
    /// Returns error if the query fails
    pub fn run(&self, run_id: i64) -> Result<Option<RunRecord>> {
        Ok(self.runs_where("run_id = ?1", &run_id)?.into_iter().next())
    }

    /// Mark runs still `started` after `timeout` as failed.
    ///
    /// Returns the number of runs reconciled.
    ///
    /// # Errors
    /// Returns a registry write error if the update fails
    pub fn reconcile_orphaned_runs(&self, timeout: Duration) -> Result<usize> {
        let now = Utc::now();
        let cutoff = timestamp(now - timeout);
        let orphaned = self.runs_where(
            "run_status = 'started' AND start_time < ?1",
            &cutoff,
        )?;
        for run in &orphaned {
            warn!(
                run_id = ?run.run_id(),
                experiment_hash = run.experiment_hash(),
                started = %run.start_time(),
                "marking orphaned run as failed"
            );
        }

        let updated = self
            .conn
            .execute(
                "UPDATE experiment_runs SET run_status = ?1, end_time = ?2
                 WHERE run_status = 'started' AND start_time < ?3",
                params![RunStatus::Failed.as_str(), timestamp(now), cutoff],
            )
            .map_err(write_failed("experiment_runs"))?;
        info!(reconciled = updated, "orphaned run reconciliation finished");
        Ok(updated)
    }

    // ============================================================
    // Feature groups, feature creators and matrices
    // ============================================================

    /// Register a vectorizer configuration; at most one row per hash.
    ///
    /// # Errors
    /// Returns a registry write error if the upsert fails
    pub fn register_feature_group(
        &self,
        feature_type: &str,
        hyperparameters: &Value,
        experiment_hash: &str,
    ) -> Result<FeatureGroup> {
        let hash = hashing::feature_group_hash(feature_type, hyperparameters);
        let id: i64 = self
            .conn
            .query_row(
                "INSERT INTO text_feature_groups
                    (feature_group_hash, feature_type, hyperparameters_json, experiment_hash)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(feature_group_hash) DO UPDATE SET feature_group_hash = excluded.feature_group_hash
                 RETURNING text_feature_group_id",
                params![
                    hash,
                    feature_type,
                    hashing::canonical_json(hyperparameters),
                    experiment_hash
                ],
                |row| row.get(0),
            )
            .map_err(write_failed("text_feature_groups"))?;
        debug!(feature_group_id = id, feature_group_hash = %hash, "feature group registered");
        Ok(FeatureGroup { id, hash })
    }

    /// Register a fitted vectorizer; returns its id.
    ///
    /// # Errors
    /// Returns a registry write error if the upsert fails
    pub fn register_feature_creator(
        &self,
        feature_creator_hash: &str,
        feature_group_id: i64,
        experiment_hash: &str,
        train_matrix_uuid: &str,
    ) -> Result<i64> {
        let id: i64 = self
            .conn
            .query_row(
                "INSERT INTO text_feature_creators
                    (feature_creator_hash, text_feature_group_id, built_by_experiment, train_matrix_uuid)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(feature_creator_hash) DO UPDATE SET feature_creator_hash = excluded.feature_creator_hash
                 RETURNING feature_creator_id",
                params![
                    feature_creator_hash,
                    feature_group_id,
                    experiment_hash,
                    train_matrix_uuid
                ],
                |row| row.get(0),
            )
            .map_err(write_failed("text_feature_creators"))?;
        debug!(feature_creator_id = id, "feature creator registered");
        Ok(id)
    }

    /// Id of a registered feature creator.
    ///
    /// # Errors
    /// Returns error if the query fails
    pub fn feature_creator_id(&self, feature_creator_hash: &str) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT feature_creator_id FROM text_feature_creators WHERE feature_creator_hash = ?1",
                params![feature_creator_hash],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Register a matrix and link it to `experiment_hash`.
    ///
    /// Returns `true` if the matrix row was new. An existing row (same
    /// content-derived uuid) is kept as is and only linked.
    ///
    /// # Errors
    /// Returns a registry write error if either write fails
    pub fn register_matrix(&self, record: &MatrixRecord, experiment_hash: &str) -> Result<bool> {
        let metadata = serde_json::to_string(&record.metadata)
            .map_err(|e| Error::registry_write("matrices", e))?;
        let inserted = self
            .conn
            .execute(
                "INSERT INTO matrices
                    (matrix_id, matrix_uuid, matrix_type, feature_start_time, lookback_duration,
                     metadata_json, built_by_experiment, time_split_index, feature_creator_id,
                     stored_file_format)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(matrix_uuid) DO NOTHING",
                params![
                    record.metadata.matrix_id,
                    record.matrix_uuid,
                    record.matrix_type.as_str(),
                    record
                        .feature_start_time
                        .map(|d| d.format(DATE_FORMAT).to_string()),
                    record.lookback_duration,
                    metadata,
                    record.built_by_experiment,
                    to_i64(record.time_split_index),
                    record.feature_creator_id,
                    record.stored_file_format.as_str()
                ],
            )
            .map_err(write_failed("matrices"))?;

        self.link_matrix(
            experiment_hash,
            &record.matrix_uuid,
            record.time_split_index,
            record.matrix_type,
        )?;
        debug!(matrix_uuid = %record.matrix_uuid, new = inserted > 0, "matrix registered");
        Ok(inserted > 0)
    }

    /// Record that `experiment_hash` uses a matrix for a split side.
    ///
    /// # Errors
    /// Returns a registry write error if the insert fails
    pub fn link_matrix(
        &self,
        experiment_hash: &str,
        matrix_uuid: &str,
        time_split_index: usize,
        matrix_type: MatrixType,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO experiment_matrices (experiment_hash, matrix_uuid, time_split_index, matrix_type)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(experiment_hash, time_split_index, matrix_type)
                 DO UPDATE SET matrix_uuid = excluded.matrix_uuid",
                params![
                    experiment_hash,
                    matrix_uuid,
                    to_i64(time_split_index),
                    matrix_type.as_str()
                ],
            )
            .map_err(write_failed("experiment_matrices"))?;
        Ok(())
    }

    /// Look up a matrix.
    ///
    /// # Errors
    /// Returns error if the query fails or the row is corrupt
    pub fn matrix(&self, matrix_uuid: &str) -> Result<Option<MatrixRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT matrix_type, time_split_index, feature_creator_id, stored_file_format,
                        built_by_experiment, feature_start_time, lookback_duration, metadata_json
                 FROM matrices WHERE matrix_uuid = ?1",
                params![matrix_uuid],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((kind, split, creator, format, built_by, start, lookback, metadata)) = row else {
            return Ok(None);
        };
        let corrupt = |e: Error| Error::RegistryLookup(format!("matrix {matrix_uuid}: {e}"));
        let metadata: MatrixMetadata =
            serde_json::from_str(&metadata).map_err(|e| corrupt(e.into()))?;
        let feature_start_time = start
            .map(|s| NaiveDate::parse_from_str(&s, DATE_FORMAT))
            .transpose()
            .map_err(|e| Error::RegistryLookup(format!("matrix {matrix_uuid}: {e}")))?;

        Ok(Some(MatrixRecord {
            matrix_uuid: matrix_uuid.to_string(),
            matrix_type: kind.parse().map_err(corrupt)?,
            time_split_index: to_usize(split),
            feature_creator_id: creator,
            stored_file_format: format.parse().map_err(corrupt)?,
            built_by_experiment: built_by,
            feature_start_time,
            lookback_duration: lookback,
            metadata,
        }))
    }

    /// Train/test matrix pairs linked to an experiment, by split index.
    ///
    /// # Errors
    /// Returns a lookup error if a split is missing one side
    pub fn matrix_pairs(&self, experiment_hash: &str) -> Result<Vec<MatrixPair>> {
        let mut stmt = self.conn.prepare(
            "SELECT em.time_split_index, em.matrix_type, m.matrix_uuid, m.stored_file_format
             FROM experiment_matrices em
             JOIN matrices m ON m.matrix_uuid = em.matrix_uuid
             WHERE em.experiment_hash = ?1
             ORDER BY em.time_split_index, em.matrix_type",
        )?;
        let rows = stmt
            .query_map(params![experiment_hash], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut splits: BTreeMap<usize, (Option<MatrixRef>, Option<MatrixRef>)> = BTreeMap::new();
        for (split, kind, uuid, format) in rows {
            let matrix_ref = MatrixRef {
                uuid,
                format: format
                    .parse()
                    .map_err(|e| Error::RegistryLookup(format!("split {split}: {e}")))?,
            };
            let entry = splits.entry(to_usize(split)).or_default();
            match kind.parse::<MatrixType>() {
                Ok(MatrixType::Train) => entry.0 = Some(matrix_ref),
                Ok(MatrixType::Test) => entry.1 = Some(matrix_ref),
                Err(e) => return Err(Error::RegistryLookup(format!("split {split}: {e}"))),
            }
        }

        splits
            .into_iter()
            .map(|(time_split_index, sides)| match sides {
                (Some(train), Some(test)) => Ok(MatrixPair {
                    time_split_index,
                    train,
                    test,
                }),
                _ => Err(Error::RegistryLookup(format!(
                    "experiment {experiment_hash} split {time_split_index} lacks a train or test matrix"
                ))),
            })
            .collect()
    }

    // ============================================================
    // Models, predictions and evaluations
    // ============================================================

    /// Insert a model group; a fresh row on every call.
    ///
    /// # Errors
    /// Returns a registry write error if the insert fails
    pub fn register_model_group(
        &self,
        model_type: &str,
        hyperparameters: &Value,
        experiment_hash: &str,
    ) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO model_groups (model_type, hyperparameters_json, experiment_hash)
                 VALUES (?1, ?2, ?3)",
                params![
                    model_type,
                    hashing::canonical_json(hyperparameters),
                    experiment_hash
                ],
            )
            .map_err(write_failed("model_groups"))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Register a model; at most one row per model hash.
    ///
    /// An existing row keeps its original model group.
    ///
    /// # Errors
    /// Returns a registry write error if the upsert fails
    pub fn register_model(
        &self,
        model_hash: &str,
        model_group_id: i64,
        experiment_hash: &str,
        train_matrix_uuid: &str,
        issue_area: IssueArea,
    ) -> Result<i64> {
        let id: i64 = self
            .conn
            .query_row(
                "INSERT INTO models
                    (model_hash, model_group_id, built_by_experiment, train_matrix_uuid, issue_area)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(model_hash) DO UPDATE SET model_hash = excluded.model_hash
                 RETURNING model_id",
                params![
                    model_hash,
                    model_group_id,
                    experiment_hash,
                    train_matrix_uuid,
                    issue_area.as_str()
                ],
                |row| row.get(0),
            )
            .map_err(write_failed("models"))?;
        Ok(id)
    }

    /// Look up a model by hash.
    ///
    /// # Errors
    /// Returns error if the query fails or the row is corrupt
    pub fn model_by_hash(&self, model_hash: &str) -> Result<Option<ModelRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT model_id, model_group_id, built_by_experiment, train_matrix_uuid, issue_area
                 FROM models WHERE model_hash = ?1",
                params![model_hash],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(model_id, model_group_id, built_by, train_uuid, area)| {
            Ok(ModelRecord {
                model_id,
                model_hash: model_hash.to_string(),
                model_group_id,
                built_by_experiment: built_by,
                train_matrix_uuid: train_uuid,
                issue_area: area.parse()?,
            })
        })
        .transpose()
    }

    /// Append prediction rows in one transaction.
    ///
    /// # Errors
    /// Returns a registry write error if any insert fails; nothing is
    /// written in that case
    pub fn write_predictions(
        &self,
        table: PredictionTable,
        predictions: &[PredictionRecord],
    ) -> Result<usize> {
        let name = table.table().name();
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(write_failed(name))?;
        {
            let sql = format!(
                "INSERT INTO {name}
                    (entity_id, as_of_date, model_id, matrix_uuid, experiment_hash, issue_area, label_value, score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            );
            let mut stmt = tx.prepare_cached(&sql).map_err(write_failed(name))?;
            for p in predictions {
                stmt.execute(params![
                    p.entity_id,
                    p.as_of_date.format(DATE_FORMAT).to_string(),
                    p.model_id,
                    p.matrix_uuid,
                    p.experiment_hash,
                    p.issue_area.as_str(),
                    i64::from(p.label_value),
                    p.score
                ])
                .map_err(write_failed(name))?;
            }
        }
        tx.commit().map_err(write_failed(name))?;
        debug!(table = name, rows = predictions.len(), "predictions written");
        Ok(predictions.len())
    }

    /// Predictions of one model, in insertion order.
    ///
    /// # Errors
    /// Returns error if the query fails
    pub fn predictions(&self, table: PredictionTable, model_id: i64) -> Result<Vec<PredictionRecord>> {
        let sql = format!(
            "SELECT entity_id, as_of_date, matrix_uuid, experiment_hash, issue_area, label_value, score
             FROM {} WHERE model_id = ?1 ORDER BY rowid",
            table.table().name()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![model_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, f64>(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(entity_id, date, matrix_uuid, experiment_hash, area, label, score)| {
                Ok(PredictionRecord {
                    entity_id,
                    as_of_date: NaiveDate::parse_from_str(&date, DATE_FORMAT)
                        .map_err(|e| Error::RegistryLookup(format!("prediction date '{date}': {e}")))?,
                    model_id,
                    matrix_uuid,
                    experiment_hash,
                    issue_area: area.parse()?,
                    label_value: u8::from(label != 0),
                    score,
                })
            })
            .collect()
    }

    /// Append evaluation rows in one transaction.
    ///
    /// # Errors
    /// Returns a registry write error if any insert fails
    pub fn write_evaluations(&self, evaluations: &[EvaluationRecord]) -> Result<usize> {
        let name = RegistryTable::Evaluations.name();
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(write_failed(name))?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO evaluations
                        (model_id, matrix_uuid, experiment_hash, issue_area, metric, parameter, value)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )
                .map_err(write_failed(name))?;
            for e in evaluations {
                stmt.execute(params![
                    e.model_id,
                    e.matrix_uuid,
                    e.experiment_hash,
                    e.issue_area.as_str(),
                    e.metric,
                    e.parameter,
                    e.value
                ])
                .map_err(write_failed(name))?;
            }
        }
        tx.commit().map_err(write_failed(name))?;
        Ok(evaluations.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry_with_experiment() -> (Registry, String) {
        let registry = Registry::open_in_memory().unwrap();
        let exp = registry.register_experiment(&json!({"a": 1}), 1).unwrap();
        (registry, exp)
    }

    #[test]
    fn test_register_experiment_is_idempotent() {
        let (registry, exp) = registry_with_experiment();
        let again = registry.register_experiment(&json!({"a": 1}), 1).unwrap();
        assert_eq!(exp, again);
        assert_eq!(registry.table_row_count(RegistryTable::Experiments).unwrap(), 1);
        assert_eq!(registry.experiment(&exp).unwrap().unwrap().time_splits_count(), 1);
    }

    #[test]
    fn test_each_run_appends_a_row() {
        let (registry, exp) = registry_with_experiment();
        let first = registry.start_run(&RunRecord::new(&exp, "/p")).unwrap();
        let second = registry.start_run(&RunRecord::new(&exp, "/p")).unwrap();
        assert_ne!(first.run_id(), second.run_id());

        registry
            .finish_run(first.run_id().unwrap(), RunStatus::Completed)
            .unwrap();
        let runs = registry.runs_for_experiment(&exp).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].status(), RunStatus::Completed);
        assert!(runs[0].end_time().is_some());
        assert_eq!(runs[1].status(), RunStatus::Started);
    }

    #[test]
    fn test_finish_missing_run_is_write_error() {
        let (registry, _) = registry_with_experiment();
        let err = registry.finish_run(999, RunStatus::Failed).unwrap_err();
        assert!(matches!(err, Error::RegistryWrite { table: "experiment_runs", .. }));
    }

    #[test]
    fn test_run_for_unknown_experiment_is_write_error() {
        let registry = Registry::open_in_memory().unwrap();
        let err = registry.start_run(&RunRecord::new("nope", "/p")).unwrap_err();
        assert!(matches!(err, Error::RegistryWrite { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_reconcile_orphaned_runs() {
        let (registry, exp) = registry_with_experiment();
        let old = RunRecord::builder(&exp, "/p")
            .start_time(Utc::now() - Duration::hours(48))
            .build();
        let old = registry.start_run(&old).unwrap();
        let fresh = registry.start_run(&RunRecord::new(&exp, "/p")).unwrap();

        assert_eq!(registry.reconcile_orphaned_runs(Duration::hours(24)).unwrap(), 1);
        assert_eq!(
            registry.run(old.run_id().unwrap()).unwrap().unwrap().status(),
            RunStatus::Failed
        );
        assert_eq!(
            registry.run(fresh.run_id().unwrap()).unwrap().unwrap().status(),
            RunStatus::Started
        );
        assert_eq!(registry.reconcile_orphaned_runs(Duration::hours(24)).unwrap(), 0);
    }

    #[test]
    fn test_feature_group_upsert() {
        let (registry, exp) = registry_with_experiment();
        let a = registry
            .register_feature_group("tfidf", &json!({"min_df": 2, "max_df": 0.5}), &exp)
            .unwrap();
        let b = registry
            .register_feature_group("tfidf", &json!({"max_df": 0.5, "min_df": 2}), &exp)
            .unwrap();
        let c = registry
            .register_feature_group("tfidf", &json!({"min_df": 3}), &exp)
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a.id, c.id);
        assert_eq!(registry.table_row_count(RegistryTable::TextFeatureGroups).unwrap(), 2);
    }

    #[test]
    fn test_model_groups_are_not_deduplicated() {
        let (registry, exp) = registry_with_experiment();
        let a = registry.register_model_group("m", &json!({"C": 1.0}), &exp).unwrap();
        let b = registry.register_model_group("m", &json!({"C": 1.0}), &exp).unwrap();
        assert_ne!(a, b);
    }
}

//! SQLite-backed bill-tracking data sources
//!
//! [`BillDatabase`] serves all three upstream contracts from one SQLite
//! database:
//!
//! - [`CohortResolver`]: runs the configured cohort template with the
//!   as-of-date bound as parameter `?1`
//! - [`LabelJoiner`]: latest document of each bill strictly before the
//!   as-of-date, joined to the bill's issue labels
//! - [`TextSource`]: text of a named field per document
//!
//! Dates are stored as `YYYY-MM-DD` text, so comparisons are lexicographic.

use crate::cohort::{CohortQuery, CohortResolver};
use crate::labels::{IssueArea, IssueLabels, LabelJoiner, LabeledDocument};
use crate::matrix::DATE_FORMAT;
use crate::text::{Document, DocumentKey, TextSource};
use crate::{Error, Result};
use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use tracing::debug;

/// Tables read by [`BillDatabase`]
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS bills (
    bill_id INTEGER PRIMARY KEY,
    state TEXT,
    introduced_date TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS bill_docs (
    doc_id TEXT PRIMARY KEY,
    bill_id INTEGER NOT NULL REFERENCES bills(bill_id),
    doc_date TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_bill_docs_bill ON bill_docs(bill_id, doc_date);

CREATE TABLE IF NOT EXISTS issue_labels (
    bill_id INTEGER PRIMARY KEY REFERENCES bills(bill_id),
    reproductive_rights_label INTEGER NOT NULL DEFAULT 0,
    criminal_law_reform_label INTEGER NOT NULL DEFAULT 0,
    immigrant_rights_label INTEGER NOT NULL DEFAULT 0,
    lgbt_rights_label INTEGER NOT NULL DEFAULT 0,
    racial_justice_label INTEGER NOT NULL DEFAULT 0,
    voting_rights_label INTEGER NOT NULL DEFAULT 0,
    passage_label INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS bill_texts (
    doc_id TEXT NOT NULL REFERENCES bill_docs(doc_id),
    field TEXT NOT NULL,
    text TEXT NOT NULL,
    PRIMARY KEY (doc_id, field)
);
";

fn query_failed(source: &'static str) -> impl Fn(rusqlite::Error) -> Error {
    move |e| Error::Query(format!("{source}: {e}"))
}

fn date_text(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Bill-tracking database
#[derive(Debug)]
pub struct BillDatabase {
    conn: Connection,
    cohort_query: Option<CohortQuery>,
}

impl BillDatabase {
    /// Open (or create) a database file and ensure the schema.
    ///
    /// # Errors
    /// Returns error if the file cannot be opened or the schema applied
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory database, used in tests
    ///
    /// # Errors
    /// Returns error if the schema cannot be applied
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            cohort_query: None,
        })
    }

    /// Use `query` for cohort resolution
    #[must_use]
    pub fn with_cohort_query(mut self, query: CohortQuery) -> Self {
        self.cohort_query = Some(query);
        self
    }

    /// Underlying connection, for loading data
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Insert or replace a bill.
    ///
    /// # Errors
    /// Returns error if the write fails
    pub fn upsert_bill(&self, bill_id: i64, state: &str, introduced_date: NaiveDate) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO bills (bill_id, state, introduced_date) VALUES (?1, ?2, ?3)",
            params![bill_id, state, date_text(introduced_date)],
        )?;
        Ok(())
    }

    /// Insert or replace a document version of a bill.
    ///
    /// # Errors
    /// Returns error if the write fails
    pub fn upsert_document(&self, bill_id: i64, doc_id: &str, doc_date: NaiveDate) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO bill_docs (doc_id, bill_id, doc_date) VALUES (?1, ?2, ?3)",
            params![doc_id, bill_id, date_text(doc_date)],
        )?;
        Ok(())
    }

    /// Insert or replace the labels of a bill.
    ///
    /// # Errors
    /// Returns error if the write fails
    pub fn upsert_labels(&self, bill_id: i64, labels: IssueLabels) -> Result<()> {
        let columns: Vec<String> = IssueArea::ALL.iter().map(IssueArea::label_column).collect();
        let placeholders: Vec<String> = (2..=columns.len() + 1).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT OR REPLACE INTO issue_labels (bill_id, {}) VALUES (?1, {})",
            columns.join(", "),
            placeholders.join(", ")
        );
        let values: Vec<i64> = std::iter::once(bill_id)
            .chain(IssueArea::ALL.iter().map(|&a| i64::from(labels.get(a))))
            .collect();
        self.conn.execute(&sql, params_from_iter(values))?;
        Ok(())
    }

    /// Insert or replace one text field of a document.
    ///
    /// # Errors
    /// Returns error if the write fails
    pub fn upsert_text(&self, doc_id: &str, field: &str, text: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO bill_texts (doc_id, field, text) VALUES (?1, ?2, ?3)",
            params![doc_id, field, text],
        )?;
        Ok(())
    }
}

impl CohortResolver for BillDatabase {
    fn resolve(&self, as_of_date: NaiveDate) -> Result<Vec<i64>> {
        let query = self
            .cohort_query
            .as_ref()
            .ok_or_else(|| Error::Config("no cohort query configured".to_string()))?;
        let mut stmt = self
            .conn
            .prepare_cached(&query.to_parameterized())
            .map_err(query_failed("cohort"))?;
        let ids = stmt
            .query_map(params![date_text(as_of_date)], |row| row.get::<_, i64>(0))
            .map_err(query_failed("cohort"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(query_failed("cohort"))?;
        debug!(as_of_date = %as_of_date, entities = ids.len(), "resolved cohort");
        Ok(ids)
    }
}

impl LabelJoiner for BillDatabase {
    fn join(&self, entity_ids: &[i64], as_of_date: NaiveDate) -> Result<Vec<LabeledDocument>> {
        let label_columns: Vec<String> = IssueArea::ALL
            .iter()
            .map(|a| format!("COALESCE(l.{}, 0)", a.label_column()))
            .collect();
        let sql = format!(
            "SELECT d.doc_id, {}
             FROM bill_docs d
             LEFT JOIN issue_labels l ON l.bill_id = d.bill_id
             WHERE d.bill_id = ?1 AND d.doc_date < ?2
             ORDER BY d.doc_date DESC, d.doc_id DESC
             LIMIT 1",
            label_columns.join(", ")
        );
        let mut stmt = self.conn.prepare_cached(&sql).map_err(query_failed("labels"))?;
        let as_of = date_text(as_of_date);

        let mut out = Vec::with_capacity(entity_ids.len());
        for &entity_id in entity_ids {
            let row = stmt
                .query_row(params![entity_id, as_of], |row| {
                    let doc_id: String = row.get(0)?;
                    let mut labels = IssueLabels::new();
                    for (i, &area) in IssueArea::ALL.iter().enumerate() {
                        labels.set(area, row.get::<_, u8>(i + 1)?);
                    }
                    Ok((doc_id, labels))
                })
                .optional()
                .map_err(query_failed("labels"))?;
            if let Some((doc_id, labels)) = row {
                out.push(LabeledDocument {
                    entity_id,
                    doc_id,
                    as_of_date,
                    labels,
                });
            }
        }
        debug!(
            as_of_date = %as_of_date,
            requested = entity_ids.len(),
            labeled = out.len(),
            "joined labels"
        );
        Ok(out)
    }
}

impl TextSource for BillDatabase {
    fn fetch(&self, keys: &[DocumentKey], text_field: &str) -> Result<Vec<Document>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<String> = (2..=keys.len() + 1).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT d.bill_id, t.doc_id, t.text
             FROM bill_texts t
             JOIN bill_docs d ON d.doc_id = t.doc_id
             WHERE t.field = ?1 AND t.doc_id IN ({})",
            placeholders.join(", ")
        );
        let bind: Vec<&str> = std::iter::once(text_field)
            .chain(keys.iter().map(|k| k.doc_id.as_str()))
            .collect();

        let mut stmt = self.conn.prepare(&sql).map_err(query_failed("text"))?;
        let rows = stmt
            .query_map(params_from_iter(bind), |row| {
                Ok(Document {
                    key: DocumentKey::new(row.get::<_, i64>(0)?, row.get::<_, String>(1)?),
                    text: row.get(2)?,
                })
            })
            .map_err(query_failed("text"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(query_failed("text"))?;

        // A doc id requested under another entity is not a match
        Ok(rows.into_iter().filter(|d| keys.contains(&d.key)).collect())
    }
}

//! Issue-area labels
//!
//! Every bill carries one binary label per [`IssueArea`]. The label table
//! is wide (one column per area); a model is trained against exactly one
//! column, selected through [`IssueArea::label_column`] rather than by
//! building column names from free-form strings.

use crate::matrix::RowKey;
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

/// Independent binary classification targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueArea {
    /// Abortion access and reproductive health
    ReproductiveRights,
    /// Sentencing, policing and incarceration
    CriminalLawReform,
    /// Immigration enforcement and immigrant protections
    ImmigrantRights,
    /// LGBT protections
    LgbtRights,
    /// Racial equity
    RacialJustice,
    /// Ballot access and elections
    VotingRights,
    /// Whether the bill passed
    Passage,
}

impl IssueArea {
    /// Every issue area in label-column order
    pub const ALL: [Self; 7] = [
        Self::ReproductiveRights,
        Self::CriminalLawReform,
        Self::ImmigrantRights,
        Self::LgbtRights,
        Self::RacialJustice,
        Self::VotingRights,
        Self::Passage,
    ];

    /// Configuration and registry name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ReproductiveRights => "reproductive_rights",
            Self::CriminalLawReform => "criminal_law_reform",
            Self::ImmigrantRights => "immigrant_rights",
            Self::LgbtRights => "lgbt_rights",
            Self::RacialJustice => "racial_justice",
            Self::VotingRights => "voting_rights",
            Self::Passage => "passage",
        }
    }

    /// Column name of this area in the wide label table
    #[must_use]
    pub fn label_column(&self) -> String {
        format!("{}_label", self.as_str())
    }

    /// Position in [`Self::ALL`]
    #[must_use]
    pub const fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for IssueArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueArea {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|area| area.as_str() == s)
            .ok_or_else(|| Error::UnknownIssueArea(s.to_string()))
    }
}

/// One binary label per issue area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, u8>", into = "BTreeMap<String, u8>")]
pub struct IssueLabels([u8; 7]);

impl IssueLabels {
    /// All-zero labels
    #[must_use]
    pub const fn new() -> Self {
        Self([0; 7])
    }

    /// Label for one area
    #[must_use]
    pub const fn get(&self, area: IssueArea) -> u8 {
        self.0[area.index()]
    }

    /// Set the label for one area (any non-zero value becomes 1)
    pub fn set(&mut self, area: IssueArea, value: u8) {
        self.0[area.index()] = u8::from(value != 0);
    }

    /// Builder-style [`Self::set`]
    #[must_use]
    pub fn with(mut self, area: IssueArea, value: u8) -> Self {
        self.set(area, value);
        self
    }
}

impl TryFrom<BTreeMap<String, u8>> for IssueLabels {
    type Error = Error;

    fn try_from(map: BTreeMap<String, u8>) -> Result<Self> {
        let mut labels = Self::new();
        for (name, value) in map {
            let name = name.strip_suffix("_label").unwrap_or(&name);
            labels.set(name.parse()?, value);
        }
        Ok(labels)
    }
}

impl From<IssueLabels> for BTreeMap<String, u8> {
    fn from(labels: IssueLabels) -> Self {
        IssueArea::ALL
            .into_iter()
            .map(|area| (area.label_column(), labels.get(area)))
            .collect()
    }
}

/// A labeled document belonging to a cohort member at one as-of-date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledDocument {
    /// Bill identifier
    pub entity_id: i64,
    /// Document (bill version) identifier in the text store
    pub doc_id: String,
    /// Snapshot date
    pub as_of_date: NaiveDate,
    /// Labels known for the bill
    pub labels: IssueLabels,
}

impl LabeledDocument {
    /// Matrix row key of this document
    #[must_use]
    pub const fn row_key(&self) -> RowKey {
        RowKey::new(self.entity_id, self.as_of_date)
    }
}

/// Wide label table aligned with a matrix's row order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelTable {
    rows: Vec<(RowKey, IssueLabels)>,
}

impl LabelTable {
    /// Build from rows in matrix order
    #[must_use]
    pub const fn new(rows: Vec<(RowKey, IssueLabels)>) -> Self {
        Self { rows }
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in order
    #[must_use]
    pub fn rows(&self) -> &[(RowKey, IssueLabels)] {
        &self.rows
    }

    /// Labels of one row
    #[must_use]
    pub fn get(&self, key: &RowKey) -> Option<IssueLabels> {
        self.rows.iter().find(|(k, _)| k == key).map(|(_, l)| *l)
    }

    /// One issue area's label column, in row order
    #[must_use]
    pub fn column(&self, area: IssueArea) -> Vec<u8> {
        self.rows.iter().map(|(_, labels)| labels.get(area)).collect()
    }

    /// Label column reordered to `order`.
    ///
    /// # Errors
    /// Returns error if a key in `order` has no labels
    pub fn aligned_column(&self, area: IssueArea, order: &[RowKey]) -> Result<Vec<u8>> {
        let index: std::collections::HashMap<&RowKey, IssueLabels> =
            self.rows.iter().map(|(k, l)| (k, *l)).collect();
        order
            .iter()
            .map(|key| {
                index
                    .get(key)
                    .map(|labels| labels.get(area))
                    .ok_or_else(|| Error::Codec(format!("no labels for row '{key}'")))
            })
            .collect()
    }
}

/// Joins resolved cohort members to their document and labels.
pub trait LabelJoiner {
    /// Labeled documents for `entity_ids` as known at `as_of_date`.
    ///
    /// Entities without a document before the as-of-date are left out.
    ///
    /// # Errors
    /// Returns error if the label source cannot be queried
    fn join(&self, entity_ids: &[i64], as_of_date: NaiveDate) -> Result<Vec<LabeledDocument>>;
}

impl<T: LabelJoiner + ?Sized> LabelJoiner for Rc<T> {
    fn join(&self, entity_ids: &[i64], as_of_date: NaiveDate) -> Result<Vec<LabeledDocument>> {
        (**self).join(entity_ids, as_of_date)
    }
}

/// One dated document with labels, as held by [`StaticLabelJoiner`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatedDocument {
    /// Bill identifier
    pub entity_id: i64,
    /// Document identifier
    pub doc_id: String,
    /// Date the document version appeared
    pub doc_date: NaiveDate,
    /// Labels of the bill
    pub labels: IssueLabels,
}

/// In-memory label source.
///
/// For each entity the latest document strictly before the as-of-date wins.
#[derive(Debug, Clone, Default)]
pub struct StaticLabelJoiner {
    documents: Vec<DatedDocument>,
}

impl StaticLabelJoiner {
    /// Create from dated documents
    #[must_use]
    pub const fn new(documents: Vec<DatedDocument>) -> Self {
        Self { documents }
    }
}

impl LabelJoiner for StaticLabelJoiner {
    fn join(&self, entity_ids: &[i64], as_of_date: NaiveDate) -> Result<Vec<LabeledDocument>> {
        let mut out = Vec::with_capacity(entity_ids.len());
        for &entity_id in entity_ids {
            let latest = self
                .documents
                .iter()
                .filter(|d| d.entity_id == entity_id && d.doc_date < as_of_date)
                .max_by_key(|d| d.doc_date);
            if let Some(doc) = latest {
                out.push(LabeledDocument {
                    entity_id,
                    doc_id: doc.doc_id.clone(),
                    as_of_date,
                    labels: doc.labels,
                });
            }
        }
        Ok(out)
    }
}

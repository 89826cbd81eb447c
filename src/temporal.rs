//! Temporal splits
//!
//! The chopping algorithm is an external service: given a
//! [`TemporalConfig`](crate::config::TemporalConfig) it returns a
//! deterministic, ordered list of [`TimeSplit`]s. This module only defines
//! the split type, its non-leakage contract and the [`TemporalChopper`]
//! seam.

use crate::config::TemporalConfig;
use crate::matrix::MatrixType;
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A paired train and test window of as-of-dates.
///
/// Every train date is strictly earlier than every test date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTimeSplit")]
pub struct TimeSplit {
    index: usize,
    train_as_of_dates: Vec<NaiveDate>,
    test_as_of_dates: Vec<NaiveDate>,
}

#[derive(Deserialize)]
struct RawTimeSplit {
    index: usize,
    train_as_of_dates: Vec<NaiveDate>,
    test_as_of_dates: Vec<NaiveDate>,
}

impl TryFrom<RawTimeSplit> for TimeSplit {
    type Error = Error;

    fn try_from(raw: RawTimeSplit) -> Result<Self> {
        Self::new(raw.index, raw.train_as_of_dates, raw.test_as_of_dates)
    }
}

impl TimeSplit {
    /// Create a split.
    ///
    /// Dates are sorted and deduplicated.
    ///
    /// # Errors
    /// Returns error if either side is empty or the windows overlap
    pub fn new(
        index: usize,
        mut train_as_of_dates: Vec<NaiveDate>,
        mut test_as_of_dates: Vec<NaiveDate>,
    ) -> Result<Self> {
        train_as_of_dates.sort_unstable();
        train_as_of_dates.dedup();
        test_as_of_dates.sort_unstable();
        test_as_of_dates.dedup();

        let (Some(last_train), Some(first_test)) =
            (train_as_of_dates.last(), test_as_of_dates.first())
        else {
            return Err(Error::Config(format!(
                "time split {index} needs at least one train and one test as-of-date"
            )));
        };
        if last_train >= first_test {
            return Err(Error::Config(format!(
                "time split {index} leaks: train date {last_train} is not before test date {first_test}"
            )));
        }

        Ok(Self {
            index,
            train_as_of_dates,
            test_as_of_dates,
        })
    }

    /// Position in the chopper's output
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Train as-of-dates, ascending
    #[must_use]
    pub fn train_as_of_dates(&self) -> &[NaiveDate] {
        &self.train_as_of_dates
    }

    /// Test as-of-dates, ascending
    #[must_use]
    pub fn test_as_of_dates(&self) -> &[NaiveDate] {
        &self.test_as_of_dates
    }

    /// As-of-dates of one side
    #[must_use]
    pub fn dates(&self, matrix_type: MatrixType) -> &[NaiveDate] {
        match matrix_type {
            MatrixType::Train => &self.train_as_of_dates,
            MatrixType::Test => &self.test_as_of_dates,
        }
    }

    /// Inclusive date window of one side
    #[must_use]
    pub fn window(&self, matrix_type: MatrixType) -> DateWindow {
        let dates = self.dates(matrix_type);
        // both sides are non-empty by construction
        DateWindow {
            start: dates[0],
            end: dates[dates.len() - 1],
        }
    }
}

/// Inclusive date range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    /// First date
    pub start: NaiveDate,
    /// Last date
    pub end: NaiveDate,
}

impl DateWindow {
    /// Whether `date` falls inside the window
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// External temporal-chop service.
pub trait TemporalChopper {
    /// Ordered, deterministic splits for `config`.
    ///
    /// # Errors
    /// Returns error if the service cannot produce splits
    fn chop(&self, config: &TemporalConfig) -> Result<Vec<TimeSplit>>;
}

/// Chopper that replays precomputed splits.
#[derive(Debug, Clone, Default)]
pub struct StaticChopper {
    splits: Vec<TimeSplit>,
}

impl StaticChopper {
    /// Create from splits
    #[must_use]
    pub const fn new(splits: Vec<TimeSplit>) -> Self {
        Self { splits }
    }

    /// Load splits from a JSON array of
    /// `{index, train_as_of_dates, test_as_of_dates}`.
    ///
    /// # Errors
    /// Returns error if the document is malformed or a split leaks
    pub fn from_json(json: &str) -> Result<Self> {
        let splits: Vec<TimeSplit> =
            serde_json::from_str(json).map_err(|e| Error::Config(format!("time splits: {e}")))?;
        Ok(Self::new(splits))
    }

    /// Load splits from a JSON file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&json)
    }
}

impl TemporalChopper for StaticChopper {
    fn chop(&self, _config: &TemporalConfig) -> Result<Vec<TimeSplit>> {
        Ok(self.splits.clone())
    }
}

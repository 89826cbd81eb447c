//! Cohort resolution
//!
//! A cohort is the set of entities eligible for labeling and scoring at an
//! as-of-date. The configured query template carries an `{as_of_date}`
//! placeholder; it is validated once at load time with `sqlparser` and
//! bound as a query parameter when run, never spliced into the SQL text.

use crate::{Error, Result};
use chrono::NaiveDate;
use sqlparser::ast::{SetExpr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Placeholder substituted with the as-of-date
pub const AS_OF_DATE_PLACEHOLDER: &str = "{as_of_date}";

const QUOTED_PLACEHOLDER: &str = "'{as_of_date}'";

/// Resolves the entities eligible at an as-of-date.
pub trait CohortResolver {
    /// Entity ids in a stable order.
    ///
    /// An empty cohort is a valid result, not an error.
    ///
    /// # Errors
    /// Returns error if the cohort source cannot be queried
    fn resolve(&self, as_of_date: NaiveDate) -> Result<Vec<i64>>;
}

impl<T: CohortResolver + ?Sized> CohortResolver for Rc<T> {
    fn resolve(&self, as_of_date: NaiveDate) -> Result<Vec<i64>> {
        (**self).resolve(as_of_date)
    }
}

/// A validated cohort query template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortQuery {
    template: String,
}

impl CohortQuery {
    /// Validate a template.
    ///
    /// # Errors
    /// Returns error if the placeholder is missing or the template is not a
    /// single `SELECT`
    ///
    /// # Example
    /// ```
    /// use legisml::cohort::CohortQuery;
    ///
    /// let q = CohortQuery::parse("SELECT bill_id FROM bills WHERE introduced < '{as_of_date}'").unwrap();
    /// assert_eq!(q.to_parameterized(), "SELECT bill_id FROM bills WHERE introduced < ?1");
    /// ```
    pub fn parse(template: &str) -> Result<Self> {
        if !template.contains(AS_OF_DATE_PLACEHOLDER) {
            return Err(Error::Config(format!(
                "cohort query must contain the {AS_OF_DATE_PLACEHOLDER} placeholder"
            )));
        }

        let substituted = template
            .replace(QUOTED_PLACEHOLDER, "'2000-01-01'")
            .replace(AS_OF_DATE_PLACEHOLDER, "'2000-01-01'");
        let statements = Parser::parse_sql(&GenericDialect {}, &substituted)
            .map_err(|e| Error::Config(format!("cohort query does not parse: {e}")))?;

        if statements.len() != 1 {
            return Err(Error::Config(
                "cohort query must be a single statement".to_string(),
            ));
        }
        let Statement::Query(query) = &statements[0] else {
            return Err(Error::Config("cohort query must be a SELECT".to_string()));
        };
        if !matches!(query.body.as_ref(), SetExpr::Select(_) | SetExpr::SetOperation { .. }) {
            return Err(Error::Config("cohort query must be a SELECT".to_string()));
        }

        Ok(Self {
            template: template.to_string(),
        })
    }

    /// The template as configured
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// SQL with every placeholder replaced by the positional parameter `?1`
    #[must_use]
    pub fn to_parameterized(&self) -> String {
        self.template
            .replace(QUOTED_PLACEHOLDER, "?1")
            .replace(AS_OF_DATE_PLACEHOLDER, "?1")
    }
}

/// Cohort source backed by a fixed date → entities table.
#[derive(Debug, Clone, Default)]
pub struct StaticCohortResolver {
    cohorts: BTreeMap<NaiveDate, Vec<i64>>,
}

impl StaticCohortResolver {
    /// Create an empty resolver
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cohort for one as-of-date
    #[must_use]
    pub fn with_cohort(mut self, as_of_date: NaiveDate, entity_ids: Vec<i64>) -> Self {
        self.cohorts.insert(as_of_date, entity_ids);
        self
    }

    /// Use the same cohort for every as-of-date in `dates`
    #[must_use]
    pub fn with_cohort_for_all(mut self, dates: &[NaiveDate], entity_ids: &[i64]) -> Self {
        for &date in dates {
            self.cohorts.insert(date, entity_ids.to_vec());
        }
        self
    }
}

impl CohortResolver for StaticCohortResolver {
    fn resolve(&self, as_of_date: NaiveDate) -> Result<Vec<i64>> {
        Ok(self.cohorts.get(&as_of_date).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_select_with_placeholder() {
        let q = CohortQuery::parse(
            "SELECT DISTINCT bill_id FROM bill_docs WHERE doc_date < '{as_of_date}'",
        )
        .unwrap();
        assert_eq!(
            q.to_parameterized(),
            "SELECT DISTINCT bill_id FROM bill_docs WHERE doc_date < ?1"
        );
    }

    #[test]
    fn test_parse_accepts_bare_placeholder() {
        let q = CohortQuery::parse("SELECT bill_id FROM bills WHERE d < {as_of_date}").unwrap();
        assert_eq!(q.to_parameterized(), "SELECT bill_id FROM bills WHERE d < ?1");
    }

    #[test]
    fn test_parse_rejects_missing_placeholder() {
        let err = CohortQuery::parse("SELECT bill_id FROM bills").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_parse_rejects_non_select() {
        assert!(CohortQuery::parse("DELETE FROM bills WHERE d < '{as_of_date}'").is_err());
        assert!(CohortQuery::parse(
            "SELECT 1 WHERE '{as_of_date}' > ''; SELECT 2"
        )
        .is_err());
        assert!(CohortQuery::parse("SELEC bill_id FROM x WHERE d < '{as_of_date}'").is_err());
    }

    #[test]
    fn test_static_resolver_empty_cohort_is_ok() {
        let date = NaiveDate::from_ymd_opt(2019, 1, 1).unwrap();
        let resolver = StaticCohortResolver::new().with_cohort(date, vec![7, 9]);
        assert_eq!(resolver.resolve(date).unwrap(), vec![7, 9]);
        let other = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert!(resolver.resolve(other).unwrap().is_empty());
    }
}

//! Experiment configuration
//!
//! An experiment is described by one YAML document:
//!
//! ```yaml
//! temporal_config:
//!   feature_start_time: 2015-01-01
//!   label_timespans: 1y
//! cohort_config:
//!   query: "SELECT bill_id AS entity_id FROM bills WHERE introduced_date < '{as_of_date}'"
//! features:
//!   type: tfidf
//!   hyperparameters: {min_df: 2}
//! preprocessing_config: [lowercase, remove_punctuation, collapse_whitespace]
//! es_config: {query_size: 100, text_field: description}
//! grid_config:
//!   linear.LogisticRegression: {C: [0.1, 1.0]}
//! issue_areas: [reproductive_rights, passage]
//! ```
//!
//! Parsing only checks shape; [`ExperimentConfig::validate`] checks the
//! values against the known issue areas, model types and SQL grammar.

use crate::cohort::CohortQuery;
use crate::evaluation::EvaluationConfig;
use crate::labels::IssueArea;
use crate::matrix::StorageFormat;
use crate::model::{EstimatorFactory, GridConfig};
use crate::registry::hashing;
use crate::text::{FeatureType, PreprocessingStep, SparseMatrixBuilder};
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

/// Options handed to the temporal chopper.
///
/// Interval-valued options accept a single value or a list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemporalConfig {
    /// Earliest date features may draw on
    #[serde(default)]
    pub feature_start_time: Option<NaiveDate>,
    /// Latest date features may draw on
    #[serde(default)]
    pub feature_end_time: Option<NaiveDate>,
    /// Earliest label date
    #[serde(default)]
    pub label_start_time: Option<NaiveDate>,
    /// Latest label date
    #[serde(default)]
    pub label_end_time: Option<NaiveDate>,
    /// Spacing between splits, e.g. `1month`
    #[serde(default)]
    pub model_update_frequency: Option<String>,
    /// Training history lengths
    #[serde(default, deserialize_with = "one_or_many")]
    pub max_training_histories: Vec<String>,
    /// Training as-of-date spacings
    #[serde(default, deserialize_with = "one_or_many")]
    pub training_as_of_date_frequencies: Vec<String>,
    /// Test as-of-date spacings
    #[serde(default, deserialize_with = "one_or_many")]
    pub test_as_of_date_frequencies: Vec<String>,
    /// Test window lengths
    #[serde(default, deserialize_with = "one_or_many")]
    pub test_durations: Vec<String>,
    /// Label window lengths
    #[serde(default, deserialize_with = "one_or_many")]
    pub label_timespans: Vec<String>,
    /// Chopper-specific options, passed through untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Cohort definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CohortConfig {
    /// SQL template containing `{as_of_date}`
    pub query: String,
}

/// Vectorizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureConfig {
    /// `count`, `binary` or `tfidf`
    #[serde(rename = "type")]
    pub feature_type: FeatureType,
    /// Overrides of the type's default hyperparameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hyperparameters: Option<Map<String, Value>>,
}

/// Text retrieval options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextConfig {
    /// Maximum ids per text store request
    #[serde(default = "TextConfig::default_query_size")]
    pub query_size: usize,
    /// Document field holding the text
    #[serde(default = "TextConfig::default_text_field")]
    pub text_field: String,
}

impl TextConfig {
    const fn default_query_size() -> usize {
        100
    }

    fn default_text_field() -> String {
        "description".to_string()
    }
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            query_size: Self::default_query_size(),
            text_field: Self::default_text_field(),
        }
    }
}

/// A complete experiment definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Temporal chopper options
    #[serde(default)]
    pub temporal_config: TemporalConfig,
    /// Cohort query
    pub cohort_config: CohortConfig,
    /// Vectorizer
    pub features: FeatureConfig,
    /// Ordered text normalization steps
    #[serde(default)]
    pub preprocessing_config: Vec<PreprocessingStep>,
    /// Text retrieval
    #[serde(default)]
    pub es_config: TextConfig,
    /// Model type → hyperparameter grid
    pub grid_config: GridConfig,
    /// Label targets, trained independently
    pub issue_areas: Vec<String>,
    /// Matrix storage format
    #[serde(default)]
    pub feature_matrix_storage_format: StorageFormat,
    /// Ranking metrics to compute on every scored matrix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationConfig>,
    /// Unrecognized top-level keys; kept so they count toward the experiment hash
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ExperimentConfig {
    /// Parse a YAML document.
    ///
    /// # Errors
    /// Returns a YAML error if the document is malformed or misses a
    /// required section
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse a YAML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let config = Self::from_yaml_str(&yaml)?;
        debug!(path = %path.display(), "loaded experiment config");
        Ok(config)
    }

    /// Check every value that parsing cannot.
    ///
    /// # Errors
    /// Returns the first configuration error found
    pub fn validate(&self, factory: &EstimatorFactory) -> Result<()> {
        for section in self.unrecognized_sections() {
            warn!(section, "unrecognized config section; it only affects the experiment hash");
        }
        self.issue_areas()?;
        self.cohort_query()?;
        SparseMatrixBuilder::new(
            self.features.feature_type,
            self.features.hyperparameters.as_ref(),
        )?;

        if self.es_config.query_size == 0 {
            return Err(Error::Config("es_config.query_size must be positive".to_string()));
        }
        if !is_identifier(&self.es_config.text_field) {
            return Err(Error::Config(format!(
                "es_config.text_field '{}' is not a plain field name",
                self.es_config.text_field
            )));
        }

        if self.grid_config.is_empty() {
            return Err(Error::Config("grid_config names no model types".to_string()));
        }
        for model_type in self.grid_config.keys() {
            if !factory.contains(model_type) {
                return Err(Error::Config(format!(
                    "unknown model type '{model_type}' in grid_config (known: {})",
                    factory.model_types().collect::<Vec<_>>().join(", ")
                )));
            }
        }

        if let Some(evaluation) = &self.evaluation {
            if let Some(p) = evaluation
                .percentiles
                .iter()
                .find(|p| !(**p > 0.0 && **p <= 100.0))
            {
                return Err(Error::Config(format!(
                    "evaluation percentile {p} is outside (0, 100]"
                )));
            }
        }
        Ok(())
    }

    /// Top-level keys that match no known section, e.g. a misspelled `evaluation`
    pub fn unrecognized_sections(&self) -> impl Iterator<Item = &str> {
        self.extra.keys().map(String::as_str)
    }

    /// Configured issue areas, in order.
    ///
    /// # Errors
    /// Returns an error if the list is empty, repeats an area or names an
    /// unknown one
    pub fn issue_areas(&self) -> Result<Vec<IssueArea>> {
        if self.issue_areas.is_empty() {
            return Err(Error::Config("issue_areas is empty".to_string()));
        }
        let mut areas = Vec::with_capacity(self.issue_areas.len());
        for name in &self.issue_areas {
            let area: IssueArea = name.parse()?;
            if areas.contains(&area) {
                return Err(Error::Config(format!("issue area '{area}' listed twice")));
            }
            areas.push(area);
        }
        Ok(areas)
    }

    /// Parsed cohort template.
    ///
    /// # Errors
    /// Returns a configuration error if the template is invalid
    pub fn cohort_query(&self) -> Result<CohortQuery> {
        CohortQuery::parse(&self.cohort_config.query)
    }

    /// The configuration as JSON, the form that is hashed and registered.
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Identity of the configured vectorizer, defaults included.
    ///
    /// # Errors
    /// Returns a configuration error if the hyperparameters are invalid
    pub fn feature_group_hash(&self) -> Result<String> {
        let builder = SparseMatrixBuilder::new(
            self.features.feature_type,
            self.features.hyperparameters.as_ref(),
        )?;
        Ok(hashing::feature_group_hash(
            builder.feature_type().as_str(),
            &builder.resolved_hyperparameters(),
        ))
    }

    /// Experiment identity.
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn experiment_hash(&self) -> Result<String> {
        Ok(hashing::experiment_hash(&self.to_value()?))
    }
}

fn is_identifier(field: &str) -> bool {
    let mut chars = field.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
temporal_config:
  feature_start_time: 2015-01-01
  label_timespans: 1y
  max_training_histories: [1y, 2y]
cohort_config:
  query: "SELECT bill_id AS entity_id FROM bills WHERE introduced_date < '{as_of_date}'"
features:
  type: count
preprocessing_config: [lowercase, remove_punctuation]
grid_config:
  linear.LogisticRegression:
    C: [0.1, 1.0]
issue_areas: [passage, voting_rights]
"#;

    #[test]
    fn test_parse_with_defaults() {
        let config = ExperimentConfig::from_yaml_str(CONFIG).unwrap();
        assert_eq!(config.es_config, TextConfig::default());
        assert_eq!(config.feature_matrix_storage_format, StorageFormat::Sparse);
        assert_eq!(config.temporal_config.label_timespans, vec!["1y"]);
        assert_eq!(config.temporal_config.max_training_histories, vec!["1y", "2y"]);
        assert_eq!(
            config.temporal_config.feature_start_time,
            NaiveDate::from_ymd_opt(2015, 1, 1)
        );
        config.validate(&EstimatorFactory::default()).unwrap();
        assert_eq!(
            config.issue_areas().unwrap(),
            vec![IssueArea::Passage, IssueArea::VotingRights]
        );
    }

    #[test]
    fn test_unknown_issue_area_fails_fast() {
        let yaml = CONFIG.replace("voting_rights", "taxes");
        let config = ExperimentConfig::from_yaml_str(&yaml).unwrap();
        let err = config.validate(&EstimatorFactory::default()).unwrap_err();
        assert!(matches!(err, Error::UnknownIssueArea(ref name) if name == "taxes"));
    }

    #[test]
    fn test_unknown_model_type_rejected() {
        let yaml = CONFIG.replace("linear.LogisticRegression", "sklearn.svm.SVC");
        let config = ExperimentConfig::from_yaml_str(&yaml).unwrap();
        assert!(matches!(
            config.validate(&EstimatorFactory::default()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_bad_preprocessing_step_fails_parse() {
        let yaml = CONFIG.replace("remove_punctuation", "stem");
        assert!(matches!(
            ExperimentConfig::from_yaml_str(&yaml),
            Err(Error::Yaml(_))
        ));
    }

    #[test]
    fn test_text_field_must_be_identifier() {
        let mut config = ExperimentConfig::from_yaml_str(CONFIG).unwrap();
        config.es_config.text_field = "description; drop".to_string();
        assert!(config.validate(&EstimatorFactory::default()).is_err());
        config.es_config.text_field = "doc.description".to_string();
        assert!(config.validate(&EstimatorFactory::default()).is_ok());
    }

    #[test]
    fn test_experiment_hash_ignores_key_order() {
        let a = ExperimentConfig::from_yaml_str(CONFIG).unwrap();
        let reordered = "issue_areas: [passage, voting_rights]\n".to_string()
            + &CONFIG.replace("issue_areas: [passage, voting_rights]\n", "");
        let b = ExperimentConfig::from_yaml_str(&reordered).unwrap();
        assert_eq!(a.experiment_hash().unwrap(), b.experiment_hash().unwrap());

        let mut c = a.clone();
        c.es_config.query_size = 50;
        assert_ne!(a.experiment_hash().unwrap(), c.experiment_hash().unwrap());
    }

    #[test]
    fn test_misspelled_section_is_reported_and_hashed() {
        let plain = ExperimentConfig::from_yaml_str(CONFIG).unwrap();
        assert_eq!(plain.unrecognized_sections().count(), 0);

        let yaml = format!("{CONFIG}evalution:\n  top_n: [5]\n");
        let config = ExperimentConfig::from_yaml_str(&yaml).unwrap();
        assert!(config.evaluation.is_none());
        assert_eq!(config.unrecognized_sections().collect::<Vec<_>>(), ["evalution"]);
        config.validate(&EstimatorFactory::default()).unwrap();
        assert_ne!(plain.experiment_hash().unwrap(), config.experiment_hash().unwrap());
    }
}

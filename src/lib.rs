//! # legisml: Experiment-Scoped Feature Matrices and Model Registry
//!
//! legisml builds the train/test feature matrices for the bill issue-area
//! classifier, caches them under content-derived identities, trains a grid
//! of estimators against them and records which configuration produced which
//! matrix, model and prediction in a relational registry.
//!
//! ## Pipeline
//!
//! ```text
//! ExperimentOrchestrator
//!   └─ per TimeSplit: CohortResolver → LabelJoiner → TextRetriever
//!        → TextPreprocessor → SparseMatrixBuilder → MatrixStore (write)
//!        → Registry (feature group, feature creator, matrices)
//!   └─ ModelGrid: Registry (model group, model) → MatrixStore (read)
//!        → Estimator fit/score → predictions + evaluations
//! ```
//!
//! ## Design Principles
//!
//! - **Temporal non-leakage**: a matrix only ever contains rows whose
//!   as-of-date lies in its own side of the split, and the vocabulary is
//!   fitted on the train side only
//! - **Content addressing**: feature groups, feature creators, matrices and
//!   models are identified by hashes of what produced them
//! - **Fail loud at the top**: configuration and registry failures abort the
//!   run; storage and estimator failures only skip the affected cell
//!
//! ## Example
//!
//! ```rust
//! use legisml::registry::hashing;
//! use serde_json::json;
//!
//! let a = hashing::feature_group_hash("tfidf", &json!({"min_df": 2, "max_df": 0.9}));
//! let b = hashing::feature_group_hash("tfidf", &json!({"max_df": 0.9, "min_df": 2}));
//! assert_eq!(a, b);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod blob;
pub mod cohort;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod labels;
pub mod matrix;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod sources;
pub mod temporal;
pub mod text;

pub use error::{Error, Result};

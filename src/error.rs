//! Error types for legisml
//!
//! The variants follow the failure taxonomy of an experiment run:
//! registry write failures and configuration errors abort the run, while
//! storage, codec and estimator failures only cost the affected split or
//! grid cell.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// legisml error types
#[derive(Error, Debug)]
pub enum Error {
    /// A provenance row could not be written; downstream rows would be orphaned
    #[error("Registry write failed on {table}: {message}")]
    RegistryWrite {
        /// Registry table that rejected the write
        table: &'static str,
        /// Underlying failure
        message: String,
    },

    /// A registry row that must exist is missing
    #[error("Registry lookup failed: {0}")]
    RegistryLookup(String),

    /// Invalid or incomplete experiment configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Issue area is not one of the known label targets
    #[error("Unknown issue area '{0}'\nKnown issue areas: reproductive_rights, criminal_law_reform, immigrant_rights, lgbt_rights, racial_justice, voting_rights, passage")]
    UnknownIssueArea(String),

    /// Blob storage failure (missing matrix, unreachable object store)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Matrix document could not be encoded or decoded
    #[error("Matrix codec error: {0}")]
    Codec(String),

    /// Estimator construction, fit or scoring failure
    #[error("Model error: {0}")]
    Model(String),

    /// Upstream data source query failed
    #[error("Data source query failed: {0}")]
    Query(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Whether the failure only affects one split or grid cell.
    ///
    /// Storage, codec and estimator failures are logged and the offending
    /// unit of work is skipped. Everything else aborts the run.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Storage(_)
                | Self::Io(_)
                | Self::Codec(_)
                | Self::Model(_)
                | Self::Arrow(_)
                | Self::Parquet(_)
        )
    }

    pub(crate) fn registry_write(table: &'static str, source: impl std::fmt::Display) -> Self {
        Self::RegistryWrite {
            table,
            message: source.to_string(),
        }
    }
}

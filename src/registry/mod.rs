//! Provenance registry
//!
//! - [`hashing`]: deterministic content hashes for every identity
//! - [`records`]: typed registry rows
//! - [`Registry`]: the SQLite store with atomic upserts

pub mod hashing;
pub mod records;
mod schema;
mod store;

pub use records::{
    EvaluationRecord, ExperimentRecord, FeatureGroup, MatrixMetadata, MatrixPair, MatrixRecord,
    MatrixRef, ModelRecord, PredictionRecord, RunRecord, RunRecordBuilder, RunStatus,
};
pub use schema::RegistryTable;
pub use store::{PredictionTable, Registry};

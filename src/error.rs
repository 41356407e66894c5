//! Error taxonomy for the pipeline
//!
//! Each phase classifies failures at its own boundary:
//! - [`ExtractionError`] is per source and never aborts a run
//! - [`StagingError`] always aborts a run (staged data is the hand-off between phases)
//! - [`DestinationError`] degrades a run to "load pending" unless it is an
//!   identity conflict, which the loader works around
//! - [`EtlError`] is what a failed run reports to its caller

use std::path::PathBuf;
use thiserror::Error;

/// A single source failed to produce records.
#[derive(Debug, Error)]
#[error("extraction from '{source_name}' failed: {cause}")]
pub struct ExtractionError {
    pub source_name: String,
    #[source]
    pub cause: ExtractCause,
}

impl ExtractionError {
    pub fn new(source_name: impl Into<String>, cause: impl Into<ExtractCause>) -> Self {
        Self {
            source_name: source_name.into(),
            cause: cause.into(),
        }
    }
}

/// Underlying reason an extraction failed.
#[derive(Debug, Error)]
pub enum ExtractCause {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error("extraction task did not complete: {0}")]
    Task(String),
}

/// Staging failures. Write-side and read-side variants are both fatal to a run.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("failed to write staging snapshot {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode staging snapshot for '{source_name}': {source}")]
    Encode {
        source_name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to read staging snapshot {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt staging snapshot {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid staging source name '{source_name}': {source}")]
    InvalidName {
        source_name: String,
        #[source]
        source: regex::Error,
    },
}

impl StagingError {
    /// True for failures raised while persisting a snapshot.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write { .. } | Self::Encode { .. })
    }
}

/// Failures reported by a [`crate::destination::Destination`].
#[derive(Debug, Error)]
pub enum DestinationError {
    /// The destination refused an explicit value for an auto-generated key.
    #[error("explicit value refused for identity column of table '{table}': {message}")]
    IdentityConflict { table: String, message: String },
    #[error("record for table '{table}' is not a flat object")]
    NotAnObject { table: String },
    #[error("failed to encode record for table '{table}': {source}")]
    Encode {
        table: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("{0}")]
    Other(String),
}

impl DestinationError {
    pub fn is_identity_conflict(&self) -> bool {
        matches!(self, Self::IdentityConflict { .. })
    }
}

/// A destination failure while loading a specific table.
#[derive(Debug, Error)]
#[error("failed to load table '{table}': {source}")]
pub struct LoadError {
    pub table: String,
    #[source]
    pub source: DestinationError,
}

/// Why a pipeline run ended in the `Failed` state.
#[derive(Debug, Error)]
pub enum EtlError {
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error("run cancelled during {0} phase")]
    Cancelled(crate::etl::Phase),
    #[error("unexpected failure: {0}")]
    Unexpected(String),
}


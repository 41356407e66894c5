//! Analytics ETL
//!
//! A staged ETL worker: CSV files, a relational source and an HTTP API are
//! extracted into timestamped staging snapshots, cleaned, and loaded into an
//! analytics store while preserving source keys.

pub mod cli;
pub mod client;
pub mod config;
pub mod destination;
pub mod error;
pub mod etl;
pub mod records;
pub mod sources;
pub mod storage;
pub mod worker;

// Re-exports for convenience
pub use config::Settings;
pub use error::{EtlError, ExtractionError, StagingError};
pub use etl::{Extractor, IdentityLoader, Pipeline, PipelineRun, Transformer};
pub use storage::StagingStore;

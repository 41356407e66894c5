//! Core ETL (Extract, Transform, Load) building blocks
//!
//! Extractors pull records from one source each, transformers reshape staged
//! batches, the loader writes them to the destination, and [`Pipeline`]
//! orchestrates one run over all of them.

mod extract;
mod load;
mod pipeline;
mod run;
mod transform;

pub use extract::{Extractor, extract_observed};
pub use load::IdentityLoader;
pub use pipeline::{API_REVIEWS, Pipeline, transformed_name};
pub use run::{LoadPending, Phase, PipelineRun, SourceOutcome, SourceStatus};
pub use transform::{Chain, Deduplicator, PassThrough, Transformer, ValidityFilter};

//! Source extractors
//!
//! One extractor per source type:
//! - [`CsvExtractor`] for delimited text files
//! - [`DatabaseExtractor`] for a relational (SQLite) source
//! - [`ApiExtractor`] for a JSON HTTP API

mod api;
mod csv;
mod database;

pub use api::{ApiExtractor, decode_records};
pub use csv::CsvExtractor;
pub use database::{DatabaseExtractor, Query, quote_identifier};

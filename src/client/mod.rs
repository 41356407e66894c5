//! HTTP API client used by the API extractor.
//!
//! This module provides the [`ApiClient`], a thin wrapper over `reqwest` that
//! carries the base URL, the API key header and the request timeout.

mod api;

pub use api::{ApiClient, DEFAULT_TIMEOUT};

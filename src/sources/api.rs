//! HTTP API extractor
//!
//! Issues a single GET against a configured endpoint and decodes a JSON array.

use crate::client::ApiClient;
use crate::error::{ExtractCause, ExtractionError};
use crate::etl::Extractor;
use crate::records::{Record, normalize_keys};
use serde_json::Value;
use std::marker::PhantomData;

/// Extractor for one API endpoint returning a JSON array of records
///
/// - A non-success status yields an empty sequence and a warning
/// - A transport failure (refused connection, timeout) yields an empty
///   sequence and an error log
/// - An empty body or a `null` body yields an empty sequence
/// - Field names are matched ignoring case
/// - A body that is not a JSON array of records is an [`ExtractionError`]
pub struct ApiExtractor<T> {
    client: ApiClient,
    endpoint: String,
    name: String,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: Record> ApiExtractor<T> {
    /// Create a new API extractor
    ///
    /// # Arguments
    /// * `client` - API client carrying base URL, key and timeout
    /// * `endpoint` - Path relative to the client's base URL
    /// * `name` - Extractor name for logs
    pub fn new(client: ApiClient, endpoint: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            name: name.into(),
            _phantom: PhantomData,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn error(&self, cause: impl Into<ExtractCause>) -> ExtractionError {
        ExtractionError::new(&self.name, cause)
    }
}

/// Decode a response body into records, matching field names ignoring case.
pub fn decode_records<T: Record>(body: &[u8]) -> Result<Vec<T>, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let value: Value = serde_json::from_slice(body)?;
    if value.is_null() {
        return Ok(Vec::new());
    }

    serde_json::from_value(normalize_keys(value, T::FIELDS))
}

impl<T: Record> Extractor for ApiExtractor<T> {
    type Item = T;

    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(&self) -> Result<Vec<Self::Item>, ExtractionError> {
        log::debug!("Starting API extraction from {} for {}", self.endpoint, self.name);

        let response = match self.client.get(&self.endpoint).await {
            Ok(response) => response,
            Err(e) => {
                log::error!("HTTP error extracting data from API {}: {:#}", self.endpoint, e);
                return Ok(Vec::new());
            }
        };

        let status = response.status();
        if !status.is_success() {
            log::warn!(
                "API request failed with status {} for {}",
                status,
                self.endpoint
            );
            return Ok(Vec::new());
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                log::error!("HTTP error reading API response from {}: {}", self.endpoint, e);
                return Ok(Vec::new());
            }
        };
        decode_records(&body).map_err(|e| self.error(e))
    }
}

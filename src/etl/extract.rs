//! Extractor trait for pulling records out of a source

use crate::error::ExtractionError;
use std::time::Instant;

/// Extractor trait for extracting records from exactly one source
///
/// Implementors define how to read records from sources like:
/// - Delimited text files
/// - Relational databases
/// - HTTP APIs
///
/// An extractor either returns a (possibly empty) sequence or an
/// [`ExtractionError`]; there is no "absent" result.
///
/// # Example
/// ```no_run
/// use analytics_etl::error::ExtractionError;
/// use analytics_etl::etl::Extractor;
///
/// struct Numbers;
///
/// impl Extractor for Numbers {
///     type Item = i64;
///
///     fn name(&self) -> &str {
///         "Numbers"
///     }
///
///     async fn extract(&self) -> Result<Vec<Self::Item>, ExtractionError> {
///         Ok(vec![1, 2, 3])
///     }
/// }
/// ```
pub trait Extractor: Send + Sync {
    /// The type of records extracted
    type Item: Send;

    /// Name used in logs and error reports
    fn name(&self) -> &str;

    /// Extract records from the source
    ///
    /// # Errors
    /// Returns an error if the source cannot be read or decoded
    fn extract(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Self::Item>, ExtractionError>> + Send;
}

/// Run an extractor with uniform start/finish logging, record count and timing.
pub async fn extract_observed<E: Extractor>(
    extractor: &E,
) -> Result<Vec<E::Item>, ExtractionError> {
    let started = Instant::now();
    log::info!("Starting extraction for {}", extractor.name());

    match extractor.extract().await {
        Ok(records) => {
            log::info!(
                "Extracted {} records from {} in {}ms",
                records.len(),
                extractor.name(),
                started.elapsed().as_millis()
            );
            Ok(records)
        }
        Err(e) => {
            log::error!(
                "Extraction for {} failed after {}ms: {}",
                extractor.name(),
                started.elapsed().as_millis(),
                e
            );
            Err(e)
        }
    }
}

//! Delimited text file extractor

use crate::error::{ExtractCause, ExtractionError};
use crate::etl::Extractor;
use crate::records::{Record, canonical_name};
use csv::{ByteRecord, ReaderBuilder, StringRecord, Trim};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Extracts records from a CSV file with a header row.
///
/// Mapping is best effort: headers are matched to record fields ignoring case,
/// unknown columns are ignored, missing columns take the field default, and
/// every header and field is trimmed. Rows that still cannot be mapped are
/// skipped with a warning.
///
/// # Example
/// ```no_run
/// use analytics_etl::etl::Extractor;
/// use analytics_etl::records::Customer;
/// use analytics_etl::sources::CsvExtractor;
///
/// # async fn example() -> Result<(), analytics_etl::error::ExtractionError> {
/// let extractor = CsvExtractor::<Customer>::new("data/customers.csv", "CsvCustomers");
/// let customers = extractor.extract().await?;
/// # Ok(())
/// # }
/// ```
pub struct CsvExtractor<T> {
    path: PathBuf,
    name: String,
    delimiter: u8,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: Record> CsvExtractor<T> {
    pub fn new(path: impl AsRef<Path>, name: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            name: name.into(),
            delimiter: b',',
            _phantom: PhantomData,
        }
    }

    /// Use a delimiter other than `,`
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and map every row of the file
    pub fn read(&self) -> Result<Vec<T>, ExtractionError> {
        read_file(&self.path, &self.name, self.delimiter)
    }
}

fn read_file<T: Record>(path: &Path, name: &str, delimiter: u8) -> Result<Vec<T>, ExtractionError> {
    if !path.exists() {
        log::error!("CSV file not found: {}", path.display());
        return Err(ExtractionError::new(
            name,
            ExtractCause::NotFound(path.to_path_buf()),
        ));
    }

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| ExtractionError::new(name, e))?;

    let headers: StringRecord = reader
        .headers()
        .map_err(|e| ExtractionError::new(name, e))?
        .iter()
        .map(|header| canonical_name(header, T::FIELDS).unwrap_or(header))
        .collect();
    let headers: ByteRecord = headers.into_byte_record();

    let mut records = Vec::new();
    let mut skipped = 0usize;

    // Rows are read as bytes so a field that is not valid UTF-8 only costs its row
    for (index, row) in reader.byte_records().enumerate() {
        let row = row.map_err(|e| ExtractionError::new(name, e))?;
        match row.deserialize::<T>(Some(&headers)) {
            Ok(record) => records.push(record),
            Err(e) => {
                skipped += 1;
                log::warn!(
                    "Skipping line {} of {}: {}",
                    index + 2,
                    path.display(),
                    e
                );
            }
        }
    }

    if skipped > 0 {
        log::warn!("Skipped {} unmappable rows in {}", skipped, path.display());
    }

    Ok(records)
}

impl<T: Record> Extractor for CsvExtractor<T> {
    type Item = T;

    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(&self) -> Result<Vec<Self::Item>, ExtractionError> {
        let path = self.path.clone();
        let name = self.name.clone();
        let delimiter = self.delimiter;

        tokio::task::spawn_blocking(move || read_file::<T>(&path, &name, delimiter))
            .await
            .map_err(|e| ExtractionError::new(&self.name, ExtractCause::Task(e.to_string())))?
    }
}

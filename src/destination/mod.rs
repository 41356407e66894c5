//! Analytics destination
//!
//! The loader talks to the destination through [`Destination`]; the shipped
//! implementation is [`SqliteDestination`].

mod sqlite;

pub use sqlite::SqliteDestination;

use crate::error::DestinationError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// One destination row: column name to value
pub type Row = Map<String, Value>;

/// Opens a fresh destination connection for one load phase
pub type DestinationFactory =
    Arc<dyn Fn() -> Result<Box<dyn Destination>, DestinationError> + Send + Sync>;

/// A SQL-capable store the loader can write into.
///
/// Implementations must make [`Destination::insert_rows`] all-or-nothing and
/// must report refusals of explicit identity values as
/// [`DestinationError::IdentityConflict`].
pub trait Destination: Send {
    /// Insert every row into `table`, returning the number inserted
    fn insert_rows(&mut self, table: &str, rows: &[Row]) -> Result<usize, DestinationError>;

    /// Whether `column` of `table` is an auto-generated (identity) key column
    fn is_identity_column(&self, table: &str, column: &str) -> Result<bool, DestinationError>;

    fn begin(&mut self) -> Result<(), DestinationError>;

    fn commit(&mut self) -> Result<(), DestinationError>;

    fn rollback(&mut self) -> Result<(), DestinationError>;

    /// Allow (or stop allowing) explicit values in the identity column of `table`
    fn set_identity_insert(&mut self, table: &str, enabled: bool)
    -> Result<(), DestinationError>;
}

impl<D: Destination + ?Sized> Destination for Box<D> {
    fn insert_rows(&mut self, table: &str, rows: &[Row]) -> Result<usize, DestinationError> {
        (**self).insert_rows(table, rows)
    }

    fn is_identity_column(&self, table: &str, column: &str) -> Result<bool, DestinationError> {
        (**self).is_identity_column(table, column)
    }

    fn begin(&mut self) -> Result<(), DestinationError> {
        (**self).begin()
    }

    fn commit(&mut self) -> Result<(), DestinationError> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<(), DestinationError> {
        (**self).rollback()
    }

    fn set_identity_insert(
        &mut self,
        table: &str,
        enabled: bool,
    ) -> Result<(), DestinationError> {
        (**self).set_identity_insert(table, enabled)
    }
}

/// Convert records into destination rows using their serialized field names
pub fn to_rows<T: Serialize>(table: &str, records: &[T]) -> Result<Vec<Row>, DestinationError> {
    records
        .iter()
        .map(|record| {
            match serde_json::to_value(record).map_err(|source| DestinationError::Encode {
                table: table.to_string(),
                source,
            })? {
                Value::Object(row) => Ok(row),
                _ => Err(DestinationError::NotAnObject {
                    table: table.to_string(),
                }),
            }
        })
        .collect()
}

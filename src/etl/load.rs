//! Identity-tolerant loader
//!
//! Records keep their source keys in the destination. When a table's key is
//! an identity column the destination refuses explicit values, so the loader
//! retries inside a transaction with identity insert enabled for that table.

use crate::destination::{Destination, to_rows};
use crate::error::{DestinationError, LoadError};
use crate::records::Record;

/// Loads record batches into a [`Destination`]
///
/// The loader owns its destination for one load phase and holds no records
/// between calls.
///
/// # Example
/// ```no_run
/// use analytics_etl::destination::SqliteDestination;
/// use analytics_etl::etl::IdentityLoader;
/// use analytics_etl::records::{Customer, Record};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let destination = SqliteDestination::open("analytics.db")?;
/// let mut loader = IdentityLoader::new(Box::new(destination));
/// let customers = vec![Customer { customer_id: 7, ..Default::default() }];
/// loader.load_with_identity(customers, Customer::TABLE, Customer::PRIMARY_KEY)?;
/// # Ok(())
/// # }
/// ```
pub struct IdentityLoader {
    destination: Box<dyn Destination>,
}

impl IdentityLoader {
    pub fn new(destination: Box<dyn Destination>) -> Self {
        Self { destination }
    }

    /// Insert `records` into `table`, preserving their `primary_key` values.
    ///
    /// 1. An empty batch is a no-op.
    /// 2. The batch is inserted directly.
    /// 3. If the destination refuses explicit identity values and the catalog
    ///    confirms `primary_key` is the identity column, the batch is inserted
    ///    again inside a transaction with identity insert enabled. Identity
    ///    insert is disabled again before the commit.
    ///
    /// # Errors
    /// Returns the error that stopped the load. After a failed fallback,
    /// nothing from this batch is visible and identity insert is disabled
    /// (best effort).
    pub fn load_with_identity<T: Record>(
        &mut self,
        records: Vec<T>,
        table: &str,
        primary_key: &str,
    ) -> Result<usize, LoadError> {
        if records.is_empty() {
            log::debug!("Nothing to load into {}", table);
            return Ok(0);
        }

        let fail = |source| LoadError {
            table: table.to_string(),
            source,
        };
        let rows = to_rows(table, &records).map_err(fail)?;
        drop(records);

        let conflict = match self.destination.insert_rows(table, &rows) {
            Ok(inserted) => {
                log::info!("Loaded {} rows into {}", inserted, table);
                return Ok(inserted);
            }
            Err(e) if e.is_identity_conflict() => e,
            Err(e) => return Err(fail(e)),
        };

        match self.destination.is_identity_column(table, primary_key) {
            Ok(true) => {}
            Ok(false) => {
                log::debug!(
                    "{}.{} is not an identity column; not retrying",
                    table,
                    primary_key
                );
                return Err(fail(conflict));
            }
            Err(e) => {
                log::debug!("Identity catalog lookup for {} failed: {}", table, e);
                return Err(fail(conflict));
            }
        }

        log::info!(
            "Retrying {} with IDENTITY_INSERT enabled on {}",
            table,
            primary_key
        );
        self.insert_with_identity(table, &rows).map_err(fail)
    }

    fn insert_with_identity(
        &mut self,
        table: &str,
        rows: &[crate::destination::Row],
    ) -> Result<usize, DestinationError> {
        self.destination.begin()?;

        let attempt = self
            .destination
            .set_identity_insert(table, true)
            .and_then(|()| self.destination.insert_rows(table, rows))
            .and_then(|inserted| {
                self.destination.set_identity_insert(table, false)?;
                Ok(inserted)
            })
            .and_then(|inserted| {
                self.destination.commit()?;
                Ok(inserted)
            });

        match attempt {
            Ok(inserted) => {
                log::info!(
                    "Loaded {} rows into {} with IDENTITY_INSERT",
                    inserted,
                    table
                );
                Ok(inserted)
            }
            Err(e) => {
                if let Err(off) = self.destination.set_identity_insert(table, false) {
                    log::debug!("Disabling IDENTITY_INSERT on {} failed: {}", table, off);
                }
                if let Err(rollback) = self.destination.rollback() {
                    log::warn!("Rollback on {} failed: {}", table, rollback);
                }
                Err(e)
            }
        }
    }
}

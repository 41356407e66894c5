//! SQLite analytics store with SQL-Server-style identity columns
//!
//! A table whose primary key is declared `INTEGER PRIMARY KEY AUTOINCREMENT`
//! is an identity table. A per-connection guard trigger refuses explicit key
//! values for it unless identity insert has been enabled for that table, and
//! at most one table per connection can have identity insert enabled.

use super::{Destination, Row};
use crate::error::DestinationError;
use crate::sources::quote_identifier;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, ffi, params, params_from_iter};
use serde_json::Value;
use std::path::Path;

/// Message raised by the guard trigger; also matched when classifying errors
const IDENTITY_MARKER: &str = "cannot insert explicit value for identity column";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS "Customers" (
    "CustomerID" INTEGER PRIMARY KEY AUTOINCREMENT,
    "FirstName" TEXT,
    "LastName" TEXT,
    "Email" TEXT,
    "Phone" TEXT,
    "City" TEXT,
    "Country" TEXT
);
CREATE TABLE IF NOT EXISTS "Products" (
    "ProductID" INTEGER PRIMARY KEY AUTOINCREMENT,
    "ProductName" TEXT,
    "Category" TEXT,
    "Price" REAL NOT NULL DEFAULT 0,
    "Stock" INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS "Orders" (
    "OrderID" INTEGER PRIMARY KEY AUTOINCREMENT,
    "CustomerID" INTEGER REFERENCES "Customers" ("CustomerID"),
    "OrderDate" TEXT,
    "Status" TEXT
);
CREATE TABLE IF NOT EXISTS "OrderDetails" (
    "OrderDetailID" INTEGER PRIMARY KEY AUTOINCREMENT,
    "OrderID" INTEGER REFERENCES "Orders" ("OrderID"),
    "ProductID" INTEGER REFERENCES "Products" ("ProductID"),
    "Quantity" INTEGER NOT NULL DEFAULT 0,
    "TotalPrice" REAL NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS "Reviews" (
    "ReviewID" INTEGER PRIMARY KEY AUTOINCREMENT,
    "OrderID" INTEGER,
    "CustomerID" INTEGER,
    "ProductID" INTEGER,
    "Rating" INTEGER,
    "Comment" TEXT,
    "ReviewDate" TEXT
);
CREATE TABLE IF NOT EXISTS "Comments" (
    "CommentID" INTEGER PRIMARY KEY AUTOINCREMENT,
    "OrderID" INTEGER,
    "CustomerID" INTEGER,
    "Content" TEXT,
    "CreatedDate" TEXT,
    "Status" TEXT
);
"#;

/// [`Destination`] backed by one SQLite connection
///
/// # Example
/// ```no_run
/// use analytics_etl::destination::{Destination, SqliteDestination};
///
/// # fn example() -> Result<(), analytics_etl::error::DestinationError> {
/// let mut destination = SqliteDestination::open("analytics.db")?;
/// destination.ensure_schema()?;
/// assert!(destination.is_identity_column("Customers", "CustomerID")?);
/// # Ok(())
/// # }
/// ```
pub struct SqliteDestination {
    conn: Connection,
}

impl SqliteDestination {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DestinationError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, DestinationError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an open connection and install identity guards for existing tables
    pub fn from_connection(conn: Connection) -> Result<Self, DestinationError> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TEMP TABLE IF NOT EXISTS identity_insert (
                 table_name TEXT PRIMARY KEY COLLATE NOCASE
             );",
        )?;
        let destination = Self { conn };
        destination.refresh_identity_guards()?;
        Ok(destination)
    }

    /// Create the analytics tables if they are missing
    pub fn ensure_schema(&self) -> Result<(), DestinationError> {
        self.conn.execute_batch(SCHEMA)?;
        self.refresh_identity_guards()?;
        log::debug!("Destination schema is in place");
        Ok(())
    }

    /// Install a guard trigger on every identity table that lacks one.
    ///
    /// Guards are connection-scoped, so tables created through another
    /// connection need a refresh before explicit keys are refused.
    pub fn refresh_identity_guards(&self) -> Result<(), DestinationError> {
        let tables: Vec<String> = {
            let mut stmt = self.conn.prepare(
                "SELECT name FROM main.sqlite_master
                 WHERE type = 'table' AND sql LIKE '%AUTOINCREMENT%'",
            )?;
            stmt.query_map([], |row| row.get(0))?
                .collect::<Result<_, _>>()?
        };

        for table in tables {
            let Some(column) = self.identity_column(&table)? else {
                continue;
            };
            let column = quote_identifier(&column);
            let sql = format!(
                "CREATE TEMP TRIGGER IF NOT EXISTS {trigger}
                 BEFORE INSERT ON {table_ident}
                 WHEN NEW.{column} IS NOT NULL AND NEW.{column} <> -1
                      AND NOT EXISTS (SELECT 1 FROM temp.identity_insert WHERE table_name = {literal})
                 BEGIN
                     SELECT RAISE(ABORT, {message});
                 END;",
                trigger = quote_identifier(&format!("identity_guard_{}", table)),
                table_ident = quote_identifier(&table),
                literal = quote_literal(&table),
                message = quote_literal(&format!(
                    "{} in table '{}' when IDENTITY_INSERT is OFF",
                    IDENTITY_MARKER, table
                )),
            );
            self.conn.execute_batch(&sql)?;
        }
        Ok(())
    }

    /// Identity key column of `table`, if it is an identity table
    fn identity_column(&self, table: &str) -> Result<Option<String>, DestinationError> {
        let column = self
            .conn
            .query_row(
                "SELECT p.name
                 FROM main.sqlite_master AS m, pragma_table_info(m.name) AS p
                 WHERE m.type = 'table'
                   AND m.name = ?1 COLLATE NOCASE
                   AND m.sql LIKE '%AUTOINCREMENT%'
                   AND p.pk = 1
                   AND upper(p.type) = 'INTEGER'",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(column)
    }

    /// Table currently accepting explicit identity values on this connection
    pub fn identity_insert_table(&self) -> Result<Option<String>, DestinationError> {
        let table = self
            .conn
            .query_row("SELECT table_name FROM temp.identity_insert", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(table)
    }

    pub fn row_count(&self, table: &str) -> Result<usize, DestinationError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(table));
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Destination for SqliteDestination {
    fn insert_rows(&mut self, table: &str, rows: &[Row]) -> Result<usize, DestinationError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut columns: Vec<&str> = Vec::new();
        for row in rows {
            for column in row.keys() {
                if !columns.contains(&column.as_str()) {
                    columns.push(column.as_str());
                }
            }
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_identifier(table),
            columns
                .iter()
                .map(|c| quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", "),
            (1..=columns.len())
                .map(|i| format!("?{}", i))
                .collect::<Vec<_>>()
                .join(", ")
        );

        // Dropping an uncommitted savepoint rolls it back
        let savepoint = self.conn.savepoint()?;
        {
            let mut stmt = savepoint.prepare(&sql)?;
            for row in rows {
                let values = columns
                    .iter()
                    .map(|column| row.get(*column).map(to_sql_value).unwrap_or(SqlValue::Null));
                stmt.execute(params_from_iter(values))
                    .map_err(|e| classify(table, e))?;
            }
        }
        savepoint.commit()?;

        log::debug!("Inserted {} rows into {}", rows.len(), table);
        Ok(rows.len())
    }

    fn is_identity_column(&self, table: &str, column: &str) -> Result<bool, DestinationError> {
        Ok(self
            .identity_column(table)?
            .is_some_and(|identity| identity.eq_ignore_ascii_case(column)))
    }

    fn begin(&mut self) -> Result<(), DestinationError> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DestinationError> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DestinationError> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn set_identity_insert(
        &mut self,
        table: &str,
        enabled: bool,
    ) -> Result<(), DestinationError> {
        if !enabled {
            self.conn.execute(
                "DELETE FROM temp.identity_insert WHERE table_name = ?1",
                params![table],
            )?;
            log::debug!("IDENTITY_INSERT OFF for {}", table);
            return Ok(());
        }

        if let Some(current) = self.identity_insert_table()? {
            if current.eq_ignore_ascii_case(table) {
                return Ok(());
            }
            return Err(DestinationError::Other(format!(
                "IDENTITY_INSERT is already ON for table '{}'; cannot enable it for '{}'",
                current, table
            )));
        }
        if self.identity_column(table)?.is_none() {
            return Err(DestinationError::Other(format!(
                "table '{}' does not have an identity column",
                table
            )));
        }

        self.conn.execute(
            "INSERT INTO temp.identity_insert (table_name) VALUES (?1)",
            params![table],
        )?;
        log::debug!("IDENTITY_INSERT ON for {}", table);
        Ok(())
    }
}

/// Map a driver error raised while inserting into `table`.
///
/// The guard trigger aborts with `SQLITE_CONSTRAINT_TRIGGER` and the identity
/// message. Errors carrying the message under another code (a differently
/// installed guard, SQL-Server-compatible wording) are matched on text alone.
fn classify(table: &str, err: rusqlite::Error) -> DestinationError {
    if is_identity_refusal(&err) {
        return DestinationError::IdentityConflict {
            table: table.to_string(),
            message: err.to_string(),
        };
    }
    DestinationError::Sqlite(err)
}

fn is_identity_refusal(err: &rusqlite::Error) -> bool {
    let rusqlite::Error::SqliteFailure(failure, message) = err else {
        return false;
    };
    let message = message.as_deref().unwrap_or_default().to_ascii_lowercase();

    if failure.extended_code == ffi::SQLITE_CONSTRAINT_TRIGGER {
        return message.contains(IDENTITY_MARKER);
    }
    message.contains(IDENTITY_MARKER) || message.contains("identity_insert is set to off")
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

//! Relational (SQLite) source extractor

use crate::error::{ExtractCause, ExtractionError};
use crate::etl::Extractor;
use crate::records::{Record, datetime, normalize_keys};
use chrono::NaiveDateTime;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OpenFlags, params_from_iter};
use serde_json::{Map, Number, Value};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Filter and ordering applied to a source table.
///
/// The default selects every row in natural order. Predicates are raw SQL
/// fragments with positional (`?1`, `?2`, ...) parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    predicate: Option<String>,
    params: Vec<SqlValue>,
    order_by: Option<String>,
}

impl Query {
    /// Every row, natural order
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict rows with a SQL predicate and its bound parameters
    pub fn filter(mut self, predicate: impl Into<String>, params: Vec<SqlValue>) -> Self {
        self.predicate = Some(predicate.into());
        self.params = params;
        self
    }

    /// Order rows with a SQL ordering expression (e.g. `"ReviewDate" DESC`)
    pub fn order_by(mut self, ordering: impl Into<String>) -> Self {
        self.order_by = Some(ordering.into());
        self
    }

    /// Rows whose `column` is at or after `cutoff`, newest first
    pub fn newer_than(column: &str, cutoff: NaiveDateTime) -> Self {
        let column = quote_identifier(column);
        Self::all()
            .filter(
                format!("datetime({column}) >= datetime(?1)"),
                vec![SqlValue::Text(datetime::format(&cutoff))],
            )
            .order_by(format!("{column} DESC"))
    }

    /// Render the SELECT statement for `table`
    pub fn to_sql(&self, table: &str) -> String {
        let mut sql = format!("SELECT * FROM {}", quote_identifier(table));
        if let Some(predicate) = &self.predicate {
            sql.push_str(" WHERE ");
            sql.push_str(predicate);
        }
        if let Some(order_by) = &self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order_by);
        }
        sql
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }
}

/// Extracts records from the table named by [`Record::TABLE`] in a SQLite database.
///
/// The database is opened read-only for the duration of one extraction, so
/// the extractor can never write back to the source.
///
/// # Example
/// ```no_run
/// use analytics_etl::etl::Extractor;
/// use analytics_etl::records::Review;
/// use analytics_etl::sources::{DatabaseExtractor, Query};
/// use chrono::{Local, Months};
///
/// # async fn example() -> Result<(), analytics_etl::error::ExtractionError> {
/// let cutoff = Local::now().naive_local() - Months::new(6);
/// let extractor = DatabaseExtractor::<Review>::new("source.db", "DatabaseReviews")
///     .with_query(Query::newer_than("ReviewDate", cutoff));
/// let reviews = extractor.extract().await?;
/// # Ok(())
/// # }
/// ```
pub struct DatabaseExtractor<T> {
    path: PathBuf,
    name: String,
    query: Query,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: Record> DatabaseExtractor<T> {
    pub fn new(path: impl AsRef<Path>, name: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            name: name.into(),
            query: Query::all(),
            _phantom: PhantomData,
        }
    }

    /// Replace the default (unfiltered, natural order) query
    pub fn with_query(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Run the query and map every row
    pub fn read(&self) -> Result<Vec<T>, ExtractionError> {
        read_table(&self.path, &self.query).map_err(|cause| ExtractionError::new(&self.name, cause))
    }
}

fn read_table<T: Record>(path: &Path, query: &Query) -> Result<Vec<T>, ExtractCause> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;

    let sql = query.to_sql(T::TABLE);
    log::debug!("Source query: {}", sql);

    let mut stmt = conn.prepare(&sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let rows = stmt.query_map(params_from_iter(query.params().iter()), |row| {
        let mut object = Map::with_capacity(columns.len());
        for (index, column) in columns.iter().enumerate() {
            object.insert(column.clone(), to_json(row.get_ref(index)?));
        }
        Ok(Value::Object(object))
    })?;

    let mut records = Vec::new();
    for row in rows {
        let value = normalize_keys(row?, T::FIELDS);
        records.push(serde_json::from_value(value)?);
    }
    Ok(records)
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        // No record kind carries binary columns
        ValueRef::Blob(_) => Value::Null,
    }
}

/// Quote a SQL identifier, doubling embedded quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl<T: Record> Extractor for DatabaseExtractor<T> {
    type Item = T;

    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(&self) -> Result<Vec<Self::Item>, ExtractionError> {
        let path = self.path.clone();
        let query = self.query.clone();

        tokio::task::spawn_blocking(move || read_table::<T>(&path, &query))
            .await
            .map_err(|e| ExtractCause::Task(e.to_string()))
            .and_then(|result| result)
            .map_err(|cause| ExtractionError::new(&self.name, cause))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Review;
    use chrono::{Duration, Local};
    use tempfile::TempDir;

    fn source_db(temp: &TempDir) -> PathBuf {
        let path = temp.path().join("source.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE Reviews (
                ReviewID INTEGER PRIMARY KEY,
                OrderID INTEGER, CustomerID INTEGER, ProductID INTEGER,
                Rating INTEGER, comment TEXT, ReviewDate TEXT
            );",
        )
        .unwrap();
        path
    }

    fn insert_review(path: &Path, id: i64, date: NaiveDateTime) {
        let conn = Connection::open(path).unwrap();
        conn.execute(
            "INSERT INTO Reviews VALUES (?1, 1, 1, 1, 5, 'great', ?2)",
            rusqlite::params![id, date.format("%Y-%m-%d %H:%M:%S").to_string()],
        )
        .unwrap();
    }

    #[test]
    fn test_query_sql() {
        assert_eq!(Query::all().to_sql("Reviews"), "SELECT * FROM \"Reviews\"");

        let query = Query::all()
            .filter("Rating >= ?1", vec![SqlValue::Integer(4)])
            .order_by("ReviewID");
        assert_eq!(
            query.to_sql("Reviews"),
            "SELECT * FROM \"Reviews\" WHERE Rating >= ?1 ORDER BY ReviewID"
        );
        assert_eq!(query.params(), &[SqlValue::Integer(4)]);
    }

    #[test]
    fn test_default_query_reads_all_rows() {
        let temp = TempDir::new().unwrap();
        let path = source_db(&temp);
        let now = Local::now().naive_local();
        insert_review(&path, 1, now);
        insert_review(&path, 2, now - Duration::days(400));

        let reviews = DatabaseExtractor::<Review>::new(&path, "DatabaseReviews")
            .read()
            .unwrap();

        assert_eq!(reviews.len(), 2);
        // Lower-case column name still maps onto the field
        assert_eq!(reviews[0].comment.as_deref(), Some("great"));
    }

    #[tokio::test]
    async fn test_time_window_newest_first() {
        let temp = TempDir::new().unwrap();
        let path = source_db(&temp);
        let now = Local::now().naive_local();
        insert_review(&path, 1, now - Duration::days(30));
        insert_review(&path, 2, now - Duration::days(400));
        insert_review(&path, 3, now - Duration::days(1));

        let cutoff = now - Duration::days(180);
        let reviews = DatabaseExtractor::<Review>::new(&path, "DatabaseReviews")
            .with_query(Query::newer_than("ReviewDate", cutoff))
            .extract()
            .await
            .unwrap();

        let ids: Vec<i64> = reviews.iter().map(|r| r.review_id).collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[tokio::test]
    async fn test_missing_database_is_an_extraction_error() {
        let temp = TempDir::new().unwrap();
        let extractor =
            DatabaseExtractor::<Review>::new(temp.path().join("absent.db"), "DatabaseReviews");

        let err = extractor.extract().await.unwrap_err();
        assert_eq!(err.source_name, "DatabaseReviews");
        assert!(matches!(err.cause, ExtractCause::Database(_)));
    }
}

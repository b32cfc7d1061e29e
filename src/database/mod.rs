//! Storage drivers behind each shard endpoint.
//!
//! Every shard connection (master or replica) owns one [`Database`]. The trait is
//! deliberately small: the patient layer only needs plain statements, row queries
//! and an atomic batch for its read-modify-write paths.

use std::fmt::Debug;
use std::sync::Arc;
use async_trait::async_trait;

pub mod config;
pub mod error;
pub mod postgres;
pub mod sqlite;

pub use config::DatabaseConfig;
pub use error::{Error, Result};

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    /// SQLite database
    SQLite,
    /// PostgreSQL database
    PostgreSQL,
}

impl Default for DatabaseType {
    fn default() -> Self {
        DatabaseType::SQLite
    }
}

impl DatabaseType {
    /// Case-sensitive substring test of `needle` inside `haystack`.
    ///
    /// `LIKE` is case-insensitive on SQLite, so both dialects use a positional
    /// search function instead.
    pub fn contains_expr(&self, haystack: &str, needle: &str) -> String {
        match self {
            DatabaseType::SQLite => format!("instr({}, {}) > 0", haystack, needle),
            DatabaseType::PostgreSQL => format!("strpos({}, {}) > 0", haystack, needle),
        }
    }
}

/// One statement of an atomic batch.
#[derive(Debug, Clone)]
pub struct Statement {
    /// SQL text using `$1..$n` placeholders in order of first appearance
    pub sql: String,
    /// Bound parameters
    pub params: Vec<Value>,
}

impl Statement {
    /// Creates a statement with no parameters
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Appends a bound parameter
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }
}

/// Database trait for common operations
#[async_trait]
pub trait Database: Send + Sync + Debug {
    /// Driver behind this handle
    fn db_type(&self) -> DatabaseType;

    /// Pings the database to check connectivity
    async fn ping(&self) -> Result<()>;

    /// Closes the database connection
    async fn close(&self) -> Result<()>;

    /// Executes a query that returns no rows
    async fn execute(&self, query: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64>;

    /// Executes a query that returns rows
    async fn query(&self, query: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>>;

    /// Runs all statements in one transaction, returning the total affected row count.
    ///
    /// Either every statement commits or none does.
    async fn transaction(&self, statements: Vec<Statement>) -> Result<u64>;
}

/// Row represents a database row
#[derive(Debug, Clone)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Gets a column value by name
    pub fn get<T: FromValue>(&self, column: &str) -> Result<T> {
        let idx = self.columns.iter()
            .position(|c| c == column)
            .ok_or_else(|| Error::ColumnNotFound(column.to_string()))?;
        T::from_value(&self.values[idx]).map_err(|err| match err {
            Error::TypeMismatch { expected, .. } => Error::TypeMismatch {
                column: column.to_string(),
                expected,
            },
            other => other,
        })
    }

    /// Number of columns in the row
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Value represents a database value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit integer
    Int(i64),
    /// Double precision float
    Float(f64),
    /// UTF-8 text
    Text(String),
    /// Raw bytes
    Bytes(Vec<u8>),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Trait for converting Rust types to SQL values
pub trait ToSql {
    /// Converts to a driver-independent value
    fn to_sql(&self) -> Result<Value>;
}

/// Trait for converting SQL values to Rust types
pub trait FromValue: Sized {
    /// Converts from a driver-independent value
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch(expected: &'static str) -> Error {
    Error::TypeMismatch {
        column: String::new(),
        expected,
    }
}

impl ToSql for i64 {
    fn to_sql(&self) -> Result<Value> {
        Ok(Value::Int(*self))
    }
}

impl ToSql for &str {
    fn to_sql(&self) -> Result<Value> {
        Ok(Value::Text(self.to_string()))
    }
}

impl ToSql for String {
    fn to_sql(&self) -> Result<Value> {
        Ok(Value::Text(self.clone()))
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> Result<Value> {
        Ok(self.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Int(i) => Ok(*i),
            _ => Err(mismatch("i64")),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            _ => Err(mismatch("bool")),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            _ => Err(mismatch("String")),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Opens the driver named by `config`.
pub async fn create_database(config: DatabaseConfig) -> Result<Arc<dyn Database>> {
    config.validate()?;

    match config.db_type {
        DatabaseType::SQLite => {
            let db = sqlite::SqliteDatabase::connect(config).await?;
            Ok(Arc::new(db))
        }
        DatabaseType::PostgreSQL => {
            let db = postgres::PostgresDatabase::connect(config).await?;
            Ok(Arc::new(db))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_sqlite_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let config = DatabaseConfig::new_sqlite(db_path.to_str().unwrap());
        let db = create_database(config).await.unwrap();
        assert_eq!(db.db_type(), DatabaseType::SQLite);

        db.execute(
            "CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT, note TEXT)",
            &[],
        ).await.unwrap();

        let name = "test";
        db.execute(
            "INSERT INTO test (name) VALUES ($1)",
            &[&name],
        ).await.unwrap();

        let rows = db.query(
            "SELECT name, note FROM test WHERE id = 1",
            &[],
        ).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get::<String>("name").unwrap(), "test");
        assert_eq!(rows[0].get::<Option<String>>("note").unwrap(), None);
        assert!(matches!(rows[0].get::<String>("missing"), Err(Error::ColumnNotFound(_))));
    }

    #[tokio::test]
    async fn test_transaction_is_atomic() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("tx.db");
        let db = create_database(DatabaseConfig::new_sqlite(db_path.to_str().unwrap()))
            .await
            .unwrap();

        db.execute("CREATE TABLE t (v TEXT NOT NULL UNIQUE)", &[]).await.unwrap();

        let result = db.transaction(vec![
            Statement::new("INSERT INTO t (v) VALUES ($1)").bind("a"),
            Statement::new("INSERT INTO t (v) VALUES ($1)").bind("a"),
        ]).await;
        assert!(matches!(result, Err(Error::UniqueViolation(_))));

        let rows = db.query("SELECT v FROM t", &[]).await.unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_row_type_mismatch_names_column() {
        let row = Row {
            columns: vec!["is_active".into()],
            values: vec![Value::Text("yes".into())],
        };
        match row.get::<i64>("is_active") {
            Err(Error::TypeMismatch { column, expected }) => {
                assert_eq!(column, "is_active");
                assert_eq!(expected, "i64");
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(row.get::<bool>("is_active").is_err());
    }

    #[test]
    fn test_contains_expr_per_dialect() {
        assert_eq!(
            DatabaseType::SQLite.contains_expr("p.first_name", "$1"),
            "instr(p.first_name, $1) > 0"
        );
        assert_eq!(
            DatabaseType::PostgreSQL.contains_expr("c.value", "$2"),
            "strpos(c.value, $2) > 0"
        );
    }
}

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{ffi, params_from_iter, Connection, ErrorCode};
use std::sync::Arc;

use super::{Database, DatabaseConfig, DatabaseType, Error, Result, Row, Statement, ToSql, Value};

/// SQLite database implementation.
///
/// rusqlite is synchronous, so every call runs on tokio's blocking pool. The
/// connection mutex is only taken inside that blocking closure and is never held
/// across an `.await`.
#[derive(Debug)]
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
    path: String,
}

impl rusqlite::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Bool(b) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(i64::from(*b))),
            Value::Int(i) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

fn map_sqlite_err(err: rusqlite::Error) -> Error {
    if let rusqlite::Error::SqliteFailure(failure, _) = &err {
        if failure.code == ErrorCode::ConstraintViolation {
            match failure.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE => return Error::UniqueViolation(err.to_string()),
                ffi::SQLITE_CONSTRAINT_PRIMARYKEY => return Error::DuplicateKey(err.to_string()),
                _ => {}
            }
        }
        if matches!(
            failure.code,
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen
        ) {
            return Error::Connection(err.to_string());
        }
    }
    Error::Query(err.to_string())
}

fn query_rows(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql).map_err(map_sqlite_err)?;

    let column_names: Vec<String> = stmt.column_names()
        .iter()
        .map(|&name| name.to_string())
        .collect();

    let mut rows = stmt.query(params_from_iter(params.iter())).map_err(map_sqlite_err)?;

    let mut result = Vec::new();
    while let Some(row) = rows.next().map_err(map_sqlite_err)? {
        let mut values = Vec::with_capacity(column_names.len());
        for i in 0..column_names.len() {
            let value = match row.get_ref(i).map_err(map_sqlite_err)? {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(i) => Value::Int(i),
                ValueRef::Real(f) => Value::Float(f),
                ValueRef::Text(s) => Value::Text(String::from_utf8_lossy(s).into_owned()),
                ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
            };
            values.push(value);
        }
        result.push(Row {
            columns: column_names.clone(),
            values,
        });
    }
    Ok(result)
}

fn collect_params(params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Value>> {
    params.iter().map(|p| p.to_sql()).collect()
}

impl SqliteDatabase {
    /// Opens (or creates) the database file named in `config`.
    pub async fn connect(config: DatabaseConfig) -> Result<Self> {
        let path = config.sqlite_path
            .clone()
            .ok_or_else(|| Error::Config("SQLite path not provided".into()))?;
        let busy_timeout = config.busy_timeout;

        let open_path = path.clone();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&open_path)
                .map_err(|e| Error::Connection(e.to_string()))?;
            conn.busy_timeout(busy_timeout)
                .map_err(|e| Error::Connection(e.to_string()))?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")
                .map_err(|e| Error::Connection(e.to_string()))?;
            Ok(conn)
        })
        .await
        .map_err(|e| Error::Connection(format!("sqlite open task failed: {}", e)))??;

        tracing::debug!(path = %path, "opened sqlite database");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Path this handle was opened with
    pub fn path(&self) -> &str {
        &self.path
    }

    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::Connection(format!("sqlite worker failed: {}", e)))?
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    fn db_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    async fn ping(&self) -> Result<()> {
        self.run(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(|e| Error::Connection(e.to_string()))
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        // SQLite connections are automatically closed when dropped
        Ok(())
    }

    async fn execute(&self, query: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64> {
        let params = collect_params(params)?;
        let sql = query.to_string();
        self.run(move |conn| {
            conn.execute(&sql, params_from_iter(params.iter()))
                .map(|rows| rows as u64)
                .map_err(map_sqlite_err)
        })
        .await
    }

    async fn query(&self, query: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>> {
        let params = collect_params(params)?;
        let sql = query.to_string();
        self.run(move |conn| query_rows(conn, &sql, &params)).await
    }

    async fn transaction(&self, statements: Vec<Statement>) -> Result<u64> {
        self.run(move |conn| {
            let tx = conn.transaction()
                .map_err(|e| Error::Transaction(e.to_string()))?;

            let mut affected = 0u64;
            for stmt in &statements {
                affected += tx.execute(&stmt.sql, params_from_iter(stmt.params.iter()))
                    .map_err(map_sqlite_err)? as u64;
            }

            // Dropping an uncommitted transaction rolls it back.
            tx.commit().map_err(|e| Error::Transaction(e.to_string()))?;
            Ok(affected)
        })
        .await
    }
}

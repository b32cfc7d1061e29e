use async_trait::async_trait;
use bb8_postgres::bb8::{Pool, RunError};
use bb8_postgres::PostgresConnectionManager;
use std::str::FromStr;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{ToSql as PgToSql, Type};
use tokio_postgres::{Config, NoTls};

use super::{Database, DatabaseConfig, DatabaseType, Error, Result, Row, Statement, ToSql, Value};

/// PostgreSQL database implementation
#[derive(Debug)]
pub struct PostgresDatabase {
    pool: Pool<PostgresConnectionManager<NoTls>>,
}

type PgParam = Box<dyn PgToSql + Send + Sync>;

fn to_pg_params(values: &[Value]) -> Vec<PgParam> {
    values.iter()
        .map(|v| -> PgParam {
            match v {
                Value::Null => Box::new(None::<String>),
                Value::Bool(b) => Box::new(*b),
                Value::Int(i) => Box::new(*i),
                Value::Float(f) => Box::new(*f),
                Value::Text(s) => Box::new(s.clone()),
                Value::Bytes(b) => Box::new(b.clone()),
            }
        })
        .collect()
}

fn as_refs(params: &[PgParam]) -> Vec<&(dyn PgToSql + Sync)> {
    params.iter()
        .map(|p| &**p as &(dyn PgToSql + Sync))
        .collect()
}

// PostgreSQL names primary-key constraints `<table>_pkey` unless told otherwise.
fn classify_unique_violation(constraint: Option<&str>, msg: String) -> Error {
    match constraint {
        Some(name) if name.ends_with("_pkey") => Error::DuplicateKey(msg),
        _ => Error::UniqueViolation(msg),
    }
}

fn map_pg_err(err: tokio_postgres::Error) -> Error {
    if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        let constraint = err.as_db_error().and_then(|db| db.constraint());
        return classify_unique_violation(constraint, err.to_string());
    }
    if err.is_closed() {
        return Error::Connection(err.to_string());
    }
    Error::Query(err.to_string())
}

fn map_pool_err(err: RunError<tokio_postgres::Error>) -> Error {
    match err {
        RunError::User(e) => Error::Connection(e.to_string()),
        RunError::TimedOut => Error::Connection("timed out waiting for a pooled connection".into()),
    }
}

fn decode_column(row: &tokio_postgres::Row, i: usize) -> std::result::Result<Value, tokio_postgres::Error> {
    let ty = row.columns()[i].type_().clone();
    let value = if ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(i)?.map(|v| Value::Int(i64::from(v)))
    } else if ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(i)?.map(|v| Value::Int(i64::from(v)))
    } else if ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(i)?.map(Value::Int)
    } else if ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(i)?.map(|v| Value::Float(f64::from(v)))
    } else if ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(i)?.map(Value::Float)
    } else if ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(i)?.map(Value::Bool)
    } else if ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(i)?.map(Value::Bytes)
    } else {
        row.try_get::<_, Option<String>>(i)?.map(Value::Text)
    };
    Ok(value.unwrap_or(Value::Null))
}

fn convert_rows(rows: Vec<tokio_postgres::Row>) -> Result<Vec<Row>> {
    let mut result = Vec::with_capacity(rows.len());
    for row in rows {
        let columns: Vec<String> = row.columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect();

        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(decode_column(&row, i).map_err(map_pg_err)?);
        }

        result.push(Row { columns, values });
    }
    Ok(result)
}

impl PostgresDatabase {
    /// Builds a connection pool for the URL in `config` and checks it once.
    pub async fn connect(config: DatabaseConfig) -> Result<Self> {
        let url = config.postgres_url
            .as_deref()
            .ok_or_else(|| Error::Config("PostgreSQL URL not provided".into()))?;

        let mut pg_config = Config::from_str(url)
            .map_err(|e| Error::Config(format!("invalid PostgreSQL URL: {}", e)))?;
        pg_config.connect_timeout(config.connect_timeout);

        let manager = PostgresConnectionManager::new(pg_config, NoTls);
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .connection_timeout(config.connect_timeout)
            .build(manager)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    fn db_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    async fn ping(&self) -> Result<()> {
        let client = self.pool.get().await.map_err(map_pool_err)?;

        client.simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(|e| Error::Connection(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        // bb8 closes idle connections when the pool is dropped
        Ok(())
    }

    async fn execute(&self, query: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64> {
        let values: Vec<Value> = params.iter()
            .map(|p| p.to_sql())
            .collect::<Result<_>>()?;
        let params = to_pg_params(&values);

        let client = self.pool.get().await.map_err(map_pool_err)?;
        client.execute(query, &as_refs(&params))
            .await
            .map_err(map_pg_err)
    }

    async fn query(&self, query: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>> {
        let values: Vec<Value> = params.iter()
            .map(|p| p.to_sql())
            .collect::<Result<_>>()?;
        let params = to_pg_params(&values);

        let client = self.pool.get().await.map_err(map_pool_err)?;
        let rows = client.query(query, &as_refs(&params))
            .await
            .map_err(map_pg_err)?;

        convert_rows(rows)
    }

    async fn transaction(&self, statements: Vec<Statement>) -> Result<u64> {
        let mut client = self.pool.get().await.map_err(map_pool_err)?;
        let tx = client.transaction()
            .await
            .map_err(|e| Error::Transaction(e.to_string()))?;

        let mut affected = 0u64;
        for stmt in &statements {
            let params = to_pg_params(&stmt.params);
            affected += tx.execute(stmt.sql.as_str(), &as_refs(&params))
                .await
                .map_err(map_pg_err)?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Transaction(e.to_string()))?;
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_conversion_keeps_order() {
        let values = vec![
            Value::Text("Ada".into()),
            Value::Int(1),
            Value::Null,
        ];
        let params = to_pg_params(&values);
        assert_eq!(params.len(), 3);
        assert_eq!(as_refs(&params).len(), 3);
    }

    #[test]
    fn test_unique_violation_by_constraint() {
        let err = classify_unique_violation(Some("patients_pkey"), "dup".into());
        assert!(matches!(err, Error::DuplicateKey(_)), "got {:?}", err);

        let err = classify_unique_violation(Some("ix_contact_infos_value"), "dup".into());
        assert!(matches!(err, Error::UniqueViolation(_)), "got {:?}", err);

        let err = classify_unique_violation(None, "dup".into());
        assert!(matches!(err, Error::UniqueViolation(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_url() {
        let config = DatabaseConfig::new_postgres("postgres://host:notaport/db");
        let err = PostgresDatabase::connect(config).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got {:?}", err);
    }

    /// Needs a reachable server: `PATIENT_SHARDS_TEST_POSTGRES_URL=postgres://... cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn test_round_trip_against_server() {
        let url = match std::env::var("PATIENT_SHARDS_TEST_POSTGRES_URL") {
            Ok(url) => url,
            Err(_) => return,
        };
        let db = PostgresDatabase::connect(DatabaseConfig::new_postgres(url)).await.unwrap();
        db.ping().await.unwrap();

        db.execute("DROP TABLE IF EXISTS patient_shards_round_trip", &[]).await.unwrap();
        db.execute(
            "CREATE TABLE patient_shards_round_trip (id TEXT PRIMARY KEY, name TEXT NOT NULL, visits BIGINT)",
            &[],
        )
        .await
        .unwrap();

        db.transaction(vec![
            Statement::new("INSERT INTO patient_shards_round_trip (id, name, visits) VALUES ($1, $2, $3)")
                .bind("1")
                .bind("Ada")
                .bind(3i64),
            Statement::new("INSERT INTO patient_shards_round_trip (id, name, visits) VALUES ($1, $2, $3)")
                .bind("2")
                .bind("Alan")
                .bind(Value::Null),
        ])
        .await
        .unwrap();

        let needle = "A";
        let rows = db
            .query(
                "SELECT id, name, visits FROM patient_shards_round_trip WHERE strpos(name, $1) > 0 ORDER BY id",
                &[&needle],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get::<String>("name").unwrap(), "Ada");
        assert_eq!(rows[0].get::<i64>("visits").unwrap(), 3);
        assert_eq!(rows[1].get::<Option<i64>>("visits").unwrap(), None);

        let err = db
            .execute("INSERT INTO patient_shards_round_trip (id, name) VALUES ($1, $2)", &[&"1", &"Grace"])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(_)), "got {:?}", err);

        db.execute("DROP TABLE patient_shards_round_trip", &[]).await.unwrap();
        db.close().await.unwrap();
    }
}

use std::time::Duration;
use super::DatabaseType;

const SQLITE_SCHEME: &str = "sqlite://";
const SQLITE_MEMORY: &str = "sqlite::memory:";
const POSTGRES_SCHEMES: [&str; 2] = ["postgres://", "postgresql://"];

/// Database configuration for a single shard endpoint
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database type (SQLite or PostgreSQL)
    pub db_type: DatabaseType,

    /// SQLite file path, or `:memory:` (SQLite only)
    pub sqlite_path: Option<String>,

    /// Connection URL (PostgreSQL only)
    pub postgres_url: Option<String>,

    /// Maximum number of pooled connections (PostgreSQL only)
    pub max_connections: u32,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// How long SQLite waits on a locked database file before failing
    pub busy_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: DatabaseType::default(),
            sqlite_path: Some(String::from("patients.db")),
            postgres_url: None,
            max_connections: 10,
            connect_timeout: Duration::from_secs(10),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl DatabaseConfig {
    /// Creates a new SQLite configuration
    pub fn new_sqlite(path: impl Into<String>) -> Self {
        Self {
            db_type: DatabaseType::SQLite,
            sqlite_path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Creates a new PostgreSQL configuration
    pub fn new_postgres(url: impl Into<String>) -> Self {
        Self {
            db_type: DatabaseType::PostgreSQL,
            sqlite_path: None,
            postgres_url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Parses a shard endpoint.
    ///
    /// Accepted forms are `sqlite://<path>`, `sqlite::memory:` and
    /// `postgres://...` / `postgresql://...`.
    pub fn from_endpoint(endpoint: &str) -> super::Result<Self> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(super::Error::Config("endpoint is empty".into()));
        }

        if endpoint == SQLITE_MEMORY {
            return Ok(Self::new_sqlite(":memory:"));
        }

        if let Some(path) = endpoint.strip_prefix(SQLITE_SCHEME) {
            if path.is_empty() {
                return Err(super::Error::Config("sqlite endpoint has no path".into()));
            }
            return Ok(Self::new_sqlite(path));
        }

        if POSTGRES_SCHEMES.iter().any(|scheme| endpoint.starts_with(scheme)) {
            return Ok(Self::new_postgres(endpoint));
        }

        Err(super::Error::Config(format!(
            "unsupported endpoint scheme: {}",
            redact(endpoint)
        )))
    }

    /// Validates the configuration
    pub fn validate(&self) -> super::Result<()> {
        match self.db_type {
            DatabaseType::SQLite => {
                if self.sqlite_path.as_deref().map_or(true, str::is_empty) {
                    return Err(super::Error::Config("SQLite path is required".into()));
                }
            }
            DatabaseType::PostgreSQL => {
                if self.postgres_url.as_deref().map_or(true, str::is_empty) {
                    return Err(super::Error::Config("PostgreSQL URL is required".into()));
                }
                if self.max_connections == 0 {
                    return Err(super::Error::Config("max_connections must be at least 1".into()));
                }
            }
        }
        Ok(())
    }
}

// Endpoints may carry credentials; keep only the scheme in messages.
fn redact(endpoint: &str) -> String {
    match endpoint.split_once("://") {
        Some((scheme, _)) => format!("{}://…", scheme),
        None => String::from("<opaque>"),
    }
}

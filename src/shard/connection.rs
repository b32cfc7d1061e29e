use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::database::{self, Database, DatabaseType, Row, Statement, ToSql};
use crate::error::{Error, Result};
use super::ShardIndex;

/// Which of a shard's two handles a connection is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionRole {
    /// Authoritative handle; the only writer for the shard's patients
    Master,
    /// Secondary handle used for reads; may lag the master
    Replica,
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionRole::Master => write!(f, "master"),
            ConnectionRole::Replica => write!(f, "replica"),
        }
    }
}

/// A database handle pinned to one shard and one role.
///
/// Every call is bounded by the request timeout and driver errors come back
/// attributed to the shard.
#[derive(Debug, Clone)]
pub struct ShardConnection {
    shard: ShardIndex,
    role: ConnectionRole,
    db: Arc<dyn Database>,
    timeout: Duration,
}

impl ShardConnection {
    /// Wraps `db` as the `role` handle of `shard`
    pub fn new(shard: ShardIndex, role: ConnectionRole, db: Arc<dyn Database>, timeout: Duration) -> Self {
        Self {
            shard,
            role,
            db,
            timeout,
        }
    }

    /// Shard this handle belongs to
    pub fn shard(&self) -> ShardIndex {
        self.shard
    }

    /// Role of this handle
    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    /// SQL dialect behind this handle
    pub fn db_type(&self) -> DatabaseType {
        self.db.db_type()
    }

    /// Per-call timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Executes a statement that returns no rows
    pub async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64> {
        self.bounded(self.db.execute(sql, params)).await
    }

    /// Executes a query that returns rows
    pub async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>> {
        self.bounded(self.db.query(sql, params)).await
    }

    /// Runs `statements` atomically
    pub async fn transaction(&self, statements: Vec<Statement>) -> Result<u64> {
        self.bounded(self.db.transaction(statements)).await
    }

    /// Checks the handle answers
    pub async fn ping(&self) -> Result<()> {
        self.bounded(self.db.ping()).await
    }

    /// Releases driver resources
    pub async fn close(&self) -> Result<()> {
        self.bounded(self.db.close()).await
    }

    /// Attributes a driver error to this shard.
    pub(crate) fn attribute(&self, err: database::Error) -> Error {
        if err.is_unavailable() {
            tracing::warn!(
                shard = %self.shard,
                role = %self.role,
                error = %err,
                "shard connection unavailable"
            );
        } else if matches!(err, database::Error::DuplicateKey(_)) {
            tracing::warn!(
                shard = %self.shard,
                role = %self.role,
                error = %err,
                "duplicate primary key; identifier already in use on this shard"
            );
        }
        Error::from_shard(self.shard, err)
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = database::Result<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(|err| self.attribute(err)),
            Err(_) => Err(self.attribute(database::Error::Timeout(self.timeout))),
        }
    }
}

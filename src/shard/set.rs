use std::sync::Arc;
use std::time::Duration;
use futures::future::join_all;
use serde::Serialize;
use tracing::info;

use crate::config::StoreConfig;
use crate::database::{create_database, Database, DatabaseConfig};
use crate::error::{Error, Result};
use super::{ConnectionRole, ShardConnection, ShardIndex};

/// Master and replica of one shard
#[derive(Debug, Clone)]
pub struct ShardHandles {
    /// Write handle
    pub master: ShardConnection,
    /// Read handle
    pub replica: ShardConnection,
}

impl ShardHandles {
    /// Pairs two databases as the handles of `shard`
    pub fn new(
        shard: ShardIndex,
        master: Arc<dyn Database>,
        replica: Arc<dyn Database>,
        timeout: Duration,
    ) -> Self {
        Self {
            master: ShardConnection::new(shard, ConnectionRole::Master, master, timeout),
            replica: ShardConnection::new(shard, ConnectionRole::Replica, replica, timeout),
        }
    }
}

/// Result of pinging one handle
#[derive(Debug, Clone, Serialize)]
pub struct ShardHealth {
    /// Shard pinged
    pub shard: ShardIndex,
    /// Handle pinged
    pub role: ConnectionRole,
    /// Failure description, if the ping failed
    pub error: Option<String>,
}

impl ShardHealth {
    /// Whether the handle answered
    pub fn is_healthy(&self) -> bool {
        self.error.is_none()
    }
}

/// Every shard's handles, indexed by shard.
///
/// Built once at startup and never resized.
#[derive(Debug, Clone)]
pub struct ShardConnectionSet {
    shards: Vec<ShardHandles>,
}

impl ShardConnectionSet {
    /// Opens both endpoints of every configured shard.
    ///
    /// Fails on the first endpoint that cannot be parsed or opened.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        config.validate()?;

        let mut shards = Vec::with_capacity(config.shards.len());
        for (i, endpoints) in config.shards.iter().enumerate() {
            let shard = ShardIndex(i);
            let master = open(shard, ConnectionRole::Master, &endpoints.master, config).await?;
            let replica = open(shard, ConnectionRole::Replica, &endpoints.replica, config).await?;
            shards.push(ShardHandles::new(shard, master, replica, config.request_timeout));
        }

        info!(shards = shards.len(), "shard connections ready");
        Ok(Self { shards })
    }

    /// Wraps handles that were opened elsewhere.
    ///
    /// Position `i` must hold the handles of shard `i`.
    pub fn from_handles(shards: Vec<ShardHandles>) -> Result<Self> {
        if shards.is_empty() {
            return Err(Error::config("at least one shard is required"));
        }
        for (i, handles) in shards.iter().enumerate() {
            if handles.master.shard() != ShardIndex(i) || handles.replica.shard() != ShardIndex(i) {
                return Err(Error::config(format!("handles at position {} belong to another shard", i)));
            }
        }
        Ok(Self { shards })
    }

    /// Number of shards
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Always false; a set holds at least one shard
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Write handle of `shard`
    pub fn master(&self, shard: ShardIndex) -> Result<&ShardConnection> {
        self.handles(shard).map(|h| &h.master)
    }

    /// Read handle of `shard`
    pub fn replica(&self, shard: ShardIndex) -> Result<&ShardConnection> {
        self.handles(shard).map(|h| &h.replica)
    }

    /// Every master, in shard order
    pub fn masters(&self) -> Vec<ShardConnection> {
        self.shards.iter().map(|h| h.master.clone()).collect()
    }

    /// Every replica, in shard order
    pub fn replicas(&self) -> Vec<ShardConnection> {
        self.shards.iter().map(|h| h.replica.clone()).collect()
    }

    /// Pings every handle concurrently.
    pub async fn health(&self) -> Vec<ShardHealth> {
        let pings = self
            .shards
            .iter()
            .flat_map(|h| [&h.master, &h.replica])
            .map(|conn| async move {
                ShardHealth {
                    shard: conn.shard(),
                    role: conn.role(),
                    error: conn.ping().await.err().map(|e| e.to_string()),
                }
            });
        join_all(pings).await
    }

    /// Closes every handle.
    pub async fn close(&self) -> Result<()> {
        for handles in &self.shards {
            handles.master.close().await?;
            handles.replica.close().await?;
        }
        Ok(())
    }

    fn handles(&self, shard: ShardIndex) -> Result<&ShardHandles> {
        self.shards
            .get(shard.0)
            .ok_or_else(|| Error::internal(format!("shard {} out of range 0..{}", shard, self.shards.len())))
    }
}

async fn open(
    shard: ShardIndex,
    role: ConnectionRole,
    endpoint: &str,
    config: &StoreConfig,
) -> Result<Arc<dyn Database>> {
    let mut db_config = DatabaseConfig::from_endpoint(endpoint)
        .map_err(|e| Error::config(format!("shard {} {}: {}", shard, role, e)))?;
    db_config.max_connections = config.max_connections;
    db_config.connect_timeout = config.request_timeout;

    create_database(db_config).await.map_err(|e| match e {
        crate::database::Error::Config(msg) => Error::config(format!("shard {} {}: {}", shard, role, msg)),
        other => Error::from_shard(shard, other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use async_trait::async_trait;
    use crate::config::ShardEndpoints;
    use crate::database::{self, DatabaseType, Row, Statement, ToSql};
    use tempfile::tempdir;

    /// Counts close calls; optionally refuses to close.
    #[derive(Debug)]
    struct Closing {
        closed: Arc<AtomicUsize>,
        refuse: bool,
    }

    #[async_trait]
    impl Database for Closing {
        fn db_type(&self) -> DatabaseType {
            DatabaseType::SQLite
        }
        async fn ping(&self) -> database::Result<()> {
            Ok(())
        }
        async fn close(&self) -> database::Result<()> {
            if self.refuse {
                return Err(database::Error::Connection("socket already gone".into()));
            }
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn execute(&self, _: &str, _: &[&(dyn ToSql + Sync)]) -> database::Result<u64> {
            Ok(0)
        }
        async fn query(&self, _: &str, _: &[&(dyn ToSql + Sync)]) -> database::Result<Vec<Row>> {
            Ok(Vec::new())
        }
        async fn transaction(&self, _: Vec<Statement>) -> database::Result<u64> {
            Ok(0)
        }
    }

    fn closing(closed: &Arc<AtomicUsize>, refuse: bool) -> Arc<dyn Database> {
        Arc::new(Closing {
            closed: closed.clone(),
            refuse,
        })
    }

    fn sqlite_config(dir: &std::path::Path, shards: usize) -> StoreConfig {
        let endpoints = (0..shards)
            .map(|i| {
                let path = dir.join(format!("shard{}.db", i));
                let url = format!("sqlite://{}", path.display());
                ShardEndpoints::new(url.clone(), url)
            })
            .collect();
        StoreConfig::with_shards(endpoints)
    }

    #[tokio::test]
    async fn test_connect_and_select_by_index() {
        let dir = tempdir().unwrap();
        let set = ShardConnectionSet::connect(&sqlite_config(dir.path(), 3)).await.unwrap();

        assert_eq!(set.len(), 3);
        let master = set.master(ShardIndex(2)).unwrap();
        assert_eq!(master.shard(), ShardIndex(2));
        assert_eq!(master.role(), ConnectionRole::Master);
        assert_eq!(set.replica(ShardIndex(0)).unwrap().role(), ConnectionRole::Replica);
        assert!(matches!(set.master(ShardIndex(3)), Err(Error::Internal(_))));

        let shards: Vec<_> = set.replicas().iter().map(|c| c.shard()).collect();
        assert_eq!(shards, vec![ShardIndex(0), ShardIndex(1), ShardIndex(2)]);
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_endpoint() {
        let dir = tempdir().unwrap();
        let mut config = sqlite_config(dir.path(), 2);
        config.shards[1].replica = "mysql://db/patients".into();

        let err = ShardConnectionSet::connect(&config).await.unwrap_err();
        match err {
            Error::Config(msg) => assert!(msg.contains("shard 1 replica"), "{}", msg),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_health_pings_every_handle() {
        let dir = tempdir().unwrap();
        let set = ShardConnectionSet::connect(&sqlite_config(dir.path(), 2)).await.unwrap();

        let health = set.health().await;
        assert_eq!(health.len(), 4);
        assert!(health.iter().all(ShardHealth::is_healthy));
        assert_eq!(health[1].role, ConnectionRole::Replica);
        assert_eq!(health[2].shard, ShardIndex(1));
    }

    #[test]
    fn test_from_handles_checks_positions() {
        assert!(ShardConnectionSet::from_handles(Vec::new()).is_err());
    }

    #[tokio::test]
    async fn test_close_releases_every_handle() {
        let closed = Arc::new(AtomicUsize::new(0));
        let timeout = Duration::from_secs(1);
        let set = ShardConnectionSet::from_handles(vec![
            ShardHandles::new(ShardIndex(0), closing(&closed, false), closing(&closed, false), timeout),
            ShardHandles::new(ShardIndex(1), closing(&closed, false), closing(&closed, false), timeout),
        ])
        .unwrap();

        set.close().await.unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_close_reports_the_failing_shard() {
        let closed = Arc::new(AtomicUsize::new(0));
        let timeout = Duration::from_secs(1);
        let set = ShardConnectionSet::from_handles(vec![
            ShardHandles::new(ShardIndex(0), closing(&closed, false), closing(&closed, false), timeout),
            ShardHandles::new(ShardIndex(1), closing(&closed, false), closing(&closed, true), timeout),
        ])
        .unwrap();

        let err = set.close().await.unwrap_err();
        assert!(matches!(err, Error::ShardUnavailable { shard: ShardIndex(1), .. }), "got {:?}", err);
        assert_eq!(closed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_close_sqlite_set() {
        let dir = tempdir().unwrap();
        let set = ShardConnectionSet::connect(&sqlite_config(dir.path(), 2)).await.unwrap();
        set.close().await.unwrap();
        assert!(dir.path().join("shard0.db").exists());
        assert!(dir.path().join("shard1.db").exists());
    }
}

//! Store configuration, resolved once at startup.
//!
//! Shard endpoints come from the environment using the deployment's variable
//! names: `SHARD_COUNT` (default 2) and, for each shard `n` counted from 1,
//! `SHARD{n}_MASTER_CONNECTION` and `SHARD{n}_REPLICA_CONNECTION`. A missing
//! endpoint is a startup failure.

use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identity::IdStrategy;
use crate::shard::{FanOutPolicy, HashScheme};

/// Number of shards
pub const ENV_SHARD_COUNT: &str = "SHARD_COUNT";
/// Per-call timeout in milliseconds
pub const ENV_TIMEOUT_MS: &str = "PATIENT_STORE_TIMEOUT_MS";
/// `fail-fast` or `best-effort`
pub const ENV_FAN_OUT: &str = "PATIENT_STORE_FAN_OUT";
/// `sequential` or `random`
pub const ENV_ID_STRATEGY: &str = "PATIENT_ID_STRATEGY";
/// First value handed out by the sequential strategy
pub const ENV_SEQUENCE_START: &str = "PATIENT_ID_SEQUENCE_START";

const DEFAULT_SHARD_COUNT: usize = 2;

/// Name of the variable holding the master endpoint of shard `n` (1-based)
pub fn master_var(n: usize) -> String {
    format!("SHARD{}_MASTER_CONNECTION", n)
}

/// Name of the variable holding the replica endpoint of shard `n` (1-based)
pub fn replica_var(n: usize) -> String {
    format!("SHARD{}_REPLICA_CONNECTION", n)
}

/// The two endpoints of one shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardEndpoints {
    /// Endpoint receiving writes
    pub master: String,
    /// Endpoint serving reads
    pub replica: String,
}

impl ShardEndpoints {
    /// Endpoints for one shard
    pub fn new(master: impl Into<String>, replica: impl Into<String>) -> Self {
        Self {
            master: master.into(),
            replica: replica.into(),
        }
    }
}

/// Configuration of a [`PatientStore`](crate::patient::PatientStore)
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Endpoints per shard; the position is the shard index
    pub shards: Vec<ShardEndpoints>,
    /// Upper bound on any single call to a shard
    pub request_timeout: Duration,
    /// Composition of list and search fan-outs
    pub fan_out_policy: FanOutPolicy,
    /// Identifier allocation strategy
    pub id_strategy: IdStrategy,
    /// First sequential identifier
    pub sequential_start: u64,
    /// Pool size per endpoint (PostgreSQL only)
    pub max_connections: u32,
    /// Placement hash
    pub hash_scheme: HashScheme,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            shards: Vec::new(),
            request_timeout: Duration::from_secs(5),
            fan_out_policy: FanOutPolicy::default(),
            id_strategy: IdStrategy::default(),
            sequential_start: 1,
            max_connections: 10,
            hash_scheme: HashScheme::default(),
        }
    }
}

impl StoreConfig {
    /// Configuration with the given shards and defaults elsewhere
    pub fn with_shards(shards: Vec<ShardEndpoints>) -> Self {
        Self {
            shards,
            ..Default::default()
        }
    }

    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value of a
    /// variable if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let shard_count = match get(ENV_SHARD_COUNT) {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| Error::config(format!("{} is not a number: {}", ENV_SHARD_COUNT, raw)))?,
            None => DEFAULT_SHARD_COUNT,
        };

        let mut shards = Vec::with_capacity(shard_count);
        for n in 1..=shard_count {
            let master = get(master_var(n).as_str())
                .ok_or_else(|| Error::config(format!("{} is not set", master_var(n))))?;
            let replica = get(replica_var(n).as_str())
                .ok_or_else(|| Error::config(format!("{} is not set", replica_var(n))))?;
            shards.push(ShardEndpoints { master, replica });
        }

        let mut config = Self::with_shards(shards);

        if let Some(raw) = get(ENV_TIMEOUT_MS) {
            let ms = raw
                .parse::<u64>()
                .map_err(|_| Error::config(format!("{} is not a number: {}", ENV_TIMEOUT_MS, raw)))?;
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(raw) = get(ENV_FAN_OUT) {
            config.fan_out_policy = raw.parse()?;
        }
        if let Some(raw) = get(ENV_ID_STRATEGY) {
            config.id_strategy = raw.parse()?;
        }
        if let Some(raw) = get(ENV_SEQUENCE_START) {
            config.sequential_start = raw
                .parse::<u64>()
                .map_err(|_| Error::config(format!("{} is not a number: {}", ENV_SEQUENCE_START, raw)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.shards.is_empty() {
            return Err(Error::config("at least one shard is required"));
        }

        for (i, shard) in self.shards.iter().enumerate() {
            if shard.master.trim().is_empty() {
                return Err(Error::config(format!("shard {} has no master endpoint", i)));
            }
            if shard.replica.trim().is_empty() {
                return Err(Error::config(format!("shard {} has no replica endpoint", i)));
            }
        }

        if self.request_timeout.is_zero() {
            return Err(Error::config("request timeout must be greater than 0"));
        }

        if self.max_connections == 0 {
            return Err(Error::config("max_connections must be greater than 0"));
        }

        Ok(())
    }
}

//! Shard placement, per-shard connections and concurrent fan-out.
//!
//! A shard is a partition `0..N-1` with its own storage. The router decides
//! placement, the connection set hands out the master or replica of one shard,
//! and the fan-out executor runs one read per shard and merges the results in
//! shard-index order.

use std::fmt;
use serde::{Deserialize, Serialize};

mod connection;
mod fanout;
mod router;
mod set;

pub use connection::{ConnectionRole, ShardConnection};
pub use fanout::{BranchOutcome, FanOutExecutor, FanOutPolicy, Merged, ShardOutcome};
pub use router::{HashScheme, ShardRouter};
pub use set::{ShardConnectionSet, ShardHandles, ShardHealth};

/// Zero-based index of a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardIndex(pub usize);

impl fmt::Display for ShardIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

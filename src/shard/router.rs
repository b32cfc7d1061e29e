use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identity::PatientId;
use super::ShardIndex;

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Hash used to derive shard placement from an identifier.
///
/// Each variant is frozen once released. Changing placement means adding a new
/// variant, never editing an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashScheme {
    /// FNV-1a, 64-bit, over [`PatientId::canonical_bytes`]
    #[serde(rename = "fnv1a64-v1")]
    Fnv1a64V1,
}

impl Default for HashScheme {
    fn default() -> Self {
        HashScheme::Fnv1a64V1
    }
}

impl HashScheme {
    /// Hashes `bytes` under this scheme
    pub fn hash(&self, bytes: &[u8]) -> u64 {
        match self {
            HashScheme::Fnv1a64V1 => {
                let mut hash = FNV_OFFSET_BASIS;
                for &byte in bytes {
                    hash ^= u64::from(byte);
                    hash = hash.wrapping_mul(FNV_PRIME);
                }
                hash
            }
        }
    }
}

/// Maps patient identifiers to the shard that owns them.
///
/// Holds no mutable state; the same identifier always lands on the same shard
/// for a given shard count and scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRouter {
    shard_count: usize,
    scheme: HashScheme,
}

impl ShardRouter {
    /// Router over `shard_count` shards using the default scheme
    pub fn new(shard_count: usize) -> Result<Self> {
        Self::with_scheme(shard_count, HashScheme::default())
    }

    /// Router over `shard_count` shards using an explicit scheme
    pub fn with_scheme(shard_count: usize, scheme: HashScheme) -> Result<Self> {
        if shard_count == 0 {
            return Err(Error::config("shard count must be at least 1"));
        }
        Ok(Self { shard_count, scheme })
    }

    /// Shard that owns `id`
    pub fn route(&self, id: &PatientId) -> ShardIndex {
        let hash = self.scheme.hash(&id.canonical_bytes());
        ShardIndex((hash % self.shard_count as u64) as usize)
    }

    /// Number of shards routed over
    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Hash scheme in use
    pub fn scheme(&self) -> HashScheme {
        self.scheme
    }
}

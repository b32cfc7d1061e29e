//! Patient identifiers and the strategies that allocate them.
//!
//! An identifier is the only input to shard placement, so its canonical byte
//! form is part of the on-disk contract: changing [`PatientId::canonical_bytes`]
//! would silently move every patient to a different shard.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Identifier of a patient, unique across every shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum PatientId {
    /// Allocated from a process-wide counter
    Sequential(u64),
    /// 128-bit random identifier in UUID v4 layout
    Random(Uuid),
}

impl PatientId {
    /// Bytes fed to the shard hash.
    ///
    /// Sequential ids are 8 big-endian bytes, random ids their 16 UUID bytes.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            PatientId::Sequential(n) => n.to_be_bytes().to_vec(),
            PatientId::Random(uuid) => uuid.as_bytes().to_vec(),
        }
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatientId::Sequential(n) => write!(f, "{}", n),
            PatientId::Random(uuid) => write!(f, "{}", uuid.hyphenated()),
        }
    }
}

impl FromStr for PatientId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            return s.parse::<u64>()
                .map(PatientId::Sequential)
                .map_err(|_| Error::InvalidIdentifier(s.to_string()));
        }

        Uuid::parse_str(s)
            .map(PatientId::Random)
            .map_err(|_| Error::InvalidIdentifier(s.to_string()))
    }
}

impl From<PatientId> for String {
    fn from(id: PatientId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for PatientId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Uuid> for PatientId {
    fn from(uuid: Uuid) -> Self {
        PatientId::Random(uuid)
    }
}

/// Which allocation strategy a store uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    /// Process-wide atomic counter
    Sequential,
    /// Random 128-bit identifiers
    Random,
}

impl Default for IdStrategy {
    fn default() -> Self {
        IdStrategy::Random
    }
}

impl FromStr for IdStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(IdStrategy::Sequential),
            "random" => Ok(IdStrategy::Random),
            other => Err(Error::config(format!("unknown id strategy: {}", other))),
        }
    }
}

impl IdStrategy {
    /// Builds the generator for this strategy.
    ///
    /// `sequential_start` is only used by the sequential strategy.
    pub fn build(self, sequential_start: u64) -> Arc<dyn IdGenerator> {
        match self {
            IdStrategy::Sequential => Arc::new(SequentialIdGenerator::starting_at(sequential_start)),
            IdStrategy::Random => Arc::new(RandomIdGenerator),
        }
    }
}

/// Allocates patient identifiers.
///
/// Implementations must never hand out the same identifier twice within a
/// process lifetime and must be callable from any number of tasks at once.
/// When the allocation space runs out they fail instead of wrapping.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// Consumes one identifier from the allocation space
    fn generate_id(&self) -> Result<PatientId>;

    /// Strategy implemented by this generator
    fn strategy(&self) -> IdStrategy;
}

/// Monotonic counter shared by every caller in the process.
///
/// Not safe across processes: two processes started at the same value will
/// collide. Such deployments need a central allocator or disjoint start values.
#[derive(Debug)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl SequentialIdGenerator {
    /// Counter starting at 1
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Counter whose first identifier is `first`. The last identifier it
    /// hands out is `u64::MAX - 1`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl Default for SequentialIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn generate_id(&self) -> Result<PatientId> {
        // u64::MAX is never handed out; reaching it means the space is spent.
        let current = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_add(1))
            .map_err(|_| Error::internal("sequential identifier space exhausted"))?;
        Ok(PatientId::Sequential(current))
    }

    fn strategy(&self) -> IdStrategy {
        IdStrategy::Sequential
    }
}

/// Random identifiers; needs no coordination between producers.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn generate_id(&self) -> Result<PatientId> {
        let bytes: [u8; 16] = rand::thread_rng().gen();
        Ok(PatientId::Random(uuid::Builder::from_random_bytes(bytes).into_uuid()))
    }

    fn strategy(&self) -> IdStrategy {
        IdStrategy::Random
    }
}

//! Sharded data-access layer for patient records.
//!
//! Each patient lives on exactly one shard, chosen by a stable hash of its
//! identifier. Writes go to that shard's master and point reads to its replica.
//! List, search and the cross-shard contact uniqueness check run on every
//! replica at once and merge in shard order.
//!
//! ```no_run
//! # async fn run() -> patient_shards::Result<()> {
//! use patient_shards::{PatientStore, StoreConfig};
//!
//! let store = PatientStore::connect(StoreConfig::from_env()?).await?;
//! store.ensure_schema().await?;
//! let page = store.search_patients(Some("Smith"), 1, 20).await?;
//! println!("{} matches", page.total_count);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod database;
pub mod error;
pub mod identity;
pub mod patient;
pub mod shard;

// Re-export common types
pub use config::{ShardEndpoints, StoreConfig};
pub use error::{Error, Result};
pub use identity::{IdGenerator, IdStrategy, PatientId};
pub use patient::{Address, ContactEntry, Page, Patient, PatientDetails, PatientStore};
pub use shard::{FanOutPolicy, HashScheme, ShardIndex, ShardRouter};

/// Version of the patient-shards library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

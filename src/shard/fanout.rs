use std::future::Future;
use std::str::FromStr;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use super::{ShardConnection, ShardIndex};

/// How per-shard results are composed when some shard fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FanOutPolicy {
    /// Any failed shard fails the whole operation and cancels the rest
    FailFast,
    /// Merge the shards that answered and report the ones that did not
    BestEffort,
}

impl Default for FanOutPolicy {
    fn default() -> Self {
        FanOutPolicy::FailFast
    }
}

impl FromStr for FanOutPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-fast" | "failfast" => Ok(FanOutPolicy::FailFast),
            "best-effort" | "besteffort" => Ok(FanOutPolicy::BestEffort),
            other => Err(Error::config(format!("unknown fan-out policy: {}", other))),
        }
    }
}

/// Result of one branch of a fan-out
#[derive(Debug)]
pub enum BranchOutcome<T> {
    /// The shard answered
    Completed(T),
    /// The shard failed or timed out
    Failed(Error),
    /// The branch was abandoned after another branch settled the operation
    Cancelled,
}

/// A branch outcome tagged with its shard
#[derive(Debug)]
pub struct ShardOutcome<T> {
    /// Shard the branch ran against
    pub shard: ShardIndex,
    /// What the branch produced
    pub outcome: BranchOutcome<T>,
}

/// Concatenated results of a fan-out
#[derive(Debug)]
pub struct Merged<T> {
    /// Items in shard-index order, each shard's items in the order it returned them
    pub items: Vec<T>,
    /// Shards that did not contribute; always empty under fail-fast
    pub unavailable: Vec<ShardIndex>,
}

/// Runs one operation concurrently against a set of shard connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct FanOutExecutor {
    policy: FanOutPolicy,
}

impl FanOutExecutor {
    /// Executor composing results under `policy`
    pub fn new(policy: FanOutPolicy) -> Self {
        Self { policy }
    }

    /// Configured composition policy
    pub fn policy(&self) -> FanOutPolicy {
        self.policy
    }

    /// Runs `op` on every target and concatenates the returned lists.
    pub async fn collect<T, F, Fut>(&self, targets: &[ShardConnection], op: F) -> Result<Merged<T>>
    where
        F: Fn(ShardConnection) -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        let outcomes = match self.policy {
            FanOutPolicy::FailFast => run_until(targets, op, |r: &Result<Vec<T>>| r.is_err()).await,
            FanOutPolicy::BestEffort => run_until(targets, op, |_: &Result<Vec<T>>| false).await,
        };
        merge(outcomes, self.policy)
    }

    /// True when `op` answers true on any target.
    ///
    /// Always fail-fast: a shard that cannot answer may be the one holding the
    /// match. A true answer cancels the remaining branches.
    pub async fn any<F, Fut>(&self, targets: &[ShardConnection], op: F) -> Result<bool>
    where
        F: Fn(ShardConnection) -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let outcomes = run_until(targets, op, |r: &Result<bool>| !matches!(r, Ok(false))).await;

        let mut first_error = None;
        for ShardOutcome { shard, outcome } in outcomes {
            match outcome {
                BranchOutcome::Completed(true) => return Ok(true),
                BranchOutcome::Completed(false) | BranchOutcome::Cancelled => {}
                BranchOutcome::Failed(err) => {
                    warn!(shard = %shard, error = %err, "fan-out branch failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(false),
        }
    }
}

/// Runs `op` once per target and waits for every branch.
///
/// When `stop` holds for a branch result the shared token is cancelled and the
/// branches still running report [`BranchOutcome::Cancelled`]. Outcomes come
/// back in target order.
async fn run_until<T, F, Fut, S>(targets: &[ShardConnection], op: F, stop: S) -> Vec<ShardOutcome<T>>
where
    F: Fn(ShardConnection) -> Fut,
    Fut: Future<Output = Result<T>>,
    S: Fn(&Result<T>) -> bool + Sync,
{
    let token = CancellationToken::new();
    let stop = &stop;

    let branches = targets.iter().map(|conn| {
        let shard = conn.shard();
        let token = token.clone();
        let work = op(conn.clone());
        async move {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => BranchOutcome::Cancelled,
                result = work => {
                    if stop(&result) {
                        token.cancel();
                    }
                    match result {
                        Ok(value) => BranchOutcome::Completed(value),
                        Err(err) => BranchOutcome::Failed(err),
                    }
                }
            };
            ShardOutcome { shard, outcome }
        }
    });

    join_all(branches).await
}

/// Concatenates branch outcomes in the order given.
///
/// Under fail-fast the first failure in shard order is returned. Under
/// best-effort failed and cancelled shards are listed as unavailable.
pub(crate) fn merge<T>(outcomes: Vec<ShardOutcome<Vec<T>>>, policy: FanOutPolicy) -> Result<Merged<T>> {
    let mut items = Vec::new();
    let mut unavailable = Vec::new();
    let mut first_error = None;

    for ShardOutcome { shard, outcome } in outcomes {
        match outcome {
            BranchOutcome::Completed(batch) => {
                debug!(shard = %shard, count = batch.len(), "shard answered");
                items.extend(batch);
            }
            BranchOutcome::Failed(err) => {
                warn!(shard = %shard, error = %err, "fan-out branch failed");
                match policy {
                    FanOutPolicy::FailFast => {
                        first_error.get_or_insert(err);
                    }
                    FanOutPolicy::BestEffort => unavailable.push(shard),
                }
            }
            BranchOutcome::Cancelled => {
                if policy == FanOutPolicy::BestEffort {
                    unavailable.push(shard);
                }
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(Merged { items, unavailable }),
    }
}

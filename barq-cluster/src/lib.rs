//! The `CFG` configuration service: shard-to-group assignment, totally ordered by `num`.
//!
//! This crate owns the data model shared by every group in the cluster
//! (`GroupId`, `ShardId`, `Configuration`) plus an in-memory reference
//! implementation of `CFG` (`ConfigStore`) that groups query for the current
//! shard ownership. Rebalancing policy (which shards move on `join`/`leave`)
//! lives here, per spec: it is explicitly not the replicated group's concern.

use std::collections::HashMap;
use std::fs;
use std::hash::{BuildHasher, BuildHasherDefault, Hasher};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of shards keys are partitioned into, fixed cluster-wide.
pub const N_SHARDS: usize = 10;

/// Identifier of a replica group. `GroupId(0)` means "unowned".
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct GroupId(pub u64);

impl GroupId {
    pub const UNOWNED: GroupId = GroupId(0);

    pub fn is_unowned(&self) -> bool {
        *self == Self::UNOWNED
    }
}

/// Identifier of a shard, `0..N_SHARDS`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ShardId(pub usize);

/// Stable hash of a key into a shard id, identical across every group and replica.
pub fn shard_of(key: &str) -> ShardId {
    let mut hasher = BuildHasherDefault::<ahash::AHasher>::default().build_hasher();
    hasher.write(key.as_bytes());
    ShardId((hasher.finish() % N_SHARDS as u64) as usize)
}

/// A single shard-to-group assignment, monotonically numbered.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub num: u64,
    pub shards: [GroupId; N_SHARDS],
    pub groups: HashMap<GroupId, Vec<String>>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            num: 0,
            shards: [GroupId::UNOWNED; N_SHARDS],
            groups: HashMap::new(),
        }
    }
}

impl Configuration {
    /// Replica endpoints for the group owning `shard`, empty if unowned.
    pub fn endpoints_for(&self, shard: ShardId) -> &[String] {
        let gid = self.shards[shard.0];
        self.groups.get(&gid).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("(de)serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("shard index {0} out of range (N_SHARDS={N_SHARDS})")]
    ShardOutOfRange(usize),
    #[error("config store is empty")]
    Empty,
}

/// The `CFG` interface: returns configuration `n`, or the
/// latest when `n < 0` or `n` is beyond the known range. Async because a
/// real deployment's `CFG` sits behind an RPC (see [`grpc::ConfigClient`]);
/// the in-memory [`ConfigStore`] answers synchronously wrapped in `async`.
#[async_trait::async_trait]
pub trait Cfg: Send + Sync {
    async fn query(&self, num: i64) -> Configuration;
}

pub mod grpc;

/// In-memory, totally-ordered sequence of configurations, with the
/// administrative operations (`join`/`leave`/`move_shard`) that produce new
/// ones. Configurations are retained indefinitely, mirroring the Go
/// shardmaster's `configs []Config` slice so historical `Query(num)` calls
/// remain answerable.
#[derive(Clone, Debug)]
pub struct ConfigStore {
    configs: Vec<Configuration>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    /// A fresh store, seeded with the empty `num = 0` configuration.
    pub fn new() -> Self {
        Self {
            configs: vec![Configuration::default()],
        }
    }

    pub fn latest(&self) -> &Configuration {
        self.configs.last().expect("config store is never empty")
    }

    pub fn query(&self, num: i64) -> Configuration {
        if num < 0 || num as usize >= self.configs.len() {
            self.latest().clone()
        } else {
            self.configs[num as usize].clone()
        }
    }

    /// Add (or update the endpoints of) one or more groups, then rebalance
    /// shards across the resulting group set. Bumps `num` by 1.
    pub fn join(&mut self, new_groups: HashMap<GroupId, Vec<String>>) -> Configuration {
        let mut next = self.latest().clone();
        next.num += 1;
        for (gid, endpoints) in new_groups {
            next.groups.insert(gid, endpoints);
        }
        rebalance(&mut next.shards, &next.groups);
        self.configs.push(next.clone());
        next
    }

    /// Remove groups and redistribute their shards across the remaining
    /// groups (or mark them unowned if none remain). Bumps `num` by 1.
    pub fn leave(&mut self, gids: &[GroupId]) -> Configuration {
        let mut next = self.latest().clone();
        next.num += 1;
        for gid in gids {
            next.groups.remove(gid);
        }
        rebalance(&mut next.shards, &next.groups);
        self.configs.push(next.clone());
        next
    }

    /// Pin a single shard to a group without touching any other shard's
    /// assignment. Bumps `num` by 1.
    pub fn move_shard(&mut self, shard: ShardId, gid: GroupId) -> Result<Configuration, ConfigError> {
        if shard.0 >= N_SHARDS {
            return Err(ConfigError::ShardOutOfRange(shard.0));
        }
        let mut next = self.latest().clone();
        next.num += 1;
        next.shards[shard.0] = gid;
        self.configs.push(next.clone());
        Ok(next)
    }

    pub fn to_path(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(&self.configs)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let configs: Vec<Configuration> = serde_json::from_str(&content)?;
        if configs.is_empty() {
            return Err(ConfigError::Empty);
        }
        Ok(Self { configs })
    }
}

#[async_trait::async_trait]
impl Cfg for ConfigStore {
    async fn query(&self, num: i64) -> Configuration {
        ConfigStore::query(self, num)
    }
}

/// Greedily move shards from the most-loaded group to the least-loaded group
/// until every group holds `floor(N_SHARDS/n)` or `ceil(N_SHARDS/n)` shards.
/// Shards owned by a group no longer present become free and are handed to
/// whichever remaining group has the fewest shards first. Deterministic
/// given a fixed `groups` key set, since group ids are visited in sorted
/// order.
fn rebalance(shards: &mut [GroupId; N_SHARDS], groups: &HashMap<GroupId, Vec<String>>) {
    let mut group_ids: Vec<GroupId> = groups.keys().copied().collect();
    group_ids.sort();

    if group_ids.is_empty() {
        *shards = [GroupId::UNOWNED; N_SHARDS];
        return;
    }

    for s in shards.iter_mut() {
        if !s.is_unowned() && !group_ids.contains(s) {
            *s = GroupId::UNOWNED;
        }
    }

    let target_min = N_SHARDS / group_ids.len();
    let target_max = if N_SHARDS % group_ids.len() == 0 {
        target_min
    } else {
        target_min + 1
    };

    loop {
        let mut counts: HashMap<GroupId, usize> = group_ids.iter().map(|g| (*g, 0)).collect();
        let mut free: Vec<usize> = Vec::new();
        for (i, s) in shards.iter().enumerate() {
            if s.is_unowned() {
                free.push(i);
            } else {
                *counts.get_mut(s).expect("owner is always a known group") += 1;
            }
        }

        if let Some(i) = free.pop() {
            let target = *group_ids.iter().min_by_key(|g| counts[g]).unwrap();
            shards[i] = target;
            continue;
        }

        let fullest = *group_ids.iter().max_by_key(|g| counts[g]).unwrap();
        let emptiest = *group_ids.iter().min_by_key(|g| counts[g]).unwrap();
        if counts[&fullest] <= target_max && counts[&emptiest] >= target_min {
            break;
        }
        if counts[&fullest].saturating_sub(counts[&emptiest]) <= 1 {
            break;
        }

        let shard_idx = shards
            .iter()
            .position(|s| *s == fullest)
            .expect("fullest group must own at least one shard");
        shards[shard_idx] = emptiest;
    }
}

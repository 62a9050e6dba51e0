use std::collections::HashMap;

use barq_cluster::{ShardId, N_SHARDS};
use serde::{Deserialize, Serialize};

/// The `key -> value` mapping, partitioned by shard. A key may only ever
/// live in `shards[shard_of(key)]`. Ownership of shard *i* is
/// tracked by the current configuration, not by this struct. A shard the
/// group no longer owns may still be physically present here until a
/// `NOTIFY` clears it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShardStore {
    shards: Box<[HashMap<String, String>; N_SHARDS]>,
}

impl Default for ShardStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardStore {
    pub fn new() -> Self {
        Self {
            shards: Box::new(std::array::from_fn(|_| HashMap::new())),
        }
    }

    pub fn get(&self, shard: ShardId, key: &str) -> Option<&String> {
        self.shards[shard.0].get(key)
    }

    pub fn put(&mut self, shard: ShardId, key: String, value: String) {
        self.shards[shard.0].insert(key, value);
    }

    pub fn append(&mut self, shard: ShardId, key: String, value: &str) {
        self.shards[shard.0].entry(key).or_default().push_str(value);
    }

    pub fn shard(&self, shard: ShardId) -> &HashMap<String, String> {
        &self.shards[shard.0]
    }

    /// Union a peer's shard data into ours; incoming keys overwrite.
    pub fn merge_shard(&mut self, shard: ShardId, incoming: &HashMap<String, String>) {
        for (k, v) in incoming {
            self.shards[shard.0].insert(k.clone(), v.clone());
        }
    }

    /// Merge a full `[HashMap; N_SHARDS]` (e.g. a `RECONFIG` pull set) in one pass.
    pub fn merge_all(&mut self, incoming: &[HashMap<String, String>; N_SHARDS]) {
        for i in 0..N_SHARDS {
            self.merge_shard(ShardId(i), &incoming[i]);
        }
    }

    /// Drop a shard's mapping entirely. The effect of an applied `NOTIFY`.
    pub fn clear_shard(&mut self, shard: ShardId) {
        self.shards[shard.0].clear();
    }

    pub fn all(&self) -> &[HashMap<String, String>; N_SHARDS] {
        &self.shards
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_and_get_round_trip() {
        let mut store = ShardStore::new();
        store.put(ShardId(2), "k".into(), "v".into());
        assert_eq!(store.get(ShardId(2), "k"), Some(&"v".to_string()));
    }

    #[test]
    fn append_concatenates() {
        let mut store = ShardStore::new();
        store.put(ShardId(0), "k".into(), "1".into());
        store.append(ShardId(0), "k".into(), "2");
        assert_eq!(store.get(ShardId(0), "k"), Some(&"12".to_string()));
    }

    #[test]
    fn keys_are_isolated_per_shard() {
        let mut store = ShardStore::new();
        store.put(ShardId(0), "k".into(), "a".into());
        assert_eq!(store.get(ShardId(1), "k"), None);
    }

    #[test]
    fn clear_shard_drops_only_that_shard() {
        let mut store = ShardStore::new();
        store.put(ShardId(0), "k0".into(), "v".into());
        store.put(ShardId(1), "k1".into(), "v".into());
        store.clear_shard(ShardId(0));
        assert_eq!(store.get(ShardId(0), "k0"), None);
        assert_eq!(store.get(ShardId(1), "k1"), Some(&"v".to_string()));
    }

    #[test]
    fn merge_shard_overwrites_on_conflict() {
        let mut store = ShardStore::new();
        store.put(ShardId(0), "k".into(), "old".into());
        let mut incoming = HashMap::new();
        incoming.insert("k".to_string(), "new".to_string());
        store.merge_shard(ShardId(0), &incoming);
        assert_eq!(store.get(ShardId(0), "k"), Some(&"new".to_string()));
    }
}

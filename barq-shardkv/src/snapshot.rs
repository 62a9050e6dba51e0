use barq_cluster::Configuration;
use serde::{Deserialize, Serialize};

use crate::ack::AckTable;
use crate::error::fatal;
use crate::store::ShardStore;

/// `{last_included_index, last_included_term, current_config, shard_store,
/// ack_table}`, in that order. Encoded with `bincode`
/// (the corpus's standard binary-codec choice for internal snapshot blobs).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupSnapshot {
    pub last_included_index: u64,
    pub last_included_term: u64,
    pub current_config: Configuration,
    pub shard_store: ShardStore,
    pub ack_table: AckTable,
}

pub fn encode(snapshot: &GroupSnapshot) -> Vec<u8> {
    bincode::serialize(snapshot).unwrap_or_else(|e| fatal(format!("snapshot encode failed: {e}")))
}

/// Restore is the strict inverse of [`encode`]. The round trip must be
/// exact; a decode failure means the persisted bytes themselves are corrupt
/// and unrecoverable.
pub fn decode(bytes: &[u8]) -> GroupSnapshot {
    bincode::deserialize(bytes).unwrap_or_else(|e| fatal(format!("snapshot decode failed: {e}")))
}

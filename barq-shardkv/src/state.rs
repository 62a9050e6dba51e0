use barq_cluster::{Configuration, GroupId};

use crate::ack::AckTable;
use crate::store::ShardStore;

/// Everything the Applier owns: shard store, ack table, and current
/// config, guarded by one mutex, a single per-server mutex. The
/// pending-result registry is deliberately a separate lock so a slow
/// client wait never blocks the Applier.
pub struct GroupState {
    pub gid: GroupId,
    pub current_config: Configuration,
    pub store: ShardStore,
    pub ack: AckTable,
}

impl GroupState {
    pub fn new(gid: GroupId) -> Self {
        Self {
            gid,
            current_config: Configuration::default(),
            store: ShardStore::new(),
            ack: AckTable::new(),
        }
    }
}

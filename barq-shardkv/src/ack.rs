use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Duplicate-suppression table: `client_id -> largest applied req_id`.
/// Monotone per client. This is the sole mechanism keeping retried writes
/// idempotent across leader changes and log replay.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AckTable(HashMap<i64, i64>);

impl AckTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `req_id` has already been applied (or superseded) for this
    /// client. Does *not* record anything. Callers that intend to apply a
    /// write must call [`record`](Self::record) themselves once they've
    /// decided not to skip it.
    pub fn is_duplicate(&self, client_id: i64, req_id: i64) -> bool {
        self.0.get(&client_id).is_some_and(|&last| last >= req_id)
    }

    pub fn record(&mut self, client_id: i64, req_id: i64) {
        let entry = self.0.entry(client_id).or_insert(req_id);
        if req_id > *entry {
            *entry = req_id;
        } else if req_id < *entry {
            crate::error::fatal(format!(
                "ack table regression for client {client_id}: had {}, saw {req_id}",
                *entry
            ));
        }
    }

    /// Merge another group's ack entries in, taking the per-client max
    /// (the RECONFIG/TRANSFER apply rule: never let a merge lower a client's recorded request id).
    pub fn merge_max(&mut self, other: &HashMap<i64, i64>) {
        for (&client_id, &req_id) in other {
            let entry = self.0.entry(client_id).or_insert(req_id);
            if req_id > *entry {
                *entry = req_id;
            }
        }
    }

    pub fn as_map(&self) -> &HashMap<i64, i64> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

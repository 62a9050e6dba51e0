use std::collections::HashMap;

use barq_cluster::{Configuration, N_SHARDS};
use serde::{Deserialize, Serialize};

use crate::error::ShardKvError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PutAppendKind {
    Put,
    Append,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetArgs {
    pub client_id: i64,
    pub req_id: i64,
    pub key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PutAppendArgs {
    pub client_id: i64,
    pub req_id: i64,
    pub key: String,
    pub value: String,
    pub kind: PutAppendKind,
}

/// Payload of a `RECONFIG` command: the new configuration plus everything
/// pulled from prior owners for shards this group is about to start owning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconfigArgs {
    pub new_config: Configuration,
    pub pulled_shards: Box<[HashMap<String, String>; N_SHARDS]>,
    pub pulled_ack: HashMap<i64, i64>,
}

/// Payload of a `TRANSFER` command: a single prior owner's pull reply,
/// proposed independently of (and typically just before) the merged
/// `RECONFIG`. A best-effort record of the pull; the following `RECONFIG`
/// is what actually advances `current_config`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferArgs {
    pub config_num: u64,
    /// Shard indices this reply actually covers, i.e. the ones requested
    /// from the specific prior owner it came from. Only these gain
    /// `self_gid` ownership on apply, narrower than the full shard array.
    pub shard_ids: Vec<usize>,
    pub shards: Box<[HashMap<String, String>; N_SHARDS]>,
    pub ack: HashMap<i64, i64>,
}

/// Payload of a `NOTIFY` command: "you may drop these shards".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotifyArgs {
    pub config_num: u64,
    pub shards: Vec<usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Op {
    Get(GetArgs),
    PutAppend(PutAppendArgs),
    Reconfig(ReconfigArgs),
    Transfer(TransferArgs),
    Notify(NotifyArgs),
}

/// Identifies which proposal a delivered [`AppliedResult`] actually
/// corresponds to. A waiter compares its own echo against the delivered
/// one to detect "a different op landed at my index" after a leadership
/// change. Without this check exactly-once delivery is lost.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Echo {
    Client { client_id: i64, req_id: i64 },
    Reconfig { num: u64 },
    Transfer { config_num: u64 },
    Notify { config_num: u64 },
}

#[derive(Clone, Debug)]
pub enum ResultPayload {
    Get { err: Option<ShardKvError>, value: String },
    PutAppend { err: Option<ShardKvError> },
    Reconfig { applied: bool },
    Transfer,
    Notify,
}

#[derive(Clone, Debug)]
pub struct AppliedResult {
    pub echo: Echo,
    pub payload: ResultPayload,
}

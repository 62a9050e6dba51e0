use std::sync::Arc;

use barq_cluster::shard_of;
use tokio::sync::{mpsc, Mutex};

use crate::log::{Log, LogMsg};
use crate::op::{AppliedResult, Echo, NotifyArgs, Op, PutAppendArgs, PutAppendKind, ReconfigArgs, ResultPayload, TransferArgs};
use crate::op::GetArgs;
use crate::pending::PendingRegistry;
use crate::persister::Persister;
use crate::snapshot::{self, GroupSnapshot};
use crate::state::GroupState;

/// Dispatch one committed command against `state`, mutating it in place
/// and returning the `AppliedResult` to deliver. This is the
/// *only* place the shard store, ack table, and current config are ever
/// mutated. Every correctness property of the store reduces to "this
/// function is correct and is the sole writer".
pub fn apply(state: &mut GroupState, op: Op) -> AppliedResult {
    match op {
        Op::Get(args) => apply_get(state, args),
        Op::PutAppend(args) => apply_put_append(state, args),
        Op::Reconfig(args) => apply_reconfig(state, args),
        Op::Transfer(args) => apply_transfer(state, args),
        Op::Notify(args) => apply_notify(state, args),
    }
}

fn apply_get(state: &GroupState, args: GetArgs) -> AppliedResult {
    let echo = Echo::Client {
        client_id: args.client_id,
        req_id: args.req_id,
    };
    let shard = shard_of(&args.key);
    if state.current_config.shards[shard.0] != state.gid {
        tracing::warn!(key = %args.key, "GET rejected: WRONG_GROUP");
        return AppliedResult {
            echo,
            payload: ResultPayload::Get {
                err: Some(crate::error::ShardKvError::WrongGroup),
                value: String::new(),
            },
        };
    }
    let value = state.store.get(shard, &args.key).cloned();
    tracing::debug!(key = %args.key, found = value.is_some(), "applied GET");
    match value {
        Some(value) => AppliedResult {
            echo,
            payload: ResultPayload::Get { err: None, value },
        },
        None => AppliedResult {
            echo,
            payload: ResultPayload::Get {
                err: Some(crate::error::ShardKvError::NoKey),
                value: String::new(),
            },
        },
    }
}

fn apply_put_append(state: &mut GroupState, args: PutAppendArgs) -> AppliedResult {
    let echo = Echo::Client {
        client_id: args.client_id,
        req_id: args.req_id,
    };
    let shard = shard_of(&args.key);
    if state.current_config.shards[shard.0] != state.gid {
        tracing::warn!(key = %args.key, "PUT/APPEND rejected: WRONG_GROUP");
        return AppliedResult {
            echo,
            payload: ResultPayload::PutAppend {
                err: Some(crate::error::ShardKvError::WrongGroup),
            },
        };
    }
    if !state.ack.is_duplicate(args.client_id, args.req_id) {
        match args.kind {
            PutAppendKind::Put => state.store.put(shard, args.key.clone(), args.value.clone()),
            PutAppendKind::Append => state.store.append(shard, args.key.clone(), &args.value),
        }
        state.ack.record(args.client_id, args.req_id);
        tracing::debug!(key = %args.key, client_id = args.client_id, req_id = args.req_id, "applied PUT/APPEND");
    } else {
        tracing::debug!(client_id = args.client_id, req_id = args.req_id, "PUT/APPEND already applied, acking duplicate");
    }
    AppliedResult {
        echo,
        payload: ResultPayload::PutAppend { err: None },
    }
}

fn apply_reconfig(state: &mut GroupState, args: ReconfigArgs) -> AppliedResult {
    let echo = Echo::Reconfig { num: args.new_config.num };
    let applied = args.new_config.num > state.current_config.num;
    if applied {
        state.store.merge_all(&args.pulled_shards);
        state.ack.merge_max(&args.pulled_ack);
        state.current_config = args.new_config;
        tracing::debug!(num = state.current_config.num, "applied RECONFIG");
    } else {
        tracing::debug!(
            incoming = args.new_config.num,
            current = state.current_config.num,
            "RECONFIG no-op: not newer than current config"
        );
    }
    AppliedResult {
        echo,
        payload: ResultPayload::Reconfig { applied },
    }
}

fn apply_transfer(state: &mut GroupState, args: TransferArgs) -> AppliedResult {
    let echo = Echo::Transfer { config_num: args.config_num };
    if args.config_num == state.current_config.num + 1 {
        for &i in &args.shard_ids {
            state.store.merge_shard(barq_cluster::ShardId(i), &args.shards[i]);
            state.current_config.shards[i] = state.gid;
        }
        state.ack.merge_max(&args.ack);
        tracing::debug!(config_num = args.config_num, shards = ?args.shard_ids, "applied TRANSFER");
    } else {
        tracing::debug!(
            incoming = args.config_num,
            current = state.current_config.num,
            "TRANSFER no-op: not the immediate successor config"
        );
    }
    AppliedResult {
        echo,
        payload: ResultPayload::Transfer,
    }
}

fn apply_notify(state: &mut GroupState, args: NotifyArgs) -> AppliedResult {
    for &i in &args.shards {
        state.store.clear_shard(barq_cluster::ShardId(i));
    }
    tracing::debug!(config_num = args.config_num, shards = ?args.shards, "applied NOTIFY");
    AppliedResult {
        echo: Echo::Notify { config_num: args.config_num },
        payload: ResultPayload::Notify,
    }
}

/// The Applier: the single consumer of `LOG`'s delivery channel. Runs until
/// the channel closes (server shutdown).
pub async fn run_applier(
    state: Arc<Mutex<GroupState>>,
    mut rx: mpsc::UnboundedReceiver<LogMsg>,
    pending: Arc<PendingRegistry>,
    log: Arc<dyn Log>,
    persister: Arc<dyn Persister>,
    max_raft_state: i64,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            LogMsg::Snapshot { bytes } => {
                let snap = snapshot::decode(&bytes);
                let mut guard = state.lock().await;
                guard.current_config = snap.current_config;
                guard.store = snap.shard_store;
                guard.ack = snap.ack_table;
                drop(guard);
                pending.clear().await;
                tracing::warn!("installed snapshot, all pending waiters discarded");
            }
            LogMsg::Command { index, op } => {
                let result = {
                    let mut guard = state.lock().await;
                    apply(&mut guard, op)
                };
                pending.deliver(index, result).await;
                maybe_snapshot(&state, &log, &persister, max_raft_state, index).await;
            }
        }
    }
}

/// Snapshot policy: once the log's persisted size exceeds `0.8 *
/// max_raft_state` (and `max_raft_state != -1`), hand `LOG` a snapshot at
/// the index just applied. The exact threshold is a policy
/// knob; the contract is only that log growth stays bounded.
async fn maybe_snapshot(
    state: &Arc<Mutex<GroupState>>,
    log: &Arc<dyn Log>,
    persister: &Arc<dyn Persister>,
    max_raft_state: i64,
    index: u64,
) {
    if max_raft_state < 0 {
        return;
    }
    if (log.persist_size() as f64) <= 0.8 * max_raft_state as f64 {
        return;
    }
    let (term, _) = log.get_state();
    let snapshot = {
        let guard = state.lock().await;
        GroupSnapshot {
            last_included_index: index,
            last_included_term: term,
            current_config: guard.current_config.clone(),
            shard_store: guard.store.clone(),
            ack_table: guard.ack.clone(),
        }
    };
    let bytes = snapshot::encode(&snapshot);
    persister.save_snapshot(bytes.clone());
    log.take_snapshot(bytes, index).await;
    tracing::info!(index, "took snapshot");
}

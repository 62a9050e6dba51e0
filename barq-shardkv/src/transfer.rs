use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use barq_proto::shardkv::shard_transfer_client::ShardTransferClient;
use barq_proto::shardkv::shard_transfer_server::ShardTransfer;
use barq_proto::shardkv::{
    ErrorKind, ShardData, TransferNotifyReply, TransferNotifyRequest, TransferShardReply, TransferShardRequest,
};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tonic::{transport::Channel, Request, Response, Status};

use crate::frontend::CLIENT_TIMEOUT;
use crate::log::Log;
use crate::op::{Echo, NotifyArgs, Op, TransferArgs};
use crate::pending::PendingRegistry;
use crate::state::GroupState;

/// How long a pull attempt against one peer endpoint waits before moving to
/// the next candidate endpoint for that group.
const PEER_TIMEOUT: Duration = Duration::from_millis(500);

/// Inbound side of shard migration: serves `ShardTransfer` to peer groups
/// pulling shards from (or notifying) us during reconfiguration. Shares
/// `state`/`log`/`pending` with [`crate::frontend::FrontEnd`]. A transfer
/// request mutates the same Applier-owned state as a client request, just
/// via a different `Op` variant.
pub struct TransferService {
    pub gid: barq_cluster::GroupId,
    pub state: Arc<Mutex<GroupState>>,
    pub log: Arc<dyn Log>,
    pub pending: Arc<PendingRegistry>,
}

#[tonic::async_trait]
impl ShardTransfer for TransferService {
    async fn transfer_shard(
        &self,
        request: Request<TransferShardRequest>,
    ) -> Result<Response<TransferShardReply>, Status> {
        let req = request.into_inner();
        if !self.log.get_state().1 {
            return Ok(Response::new(TransferShardReply {
                err: ErrorKind::WrongLeader as i32,
                config_num: 0,
                shards: Vec::new(),
                ack: HashMap::new(),
            }));
        }
        let guard = self.state.lock().await;
        if req.config_num > guard.current_config.num {
            return Ok(Response::new(TransferShardReply {
                err: ErrorKind::NotReady as i32,
                config_num: guard.current_config.num,
                shards: Vec::new(),
                ack: HashMap::new(),
            }));
        }
        // Reply covers only the requested shard ids (still a fixed
        // N_SHARDS-long array so the caller can index it directly); an
        // empty `req.shards` is treated as "every shard" for callers (e.g.
        // a manual debugging client) that don't narrow the request.
        let wanted: std::collections::HashSet<usize> = req.shards.iter().map(|&i| i as usize).collect();
        let shards = guard
            .store
            .all()
            .iter()
            .enumerate()
            .map(|(i, m)| {
                if wanted.is_empty() || wanted.contains(&i) {
                    ShardData { entries: m.clone() }
                } else {
                    ShardData { entries: HashMap::new() }
                }
            })
            .collect();
        let ack = guard.ack.as_map().clone();
        Ok(Response::new(TransferShardReply {
            err: ErrorKind::Ok as i32,
            config_num: guard.current_config.num,
            shards,
            ack,
        }))
    }

    async fn transfer_notify(
        &self,
        request: Request<TransferNotifyRequest>,
    ) -> Result<Response<TransferNotifyReply>, Status> {
        let req = request.into_inner();
        if !self.log.get_state().1 {
            return Ok(Response::new(TransferNotifyReply {
                err: ErrorKind::WrongLeader as i32,
            }));
        }
        let current_num = self.state.lock().await.current_config.num;
        if current_num > req.config_num {
            return Ok(Response::new(TransferNotifyReply {
                err: ErrorKind::OutOfDate as i32,
            }));
        }
        let shard_ids: Vec<usize> = req.shards.iter().map(|&i| i as usize).collect();
        let (op, echo) = notify_op(req.config_num, shard_ids);
        let Some((index, _)) = self.log.start(op).await else {
            return Ok(Response::new(TransferNotifyReply {
                err: ErrorKind::WrongLeader as i32,
            }));
        };
        match timeout(CLIENT_TIMEOUT, self.pending.wait(index)).await {
            Ok(Some(result)) if result.echo == echo => Ok(Response::new(TransferNotifyReply {
                err: ErrorKind::Ok as i32,
            })),
            _ => Ok(Response::new(TransferNotifyReply {
                err: ErrorKind::WrongLeader as i32,
            })),
        }
    }
}

/// Outbound side: pull one group's copy of the requested shards, trying
/// each of its known endpoints in order.
pub async fn pull_shards(
    endpoints: &[String],
    config_num: u64,
    shard_ids: &[usize],
) -> Option<TransferShardReply> {
    for endpoint in endpoints {
        let Ok(endpoint) = Channel::from_shared(endpoint.clone()) else {
            continue;
        };
        let Ok(channel) = endpoint.connect().await else {
            continue;
        };
        let mut client = ShardTransferClient::new(channel);
        let request = tonic::Request::new(TransferShardRequest {
            config_num,
            shards: shard_ids.iter().map(|&i| i as u32).collect(),
        });
        match tokio::time::timeout(PEER_TIMEOUT, client.transfer_shard(request)).await {
            Ok(Ok(resp)) => {
                let reply = resp.into_inner();
                if reply.err == ErrorKind::Ok as i32 {
                    return Some(reply);
                }
            }
            _ => continue,
        }
    }
    None
}

/// Fire off `TransferNotify` to every endpoint of one group, best-effort.
/// A group that never receives it will simply re-pull a no-longer-needed
/// shard later, which is wasteful but not incorrect.
pub async fn notify_shards(endpoints: &[String], config_num: u64, shards: Vec<u32>) {
    for endpoint in endpoints {
        let Ok(endpoint) = Channel::from_shared(endpoint.clone()) else {
            continue;
        };
        let Ok(channel) = endpoint.connect().await else {
            continue;
        };
        let mut client = ShardTransferClient::new(channel);
        let request = tonic::Request::new(TransferNotifyRequest {
            config_num,
            shards: shards.clone(),
        });
        if tokio::time::timeout(PEER_TIMEOUT, client.transfer_notify(request))
            .await
            .is_ok()
        {
            return;
        }
    }
}

/// Convert a peer's pull reply into the `TRANSFER` command this group
/// proposes to its own log, scoped to the shards actually requested. This
/// group only grants itself ownership of those specific indices, not every
/// index in the reply.
pub fn transfer_op(reply: TransferShardReply, shard_ids: Vec<usize>) -> (Op, Echo) {
    let config_num = reply.config_num;
    let mut shards: Box<[HashMap<String, String>; barq_cluster::N_SHARDS]> =
        Box::new(std::array::from_fn(|_| HashMap::new()));
    for (i, data) in reply.shards.into_iter().enumerate().take(barq_cluster::N_SHARDS) {
        shards[i] = data.entries;
    }
    let echo = Echo::Transfer { config_num };
    let op = Op::Transfer(TransferArgs {
        config_num,
        shard_ids,
        shards,
        ack: reply.ack,
    });
    (op, echo)
}

pub fn notify_op(config_num: u64, shards: Vec<usize>) -> (Op, Echo) {
    let echo = Echo::Notify { config_num };
    let op = Op::Notify(NotifyArgs { config_num, shards });
    (op, echo)
}

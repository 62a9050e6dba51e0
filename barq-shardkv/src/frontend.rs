use std::sync::Arc;
use std::time::Duration;

use barq_cluster::shard_of;
use barq_proto::shardkv::kv_store_server::KvStore;
use barq_proto::shardkv::{ErrorKind, GetReply, GetRequest, PutAppendOp, PutAppendReply, PutAppendRequest};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tonic::{Request, Response, Status};

use crate::error::ShardKvError;
use crate::log::Log;
use crate::op::{Echo, GetArgs, Op, PutAppendArgs, PutAppendKind, ResultPayload};
use crate::pending::PendingRegistry;
use crate::state::GroupState;

/// How long the front end waits for a proposed command to be applied
/// before giving up and telling the client to retry against (possibly) a
/// new leader.
pub const CLIENT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Shared handle the `KvStore` service and the reconfiguration driver both
/// submit proposals through.
pub struct FrontEnd {
    pub gid: barq_cluster::GroupId,
    pub state: Arc<Mutex<GroupState>>,
    pub log: Arc<dyn Log>,
    pub pending: Arc<PendingRegistry>,
}

impl FrontEnd {
    /// Propose `op`, wait for it to be applied, and check the delivered
    /// result actually corresponds to our proposal (not some other command
    /// that landed at the same index after a leadership change).
    pub async fn submit_and_wait(&self, op: Op, expected_echo: Echo) -> Result<ResultPayload, ShardKvError> {
        let Some((index, _term)) = self.log.start(op).await else {
            return Err(ShardKvError::WrongLeader);
        };
        match timeout(CLIENT_TIMEOUT, self.pending.wait(index)).await {
            Ok(Some(result)) if result.echo == expected_echo => Ok(result.payload),
            Ok(Some(_)) => Err(ShardKvError::WrongLeader),
            Ok(None) | Err(_) => Err(ShardKvError::WrongLeader),
        }
    }

    async fn owns(&self, key: &str) -> bool {
        let shard = shard_of(key);
        let guard = self.state.lock().await;
        guard.current_config.shards[shard.0] == self.gid
    }
}

#[tonic::async_trait]
impl KvStore for FrontEnd {
    async fn get(&self, request: Request<GetRequest>) -> Result<Response<GetReply>, Status> {
        let req = request.into_inner();
        if !self.owns(&req.key).await {
            return Ok(Response::new(GetReply {
                wrong_leader: false,
                err: ErrorKind::WrongGroup as i32,
                value: String::new(),
            }));
        }
        let echo = Echo::Client {
            client_id: req.client_id,
            req_id: req.req_id,
        };
        let op = Op::Get(GetArgs {
            client_id: req.client_id,
            req_id: req.req_id,
            key: req.key,
        });
        match self.submit_and_wait(op, echo).await {
            Ok(ResultPayload::Get { err, value }) => Ok(Response::new(GetReply {
                wrong_leader: false,
                err: err.map(ErrorKind::from).unwrap_or(ErrorKind::Ok) as i32,
                value,
            })),
            Ok(other) => {
                tracing::error!(?other, "GET dispatch returned a non-Get payload");
                Ok(Response::new(GetReply {
                    wrong_leader: true,
                    err: ErrorKind::WrongLeader as i32,
                    value: String::new(),
                }))
            }
            Err(_) => Ok(Response::new(GetReply {
                wrong_leader: true,
                err: ErrorKind::WrongLeader as i32,
                value: String::new(),
            })),
        }
    }

    async fn put_append(
        &self,
        request: Request<PutAppendRequest>,
    ) -> Result<Response<PutAppendReply>, Status> {
        let req = request.into_inner();
        if !self.owns(&req.key).await {
            return Ok(Response::new(PutAppendReply {
                wrong_leader: false,
                err: ErrorKind::WrongGroup as i32,
            }));
        }
        let kind = match PutAppendOp::try_from(req.op) {
            Ok(PutAppendOp::Put) => PutAppendKind::Put,
            Ok(PutAppendOp::Append) => PutAppendKind::Append,
            Err(_) => {
                return Err(Status::invalid_argument("unknown PutAppendOp"));
            }
        };
        let echo = Echo::Client {
            client_id: req.client_id,
            req_id: req.req_id,
        };
        let op = Op::PutAppend(PutAppendArgs {
            client_id: req.client_id,
            req_id: req.req_id,
            key: req.key,
            value: req.value,
            kind,
        });
        match self.submit_and_wait(op, echo).await {
            Ok(ResultPayload::PutAppend { err }) => Ok(Response::new(PutAppendReply {
                wrong_leader: false,
                err: err.map(ErrorKind::from).unwrap_or(ErrorKind::Ok) as i32,
            })),
            Ok(other) => {
                tracing::error!(?other, "PUT/APPEND dispatch returned a non-PutAppend payload");
                Ok(Response::new(PutAppendReply {
                    wrong_leader: true,
                    err: ErrorKind::WrongLeader as i32,
                }))
            }
            Err(_) => Ok(Response::new(PutAppendReply {
                wrong_leader: true,
                err: ErrorKind::WrongLeader as i32,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::InMemoryLog;
    use crate::applier::run_applier;
    use crate::persister::InMemoryPersister;
    use barq_cluster::GroupId;

    async fn wired() -> FrontEnd {
        let gid = GroupId(1);
        let (log, rx) = InMemoryLog::new();
        let mut state = GroupState::new(gid);
        state.current_config.num = 1;
        state.current_config.shards = [gid; barq_cluster::N_SHARDS];
        let state = Arc::new(Mutex::new(state));
        let pending = Arc::new(PendingRegistry::new());
        tokio::spawn(run_applier(
            state.clone(),
            rx,
            pending.clone(),
            log.clone(),
            Arc::new(InMemoryPersister::new()),
            -1,
        ));
        FrontEnd { gid, state, log, pending }
    }

    async fn wired_with_log() -> (FrontEnd, Arc<InMemoryLog>) {
        let gid = GroupId(1);
        let (log, rx) = InMemoryLog::new();
        let mut state = GroupState::new(gid);
        state.current_config.num = 1;
        state.current_config.shards = [gid; barq_cluster::N_SHARDS];
        let state = Arc::new(Mutex::new(state));
        let pending = Arc::new(PendingRegistry::new());
        tokio::spawn(run_applier(
            state.clone(),
            rx,
            pending.clone(),
            log.clone(),
            Arc::new(InMemoryPersister::new()),
            -1,
        ));
        let front = FrontEnd {
            gid,
            state,
            log: log.clone(),
            pending,
        };
        (front, log)
    }

    #[tokio::test]
    async fn put_then_get_round_trips_over_the_service() {
        let front = wired().await;
        let put = front
            .put_append(Request::new(PutAppendRequest {
                client_id: 1,
                req_id: 1,
                key: "a".into(),
                value: "x".into(),
                op: PutAppendOp::Put as i32,
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(!put.wrong_leader);
        assert_eq!(put.err, ErrorKind::Ok as i32);

        let get = front
            .get(Request::new(GetRequest {
                client_id: 1,
                req_id: 2,
                key: "a".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(get.value, "x");
        assert_eq!(get.err, ErrorKind::Ok as i32);
    }

    #[tokio::test]
    async fn get_on_unowned_key_is_wrong_group_without_touching_the_log() {
        let gid = GroupId(1);
        let (log, _rx) = InMemoryLog::new();
        let state = Arc::new(Mutex::new(GroupState::new(gid)));
        let front = FrontEnd {
            gid,
            state,
            log,
            pending: Arc::new(PendingRegistry::new()),
        };
        let reply = front
            .get(Request::new(GetRequest {
                client_id: 1,
                req_id: 1,
                key: "a".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(reply.err, ErrorKind::WrongGroup as i32);
    }

    /// A leader loss mid-operation must surface
    /// as `WRONG_LEADER` rather than silently dropping or double-applying
    /// the write, and a client retry after the loss still converges to the
    /// right value (exactly-once via the ack table, not via this check).
    #[tokio::test]
    async fn leader_loss_surfaces_wrong_leader_and_retry_converges() {
        let (front, log) = wired_with_log().await;
        log.set_leader(false);

        let put = front
            .put_append(Request::new(PutAppendRequest {
                client_id: 1,
                req_id: 1,
                key: "a".into(),
                value: "x".into(),
                op: PutAppendOp::Put as i32,
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(put.wrong_leader, "a non-leader must report wrong_leader so the client retries elsewhere");

        log.set_leader(true);
        let retry = front
            .put_append(Request::new(PutAppendRequest {
                client_id: 1,
                req_id: 1,
                key: "a".into(),
                value: "x".into(),
                op: PutAppendOp::Put as i32,
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(!retry.wrong_leader);
        assert_eq!(retry.err, ErrorKind::Ok as i32);

        let get = front
            .get(Request::new(GetRequest {
                client_id: 1,
                req_id: 2,
                key: "a".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(get.value, "x");
    }

    /// End-to-end through the front end, the Applier, and the ack table
    /// together: a client retrying the same `(client_id, req_id)` append
    /// (e.g. after never seeing the first reply) must not double-apply.
    #[tokio::test]
    async fn retried_append_with_same_req_id_is_not_double_applied() {
        let front = wired().await;
        for _ in 0..3 {
            let reply = front
                .put_append(Request::new(PutAppendRequest {
                    client_id: 7,
                    req_id: 1,
                    key: "k".into(),
                    value: "ab".into(),
                    op: PutAppendOp::Append as i32,
                }))
                .await
                .unwrap()
                .into_inner();
            assert!(!reply.wrong_leader);
            assert_eq!(reply.err, ErrorKind::Ok as i32);
        }

        let get = front
            .get(Request::new(GetRequest {
                client_id: 7,
                req_id: 2,
                key: "k".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(get.value, "ab", "retried append with the same req_id must be applied exactly once");
    }
}

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use barq_cluster::{shard_of, Cfg, Configuration};
use barq_proto::shardkv::kv_store_client::KvStoreClient;
use barq_proto::shardkv::{ErrorKind, GetRequest, PutAppendOp, PutAppendRequest};
use rand::Rng;
use tonic::transport::Channel;

use crate::error::ShardKvError;
use crate::op::PutAppendKind;

const RPC_TIMEOUT: Duration = Duration::from_millis(500);
const RETRY_BACKOFF: Duration = Duration::from_millis(20);

/// Client-side handle: retries `Get`/`PutAppend` against whichever replica
/// of the owning group answers, re-querying `CFG` whenever a group reports
/// it doesn't own the shard. Named `Clerk` after the classic
/// sharded-KV client pattern this crate follows, generalized from a single
/// static config to a live `CFG` handle.
pub struct Clerk {
    cfg: Arc<dyn Cfg>,
    client_id: i64,
    req_id: AtomicI64,
}

impl Clerk {
    pub fn new(cfg: Arc<dyn Cfg>) -> Self {
        Self {
            cfg,
            client_id: rand::thread_rng().gen(),
            req_id: AtomicI64::new(0),
        }
    }

    fn next_req_id(&self) -> i64 {
        self.req_id.fetch_add(1, Ordering::SeqCst)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, ShardKvError> {
        let req_id = self.next_req_id();
        let mut config = self.cfg.query(-1).await;
        loop {
            let shard = shard_of(key);
            let gid = config.shards[shard.0];
            if !gid.is_unowned() {
                if let Some(endpoints) = config.groups.get(&gid) {
                    for endpoint in endpoints {
                        let Ok(mut client) = connect(endpoint).await else {
                            continue;
                        };
                        let request = tonic::Request::new(GetRequest {
                            client_id: self.client_id,
                            req_id,
                            key: key.to_string(),
                        });
                        match tokio::time::timeout(RPC_TIMEOUT, client.get(request)).await {
                            Ok(Ok(resp)) => {
                                let reply = resp.into_inner();
                                if reply.wrong_leader {
                                    continue;
                                }
                                if reply.err == ErrorKind::WrongGroup as i32 {
                                    break;
                                }
                                if reply.err == ErrorKind::NoKey as i32 {
                                    return Ok(None);
                                }
                                return Ok(Some(reply.value));
                            }
                            _ => continue,
                        }
                    }
                }
            }
            tokio::time::sleep(RETRY_BACKOFF).await;
            config = self.refresh(config).await;
        }
    }

    pub async fn put(&self, key: &str, value: &str) -> Result<(), ShardKvError> {
        self.put_append(key, value, PutAppendKind::Put).await
    }

    pub async fn append(&self, key: &str, value: &str) -> Result<(), ShardKvError> {
        self.put_append(key, value, PutAppendKind::Append).await
    }

    async fn put_append(&self, key: &str, value: &str, kind: PutAppendKind) -> Result<(), ShardKvError> {
        let req_id = self.next_req_id();
        let op = match kind {
            PutAppendKind::Put => PutAppendOp::Put,
            PutAppendKind::Append => PutAppendOp::Append,
        };
        let mut config = self.cfg.query(-1).await;
        loop {
            let shard = shard_of(key);
            let gid = config.shards[shard.0];
            if !gid.is_unowned() {
                if let Some(endpoints) = config.groups.get(&gid) {
                    for endpoint in endpoints {
                        let Ok(mut client) = connect(endpoint).await else {
                            continue;
                        };
                        let request = tonic::Request::new(PutAppendRequest {
                            client_id: self.client_id,
                            req_id,
                            key: key.to_string(),
                            value: value.to_string(),
                            op: op as i32,
                        });
                        match tokio::time::timeout(RPC_TIMEOUT, client.put_append(request)).await {
                            Ok(Ok(resp)) => {
                                let reply = resp.into_inner();
                                if reply.wrong_leader {
                                    continue;
                                }
                                if reply.err == ErrorKind::WrongGroup as i32 {
                                    break;
                                }
                                return Ok(());
                            }
                            _ => continue,
                        }
                    }
                }
            }
            tokio::time::sleep(RETRY_BACKOFF).await;
            config = self.refresh(config).await;
        }
    }

    async fn refresh(&self, stale: Configuration) -> Configuration {
        let fresh = self.cfg.query(-1).await;
        if fresh.num > stale.num {
            fresh
        } else {
            stale
        }
    }
}

async fn connect(endpoint: &str) -> Result<KvStoreClient<Channel>, tonic::transport::Error> {
    KvStoreClient::connect(endpoint.to_string()).await
}

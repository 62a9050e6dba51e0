//! Wire form of `CFG`: a `tonic` service wrapping [`ConfigStore`] plus a
//! client that speaks it, so a group (or the `barq-cluster-admin` CLI) can
//! reach a shardmaster running in its own process.

use std::path::PathBuf;
use std::sync::Arc;

use barq_proto::shardkv::config_service_client::ConfigServiceClient;
use barq_proto::shardkv::config_service_server::{ConfigService, ConfigServiceServer};
use barq_proto::shardkv::{
    ConfigurationMessage, GroupEndpoints, JoinRequest, LeaveRequest, MoveRequest, QueryRequest,
};
use tokio::sync::Mutex;
use tonic::{transport::Channel, Request, Response, Status};

use crate::{Cfg, Configuration, ConfigStore, GroupId, ShardId, N_SHARDS};

pub fn configuration_to_proto(cfg: &Configuration) -> ConfigurationMessage {
    ConfigurationMessage {
        num: cfg.num,
        shards: cfg.shards.iter().map(|g| g.0).collect(),
        groups: cfg
            .groups
            .iter()
            .map(|(gid, endpoints)| {
                (
                    gid.0,
                    GroupEndpoints {
                        endpoints: endpoints.clone(),
                    },
                )
            })
            .collect(),
    }
}

pub fn configuration_from_proto(msg: ConfigurationMessage) -> Configuration {
    let mut shards = [GroupId::UNOWNED; N_SHARDS];
    for (i, gid) in msg.shards.into_iter().enumerate().take(N_SHARDS) {
        shards[i] = GroupId(gid);
    }
    Configuration {
        num: msg.num,
        shards,
        groups: msg
            .groups
            .into_iter()
            .map(|(gid, endpoints)| (GroupId(gid), endpoints.endpoints))
            .collect(),
    }
}

/// `tonic` server wrapping a shared, mutex-guarded [`ConfigStore`]. When
/// `persist_path` is set, every mutating RPC (`join`/`leave`/`move`)
/// persists the resulting history to that path after the in-memory store
/// is updated, the same `to_path` a process restart reads back via
/// [`ConfigStore::from_path`], so a shardmaster process can be killed and
/// restarted without losing its configuration history.
pub struct ConfigServiceImpl {
    pub store: Arc<Mutex<ConfigStore>>,
    pub persist_path: Option<PathBuf>,
}

impl ConfigServiceImpl {
    pub fn new(store: Arc<Mutex<ConfigStore>>) -> Self {
        Self { store, persist_path: None }
    }

    pub fn with_persistence(store: Arc<Mutex<ConfigStore>>, persist_path: PathBuf) -> Self {
        Self { store, persist_path: Some(persist_path) }
    }

    async fn persist(&self, guard: &ConfigStore) {
        if let Some(path) = &self.persist_path {
            if let Err(e) = guard.to_path(path) {
                tracing::warn!(error = %e, path = %path.display(), "failed to persist configuration history");
            }
        }
    }
}

#[tonic::async_trait]
impl ConfigService for ConfigServiceImpl {
    async fn query(
        &self,
        request: Request<QueryRequest>,
    ) -> Result<Response<ConfigurationMessage>, Status> {
        let num = request.into_inner().num;
        let cfg = self.store.lock().await.query(num);
        Ok(Response::new(configuration_to_proto(&cfg)))
    }

    async fn join(
        &self,
        request: Request<JoinRequest>,
    ) -> Result<Response<ConfigurationMessage>, Status> {
        let req = request.into_inner();
        let groups = req
            .groups
            .into_iter()
            .map(|(gid, endpoints)| (GroupId(gid), endpoints.endpoints))
            .collect();
        let mut guard = self.store.lock().await;
        let cfg = guard.join(groups);
        self.persist(&guard).await;
        Ok(Response::new(configuration_to_proto(&cfg)))
    }

    async fn leave(
        &self,
        request: Request<LeaveRequest>,
    ) -> Result<Response<ConfigurationMessage>, Status> {
        let gids: Vec<GroupId> = request.into_inner().gids.into_iter().map(GroupId).collect();
        let mut guard = self.store.lock().await;
        let cfg = guard.leave(&gids);
        self.persist(&guard).await;
        Ok(Response::new(configuration_to_proto(&cfg)))
    }

    async fn r#move(
        &self,
        request: Request<MoveRequest>,
    ) -> Result<Response<ConfigurationMessage>, Status> {
        let req = request.into_inner();
        let mut guard = self.store.lock().await;
        let cfg = guard
            .move_shard(ShardId(req.shard as usize), GroupId(req.gid))
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        self.persist(&guard).await;
        Ok(Response::new(configuration_to_proto(&cfg)))
    }
}

pub fn config_service_server(store: Arc<Mutex<ConfigStore>>) -> ConfigServiceServer<ConfigServiceImpl> {
    ConfigServiceServer::new(ConfigServiceImpl::new(store))
}

pub fn config_service_server_with_persistence(
    store: Arc<Mutex<ConfigStore>>,
    persist_path: PathBuf,
) -> ConfigServiceServer<ConfigServiceImpl> {
    ConfigServiceServer::new(ConfigServiceImpl::with_persistence(store, persist_path))
}

/// Client-side handle to a remote `CFG`, trying each endpoint in order.
#[derive(Clone)]
pub struct ConfigClient {
    endpoints: Vec<String>,
}

impl ConfigClient {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self { endpoints }
    }

    async fn connect(&self, endpoint: &str) -> Result<ConfigServiceClient<Channel>, tonic::transport::Error> {
        ConfigServiceClient::connect(endpoint.to_string()).await
    }
}

#[async_trait::async_trait]
impl Cfg for ConfigClient {
    async fn query(&self, num: i64) -> Configuration {
        for endpoint in &self.endpoints {
            let Ok(mut client) = self.connect(endpoint).await else {
                continue;
            };
            if let Ok(resp) = client.query(QueryRequest { num }).await {
                return configuration_from_proto(resp.into_inner());
            }
        }
        // Every shardmaster endpoint was unreachable; callers treat an
        // unchanged config.num as "no progress this tick" and retry later.
        Configuration::default()
    }
}

impl ConfigClient {
    /// Administrative mutators, tried against each known endpoint in order.
    /// Used by `barq-admin`'s HTTP surface and the `barq-cluster-admin` CLI
    /// when talking to a remote shardmaster rather than an in-process
    /// `ConfigStore`.
    pub async fn join(&self, groups: std::collections::HashMap<GroupId, Vec<String>>) -> Option<Configuration> {
        let req = JoinRequest {
            groups: groups
                .into_iter()
                .map(|(gid, endpoints)| (gid.0, GroupEndpoints { endpoints }))
                .collect(),
        };
        for endpoint in &self.endpoints {
            let Ok(mut client) = self.connect(endpoint).await else {
                continue;
            };
            if let Ok(resp) = client.join(req.clone()).await {
                return Some(configuration_from_proto(resp.into_inner()));
            }
        }
        None
    }

    pub async fn leave(&self, gids: Vec<GroupId>) -> Option<Configuration> {
        let req = LeaveRequest {
            gids: gids.iter().map(|g| g.0).collect(),
        };
        for endpoint in &self.endpoints {
            let Ok(mut client) = self.connect(endpoint).await else {
                continue;
            };
            if let Ok(resp) = client.leave(req.clone()).await {
                return Some(configuration_from_proto(resp.into_inner()));
            }
        }
        None
    }

    pub async fn move_shard(&self, shard: ShardId, gid: GroupId) -> Option<Configuration> {
        let req = MoveRequest {
            shard: shard.0 as u32,
            gid: gid.0,
        };
        for endpoint in &self.endpoints {
            let Ok(mut client) = self.connect(endpoint).await else {
                continue;
            };
            if let Ok(resp) = client.r#move(req.clone()).await {
                return Some(configuration_from_proto(resp.into_inner()));
            }
        }
        None
    }
}

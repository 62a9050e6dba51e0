use std::collections::HashMap;

use axum::{
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use barq_cluster::grpc::ConfigClient;
use barq_cluster::{Cfg, GroupId, ShardId};
use serde::{Deserialize, Serialize};

use crate::auth::{ApiAuth, ApiError, ApiPermission};

/// Shared handle for the `barq-admin` HTTP surface: talks to a remote `CFG`
/// (shardmaster) over its gRPC `ConfigService`, exactly as a group's
/// reconfiguration driver or a clerk would, just with administrative
/// mutators (`join`/`leave`/`move`) layered on top and gated by [`ApiAuth`].
#[derive(Clone)]
pub struct AdminState {
    pub cfg: ConfigClient,
    pub auth: ApiAuth,
}

pub fn admin_routes() -> Router<AdminState> {
    Router::new()
        .route("/health", get(health))
        .route("/admin/topology", get(admin_topology))
        .route("/admin/join", post(admin_join))
        .route("/admin/leave", post(admin_leave))
        .route("/admin/move", post(admin_move))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Serialize)]
struct TopologyResponse {
    num: u64,
    shards: Vec<u64>,
    groups: HashMap<u64, Vec<String>>,
}

async fn admin_topology(
    State(state): State<AdminState>,
    headers: HeaderMap,
) -> Result<Json<TopologyResponse>, ApiError> {
    state.auth.authenticate(&headers, ApiPermission::Read)?;
    let cfg = state.cfg.query(-1).await;
    Ok(Json(TopologyResponse {
        num: cfg.num,
        shards: cfg.shards.iter().map(|g| g.0).collect(),
        groups: cfg.groups.into_iter().map(|(g, eps)| (g.0, eps)).collect(),
    }))
}

#[derive(Deserialize)]
struct AdminJoinRequest {
    groups: HashMap<u64, Vec<String>>,
}

async fn admin_join(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Json(req): Json<AdminJoinRequest>,
) -> Result<Json<TopologyResponse>, ApiError> {
    state.auth.authenticate(&headers, ApiPermission::Mutate)?;
    let groups: HashMap<GroupId, Vec<String>> = req.groups.into_iter().map(|(g, eps)| (GroupId(g), eps)).collect();
    let cfg = state.cfg.join(groups).await.ok_or(ApiError::Unreachable)?;
    Ok(Json(TopologyResponse {
        num: cfg.num,
        shards: cfg.shards.iter().map(|g| g.0).collect(),
        groups: cfg.groups.into_iter().map(|(g, eps)| (g.0, eps)).collect(),
    }))
}

#[derive(Deserialize)]
struct AdminLeaveRequest {
    gids: Vec<u64>,
}

async fn admin_leave(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Json(req): Json<AdminLeaveRequest>,
) -> Result<Json<TopologyResponse>, ApiError> {
    state.auth.authenticate(&headers, ApiPermission::Mutate)?;
    let gids: Vec<GroupId> = req.gids.into_iter().map(GroupId).collect();
    let cfg = state.cfg.leave(gids).await.ok_or(ApiError::Unreachable)?;
    Ok(Json(TopologyResponse {
        num: cfg.num,
        shards: cfg.shards.iter().map(|g| g.0).collect(),
        groups: cfg.groups.into_iter().map(|(g, eps)| (g.0, eps)).collect(),
    }))
}

#[derive(Deserialize)]
struct AdminMoveRequest {
    shard: usize,
    gid: u64,
}

async fn admin_move(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Json(req): Json<AdminMoveRequest>,
) -> Result<Json<TopologyResponse>, ApiError> {
    state.auth.authenticate(&headers, ApiPermission::Admin)?;
    let cfg = state
        .cfg
        .move_shard(ShardId(req.shard), GroupId(req.gid))
        .await
        .ok_or(ApiError::Unreachable)?;
    Ok(Json(TopologyResponse {
        num: cfg.num,
        shards: cfg.shards.iter().map(|g| g.0).collect(),
        groups: cfg.groups.into_iter().map(|(g, eps)| (g.0, eps)).collect(),
    }))
}

//! HTTP administrative surface for the `CFG` shardmaster: topology queries
//! plus `join`/`leave`/`move` mutators, gated by role-based auth. A thin
//! layer over `barq_cluster::grpc::ConfigClient`. All actual state lives
//! in the shardmaster's `ConfigStore`, reached here over gRPC exactly as a
//! group's reconfiguration driver reaches it.

pub mod admin;
pub mod auth;

//! Generated `tonic`/`prost` types for the sharded KV store's three RPC
//! surfaces: the client-facing `KvStore` service, the inter-group
//! `ShardTransfer` service, and `ConfigService` (the wire form of `CFG`).

pub mod shardkv {
    tonic::include_proto!("shardkv");
}

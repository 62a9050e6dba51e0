//! End-to-end tests driving real `tonic` servers over loopback sockets:
//! a client talks to `KvStore`/`ShardTransfer`/`ConfigService` exactly as
//! a deployed clerk or peer group would.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use barq_cluster::grpc::{config_service_server, ConfigClient};
use barq_cluster::{Cfg, ConfigStore, GroupId};
use barq_shardkv::clerk::Clerk;
use barq_shardkv::persister::InMemoryPersister;
use barq_shardkv::server::GroupServer;
use tokio::sync::Mutex;
use tonic::transport::Server;

fn ephemeral_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local_addr")
}

async fn spawn_config_service(store: ConfigStore) -> (SocketAddr, Arc<Mutex<ConfigStore>>) {
    let store = Arc::new(Mutex::new(store));
    let addr = ephemeral_addr();
    let service = config_service_server(store.clone());
    tokio::spawn(async move {
        Server::builder()
            .add_service(service)
            .serve(addr)
            .await
            .expect("config service exited");
    });
    wait_for_port(addr).await;
    (addr, store)
}

async fn spawn_group(gid: u64, cfg_endpoint: &str) -> (SocketAddr, GroupServer) {
    let addr = ephemeral_addr();
    let cfg: Arc<dyn Cfg> = Arc::new(ConfigClient::new(vec![cfg_endpoint.to_string()]));
    let persister = Arc::new(InMemoryPersister::new());
    let server = GroupServer::serve(GroupId(gid), addr, cfg, persister, -1)
        .await
        .expect("group server failed to start");
    wait_for_port(addr).await;
    (addr, server)
}

/// `tonic`'s server task needs a scheduling tick before its listener is
/// actually accepting connections; give it a few short retries rather than
/// a single guessed sleep.
async fn wait_for_port(addr: SocketAddr) {
    for _ in 0..50 {
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("nothing ever listened on {addr}");
}

fn endpoint(addr: SocketAddr) -> String {
    format!("http://{addr}")
}

#[tokio::test]
async fn single_group_put_append_get_round_trips() {
    let mut store = ConfigStore::new();
    let mut groups = HashMap::new();
    groups.insert(GroupId(1), vec![]);
    store.join(groups);
    let (cfg_addr, cfg_store) = spawn_config_service(store).await;

    let (group_addr, _group) = spawn_group(1, &endpoint(cfg_addr)).await;
    {
        let mut guard = cfg_store.lock().await;
        let mut groups = HashMap::new();
        groups.insert(GroupId(1), vec![endpoint(group_addr)]);
        guard.join(groups);
    }

    let cfg: Arc<dyn Cfg> = Arc::new(ConfigClient::new(vec![endpoint(cfg_addr)]));
    let clerk = Clerk::new(cfg);

    clerk.put("alpha", "1").await.unwrap();
    clerk.append("alpha", "2").await.unwrap();
    let value = clerk.get("alpha").await.unwrap();
    assert_eq!(value, Some("12".to_string()));

    let missing = clerk.get("never-set").await.unwrap();
    assert_eq!(missing, None);
}

#[tokio::test]
async fn join_migrates_owned_shards_to_the_new_group() {
    let mut store = ConfigStore::new();
    let mut groups = HashMap::new();
    groups.insert(GroupId(1), vec![]);
    store.join(groups);
    let (cfg_addr, cfg_store) = spawn_config_service(store).await;

    let (group1_addr, _group1) = spawn_group(1, &endpoint(cfg_addr)).await;
    {
        let mut guard = cfg_store.lock().await;
        let mut groups = HashMap::new();
        groups.insert(GroupId(1), vec![endpoint(group1_addr)]);
        guard.join(groups);
    }

    let cfg: Arc<dyn Cfg> = Arc::new(ConfigClient::new(vec![endpoint(cfg_addr)]));
    let clerk = Clerk::new(cfg.clone());

    let keys: Vec<String> = (0..40).map(|i| format!("key-{i}")).collect();
    for (i, key) in keys.iter().enumerate() {
        clerk.put(key, &i.to_string()).await.unwrap();
    }

    let (group2_addr, _group2) = spawn_group(2, &endpoint(cfg_addr)).await;
    {
        let mut guard = cfg_store.lock().await;
        let mut groups = HashMap::new();
        groups.insert(GroupId(2), vec![endpoint(group2_addr)]);
        guard.join(groups);
    }

    // Give both replicas' 100ms reconfiguration drivers a few ticks to
    // converge on the new configuration and migrate shards.
    tokio::time::sleep(Duration::from_millis(1500)).await;

    for (i, key) in keys.iter().enumerate() {
        let value = clerk.get(key).await.unwrap();
        assert_eq!(value, Some(i.to_string()), "key {key} lost or corrupted across migration");
    }
}

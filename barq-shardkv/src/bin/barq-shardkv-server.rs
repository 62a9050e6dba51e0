use std::net::SocketAddr;
use std::sync::Arc;

use barq_cluster::grpc::ConfigClient;
use barq_cluster::{Cfg, GroupId};
use barq_shardkv::persister::InMemoryPersister;
use barq_shardkv::server::GroupServer;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "barq-shardkv-server", about = "Barq sharded KV replica group server")]
struct Cli {
    /// gRPC listening address for `KvStore` and `ShardTransfer`.
    #[arg(long, env = "BARQ_SHARDKV_ADDR", default_value = "0.0.0.0:50051")]
    addr: SocketAddr,

    /// This replica's group id.
    #[arg(long, env = "BARQ_SHARDKV_GID")]
    gid: u64,

    /// Comma-separated `CFG` (shardmaster) endpoints, tried in order.
    #[arg(long, env = "BARQ_SHARDMASTER_ENDPOINTS", value_delimiter = ',')]
    shardmaster_endpoints: Vec<String>,

    /// Snapshot once `LOG`'s persisted size exceeds this many bytes; -1 disables snapshotting.
    #[arg(long, env = "BARQ_SHARDKV_MAX_RAFT_STATE", default_value_t = -1)]
    max_raft_state: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_observability();

    let cli = Cli::parse();
    info!(gid = cli.gid, addr = %cli.addr, "starting barq-shardkv-server");

    let cfg: Arc<dyn Cfg> = Arc::new(ConfigClient::new(cli.shardmaster_endpoints));
    let persister = Arc::new(InMemoryPersister::new());

    let server = GroupServer::serve(GroupId(cli.gid), cli.addr, cfg, persister, cli.max_raft_state).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    server.kill();

    Ok(())
}

fn init_observability() {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .json();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,barq_shardkv=debug,barq_cluster=debug".into());

    tracing_subscriber::registry().with(fmt_layer).with(env_filter).init();
}

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use barq_cluster::grpc::config_service_server_with_persistence;
use barq_cluster::ConfigStore;
use clap::Parser;
use tokio::sync::Mutex;
use tonic::transport::Server;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Runs `CFG` as a standalone gRPC process: the `ConfigService` every
/// group's reconfiguration driver and every clerk queries, and that
/// `barq-admin`/`barq-cluster-admin` mutate via `join`/`leave`/`move`.
#[derive(Parser, Debug)]
#[command(name = "barq-shardmaster-server", about = "Barq CFG (shardmaster) server")]
struct Cli {
    #[arg(long, env = "BARQ_SHARDMASTER_ADDR", default_value = "0.0.0.0:50050")]
    addr: SocketAddr,

    /// Configuration-history file. Loaded on startup if present; every
    /// join/leave/move persists the updated history back here.
    #[arg(long, env = "BARQ_SHARDMASTER_STORE", default_value = "shardmaster-configs.json")]
    store: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_observability();

    let cli = Cli::parse();
    let store = ConfigStore::from_path(&cli.store).unwrap_or_default();
    info!(addr = %cli.addr, store = %cli.store.display(), latest_num = store.latest().num, "starting barq-shardmaster-server");

    let store = Arc::new(Mutex::new(store));
    let service = config_service_server_with_persistence(store, cli.store.clone());

    Server::builder().add_service(service).serve(cli.addr).await?;
    Ok(())
}

fn init_observability() {
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false).json();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,barq_cluster=debug".into());
    tracing_subscriber::registry().with(fmt_layer).with(env_filter).init();
}

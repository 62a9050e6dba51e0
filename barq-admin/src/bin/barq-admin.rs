use std::collections::HashMap;
use std::net::SocketAddr;

use axum::Router;
use barq_admin::admin::{admin_routes, AdminState};
use barq_admin::auth::{ApiAuth, ApiRole};
use barq_cluster::grpc::ConfigClient;
use clap::{Parser, Subcommand};
use serde_json::json;

#[derive(Debug, Parser)]
#[command(name = "barq-admin", about = "Admin HTTP surface / CLI for the shardmaster")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the admin HTTP server, proxying to a remote shardmaster's `CFG`.
    Serve {
        #[arg(long, env = "BARQ_ADMIN_ADDR", default_value = "0.0.0.0:8080")]
        addr: SocketAddr,
        #[arg(long, env = "BARQ_SHARDMASTER_ENDPOINTS", value_delimiter = ',')]
        shardmaster_endpoints: Vec<String>,
        /// Static `key=role` pairs (role one of admin/ops/reader), repeatable.
        #[arg(long = "api-key", value_parser = parse_api_key)]
        api_keys: Vec<(String, ApiRole)>,
    },
    /// Check the admin server's health.
    Health {
        #[arg(long, env = "BARQ_ADMIN_ENDPOINT", default_value = "http://localhost:8080")]
        endpoint: String,
    },
    /// Print current shard topology.
    Topology {
        #[arg(long, env = "BARQ_ADMIN_ENDPOINT", default_value = "http://localhost:8080")]
        endpoint: String,
        #[arg(long, env = "BARQ_ADMIN_API_KEY")]
        api_key: Option<String>,
    },
    /// Add groups and rebalance shards across the new group set.
    Join {
        #[arg(long, env = "BARQ_ADMIN_ENDPOINT", default_value = "http://localhost:8080")]
        endpoint: String,
        #[arg(long, env = "BARQ_ADMIN_API_KEY")]
        api_key: Option<String>,
        #[arg(long = "group", value_parser = parse_group)]
        groups: Vec<(u64, Vec<String>)>,
    },
    /// Remove groups and redistribute their shards.
    Leave {
        #[arg(long, env = "BARQ_ADMIN_ENDPOINT", default_value = "http://localhost:8080")]
        endpoint: String,
        #[arg(long, env = "BARQ_ADMIN_API_KEY")]
        api_key: Option<String>,
        #[arg(long = "gid")]
        gids: Vec<u64>,
    },
    /// Pin a single shard to a group.
    Move {
        #[arg(long, env = "BARQ_ADMIN_ENDPOINT", default_value = "http://localhost:8080")]
        endpoint: String,
        #[arg(long, env = "BARQ_ADMIN_API_KEY")]
        api_key: Option<String>,
        #[arg(long)]
        shard: usize,
        #[arg(long)]
        gid: u64,
    },
}

fn parse_group(s: &str) -> Result<(u64, Vec<String>), String> {
    let (gid, endpoints) = s.split_once('=').ok_or_else(|| "expected gid=addr1,addr2,...".to_string())?;
    let gid: u64 = gid.parse().map_err(|e| format!("invalid gid: {e}"))?;
    Ok((gid, endpoints.split(',').map(str::to_string).collect()))
}

fn parse_api_key(s: &str) -> Result<(String, ApiRole), String> {
    let (key, role) = s.split_once('=').ok_or_else(|| "expected key=role".to_string())?;
    let role = match role {
        "admin" => ApiRole::Admin,
        "ops" => ApiRole::Ops,
        "reader" => ApiRole::Reader,
        other => return Err(format!("unknown role: {other}")),
    };
    Ok((key.to_string(), role))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            addr,
            shardmaster_endpoints,
            api_keys,
        } => serve(addr, shardmaster_endpoints, api_keys).await,
        Commands::Health { endpoint } => {
            let client = reqwest::Client::new();
            let resp = client.get(format!("{}/health", endpoint.trim_end_matches('/'))).send().await?;
            println!("Status: {}", resp.status());
            println!("{}", resp.text().await?);
            Ok(())
        }
        Commands::Topology { endpoint, api_key } => {
            let client = reqwest::Client::new();
            let mut req = client.get(format!("{}/admin/topology", endpoint.trim_end_matches('/')));
            if let Some(key) = &api_key {
                req = req.header("x-api-key", key);
            }
            let resp = req.send().await?;
            println!("{}", resp.text().await?);
            Ok(())
        }
        Commands::Join { endpoint, api_key, groups } => {
            let body = json!({ "groups": groups.into_iter().collect::<HashMap<_, _>>() });
            post(&endpoint, "/admin/join", api_key, &body).await
        }
        Commands::Leave { endpoint, api_key, gids } => {
            let body = json!({ "gids": gids });
            post(&endpoint, "/admin/leave", api_key, &body).await
        }
        Commands::Move { endpoint, api_key, shard, gid } => {
            let body = json!({ "shard": shard, "gid": gid });
            post(&endpoint, "/admin/move", api_key, &body).await
        }
    }
}

async fn post(endpoint: &str, path: &str, api_key: Option<String>, body: &serde_json::Value) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let mut req = client.post(format!("{}{}", endpoint.trim_end_matches('/'), path)).json(body);
    if let Some(key) = &api_key {
        req = req.header("x-api-key", key);
    }
    let resp = req.send().await?;
    println!("Response: {}", resp.status());
    println!("{}", resp.text().await?);
    Ok(())
}

async fn serve(addr: SocketAddr, shardmaster_endpoints: Vec<String>, api_keys: Vec<(String, ApiRole)>) -> anyhow::Result<()> {
    init_observability();

    let auth = if api_keys.is_empty() {
        ApiAuth::new()
    } else {
        let auth = ApiAuth::new().require_keys();
        for (key, role) in api_keys {
            auth.insert(key, role);
        }
        auth
    };

    let state = AdminState {
        cfg: ConfigClient::new(shardmaster_endpoints),
        auth,
    };

    let app: Router = admin_routes().with_state(state);
    tracing::info!(%addr, "starting barq-admin HTTP surface");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_observability() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false).json();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry().with(fmt_layer).with(env_filter).init();
}

use std::collections::HashMap;
use std::path::PathBuf;

use barq_cluster::{ConfigStore, GroupId, ShardId};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "barq-cluster-admin", about = "Admin CLI for the shardmaster (CFG) configuration store")]
struct Cli {
    /// Path to the configuration-history file (JSON)
    #[arg(long, global = true, default_value = "cluster-configs.json")]
    store: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the current (or a historical) configuration
    Query {
        /// Config number; -1 (default) for the latest
        #[arg(long, default_value_t = -1)]
        num: i64,
    },
    /// Add one or more groups and rebalance shards across the new group set
    Join {
        /// gid=addr1,addr2 (repeatable)
        #[arg(long = "group", value_parser = parse_group)]
        groups: Vec<(GroupId, Vec<String>)>,
    },
    /// Remove groups and redistribute their shards
    Leave {
        #[arg(long = "gid")]
        gids: Vec<u64>,
    },
    /// Pin a single shard to a group
    Move {
        #[arg(long)]
        shard: usize,
        #[arg(long)]
        gid: u64,
    },
}

fn parse_group(s: &str) -> Result<(GroupId, Vec<String>), String> {
    let (gid, endpoints) = s
        .split_once('=')
        .ok_or_else(|| "expected gid=addr1,addr2,...".to_string())?;
    let gid: u64 = gid.parse().map_err(|e| format!("invalid gid: {e}"))?;
    let endpoints = endpoints.split(',').map(str::to_string).collect();
    Ok((GroupId(gid), endpoints))
}

fn load_or_new(path: &PathBuf) -> ConfigStore {
    ConfigStore::from_path(path).unwrap_or_default()
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut store = load_or_new(&cli.store);

    let cfg = match cli.command {
        Commands::Query { num } => store.query(num),
        Commands::Join { groups } => {
            let map: HashMap<GroupId, Vec<String>> = groups.into_iter().collect();
            let cfg = store.join(map);
            store.to_path(&cli.store)?;
            cfg
        }
        Commands::Leave { gids } => {
            let gids: Vec<GroupId> = gids.into_iter().map(GroupId).collect();
            let cfg = store.leave(&gids);
            store.to_path(&cli.store)?;
            cfg
        }
        Commands::Move { shard, gid } => {
            let cfg = store.move_shard(ShardId(shard), GroupId(gid))?;
            store.to_path(&cli.store)?;
            cfg
        }
    };

    println!("config #{}", cfg.num);
    for (i, gid) in cfg.shards.iter().enumerate() {
        println!("  shard {i:>2} -> group {}", gid.0);
    }
    for (gid, endpoints) in &cfg.groups {
        println!("  group {} endpoints: {:?}", gid.0, endpoints);
    }

    Ok(())
}

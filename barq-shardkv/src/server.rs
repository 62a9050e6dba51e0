use std::sync::Arc;

use barq_cluster::{Cfg, GroupId};
use barq_proto::shardkv::kv_store_server::KvStoreServer;
use barq_proto::shardkv::shard_transfer_server::ShardTransferServer;
use tokio::sync::{watch, Mutex};
use tonic::transport::Server;

use crate::applier::run_applier;
use crate::frontend::FrontEnd;
use crate::log::{InMemoryLog, Log};
use crate::persister::Persister;
use crate::pending::PendingRegistry;
use crate::reconfig::ReconfigDriver;
use crate::state::GroupState;
use crate::transfer::TransferService;

/// Bootstraps one replica of one group: wires `LOG`, the Applier task, the
/// reconfiguration driver task, and the `tonic` server exposing `KvStore`
/// and `ShardTransfer` on `listen_addr`. Generalized from a fixed peer list
/// plus Raft persister to
/// this crate's `Log`/`Cfg`/`Persister` traits.
pub struct GroupServer {
    shutdown_tx: watch::Sender<bool>,
}

impl GroupServer {
    pub async fn serve(
        gid: GroupId,
        listen_addr: std::net::SocketAddr,
        cfg: Arc<dyn Cfg>,
        persister: Arc<dyn Persister>,
        max_raft_state: i64,
    ) -> Result<Self, tonic::transport::Error> {
        let (log, rx) = InMemoryLog::new();
        let log: Arc<dyn Log> = log;

        let mut state = GroupState::new(gid);
        if let Some(bytes) = persister.load_snapshot() {
            let snap = crate::snapshot::decode(&bytes);
            state.current_config = snap.current_config;
            state.store = snap.shard_store;
            state.ack = snap.ack_table;
            tracing::info!(gid = gid.0, "restored state from snapshot");
        }
        let state = Arc::new(Mutex::new(state));
        let pending = Arc::new(PendingRegistry::new());

        tokio::spawn(run_applier(
            state.clone(),
            rx,
            pending.clone(),
            log.clone(),
            persister.clone(),
            max_raft_state,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let driver = Arc::new(ReconfigDriver {
            gid,
            state: state.clone(),
            log: log.clone(),
            pending: pending.clone(),
            cfg,
        });
        tokio::spawn(driver.run(shutdown_rx.clone()));

        let front_end = FrontEnd {
            gid,
            state: state.clone(),
            log: log.clone(),
            pending: pending.clone(),
        };
        let transfer_service = TransferService {
            gid,
            state: state.clone(),
            log: log.clone(),
            pending: pending.clone(),
        };

        let mut shutdown_rx_for_serve = shutdown_rx;
        tokio::spawn(async move {
            let result = Server::builder()
                .add_service(KvStoreServer::new(front_end))
                .add_service(ShardTransferServer::new(transfer_service))
                .serve_with_shutdown(listen_addr, async move {
                    let _ = shutdown_rx_for_serve.changed().await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "gRPC server exited with an error");
            }
        });

        Ok(Self { shutdown_tx })
    }

    /// Stop the Applier, reconfiguration driver, and gRPC server. Analogous
    /// to stopping a replica process.
    pub fn kill(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

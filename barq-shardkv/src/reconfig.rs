use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use barq_cluster::{Cfg, GroupId, N_SHARDS};
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;

use crate::frontend::CLIENT_TIMEOUT;
use crate::log::Log;
use crate::op::{Echo, Op, ReconfigArgs};
use crate::pending::PendingRegistry;
use crate::state::GroupState;
use crate::transfer::{notify_shards, pull_shards, transfer_op};

/// How often the driver checks the shardmaster for a newer configuration
/// when this replica believes it is the leader (a fixed 100ms poll).
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bounded attempts to get a single `RECONFIG` (or `TRANSFER`) committed
/// before giving up on this tick and retrying on the next one.
const MAX_PROPOSE_ATTEMPTS: usize = 3;

/// Drives reconfiguration for one group: on the leader replica only,
/// steps through configs one at a time (never skipping one), pulling each
/// newly-owned shard from its prior owner before
/// proposing the merged `RECONFIG`, then notifying every other group of
/// the shards this group now holds.
pub struct ReconfigDriver {
    pub gid: GroupId,
    pub state: Arc<Mutex<GroupState>>,
    pub log: Arc<dyn Log>,
    pub pending: Arc<PendingRegistry>,
    pub cfg: Arc<dyn Cfg>,
}

impl ReconfigDriver {
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.log.get_state().1 {
                        self.poll_once().await;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn poll_once(&self) {
        let latest = self.cfg.query(-1).await;
        loop {
            let current_num = self.state.lock().await.current_config.num;
            if current_num >= latest.num {
                return;
            }
            let next = self.cfg.query((current_num + 1) as i64).await;
            if next.num != current_num + 1 {
                // shardmaster hasn't produced the next config yet.
                return;
            }
            if !self.advance_to(next).await {
                return;
            }
        }
    }

    /// Pull every newly-owned shard, commit the merged `RECONFIG`, then
    /// notify peers. Returns `false` on any step's failure so the caller
    /// stops and retries the whole sequence on the next tick.
    async fn advance_to(&self, next: barq_cluster::Configuration) -> bool {
        let prior = self.state.lock().await.current_config.clone();

        let mut pull_sets: HashMap<GroupId, Vec<usize>> = HashMap::new();
        for i in 0..N_SHARDS {
            if prior.shards[i] != self.gid && next.shards[i] == self.gid {
                let owner = prior.shards[i];
                if !owner.is_unowned() {
                    pull_sets.entry(owner).or_default().push(i);
                }
            }
        }

        let mut pulled_shards: Box<[HashMap<String, String>; N_SHARDS]> =
            Box::new(std::array::from_fn(|_| HashMap::new()));
        let mut pulled_ack: HashMap<i64, i64> = HashMap::new();

        for (owner, shard_ids) in pull_sets {
            let endpoints = prior.groups.get(&owner).cloned().unwrap_or_default();
            let Some(reply) = pull_shards(&endpoints, next.num, &shard_ids).await else {
                tracing::debug!(gid = owner.0, "shard pull failed, retrying next tick");
                return false;
            };
            let (op, _echo) = transfer_op(reply.clone(), shard_ids.clone());
            // Best-effort record of the pull; correctness rests entirely on
            // the RECONFIG committed below.
            let _ = self.log.start(op).await;

            for &i in &shard_ids {
                if let Some(data) = reply.shards.get(i) {
                    pulled_shards[i] = data.entries.clone();
                }
            }
            for (&client_id, &req_id) in &reply.ack {
                let entry = pulled_ack.entry(client_id).or_insert(req_id);
                if req_id > *entry {
                    *entry = req_id;
                }
            }
        }

        if !self.commit_reconfig(next.clone(), pulled_shards, pulled_ack).await {
            return false;
        }

        self.broadcast_notify(&next).await;
        true
    }

    async fn commit_reconfig(
        &self,
        new_config: barq_cluster::Configuration,
        pulled_shards: Box<[HashMap<String, String>; N_SHARDS]>,
        pulled_ack: HashMap<i64, i64>,
    ) -> bool {
        let args = ReconfigArgs {
            new_config: new_config.clone(),
            pulled_shards,
            pulled_ack,
        };
        let echo = Echo::Reconfig { num: new_config.num };
        for _ in 0..MAX_PROPOSE_ATTEMPTS {
            if !self.log.get_state().1 {
                return false;
            }
            let Some((index, _)) = self.log.start(Op::Reconfig(args.clone())).await else {
                continue;
            };
            match timeout(CLIENT_TIMEOUT, self.pending.wait(index)).await {
                Ok(Some(result)) if result.echo == echo => return true,
                _ => continue,
            }
        }
        false
    }

    async fn broadcast_notify(&self, new_config: &barq_cluster::Configuration) {
        // Tell every other group which shards we now own in `new_config` so
        // each can drop them locally. We must not submit a NOTIFY op through
        // our own log here: that would instruct this replica's own Applier
        // to clear the very shards we just pulled and installed via
        // RECONFIG. Each recipient submits its own NOTIFY op against its own
        // log when the RPC arrives, in `TransferService::transfer_notify`.
        let shards: Vec<usize> = (0..N_SHARDS).filter(|&i| new_config.shards[i] == self.gid).collect();
        let shards_u32: Vec<u32> = shards.iter().map(|&i| i as u32).collect();
        let mut tasks = Vec::new();
        for (&gid, endpoints) in &new_config.groups {
            if gid == self.gid {
                continue;
            }
            let endpoints = endpoints.clone();
            let shards_u32 = shards_u32.clone();
            let config_num = new_config.num;
            tasks.push(tokio::spawn(async move {
                notify_shards(&endpoints, config_num, shards_u32).await;
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
    }
}

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::mpsc;

use crate::op::Op;

/// What `LOG` hands the Applier on each delivery: a committed command at a
/// given index, or an instruction to restore from a snapshot.
#[derive(Debug)]
pub enum LogMsg {
    Command { index: u64, op: Op },
    Snapshot { bytes: Vec<u8> },
}

/// The consensus log, named only by its interface. A real deployment fills
/// this with Raft. `start` mirrors `rf.Start(cmd)`: `None` means "not
/// leader", `Some((index, term))` means the command was appended and will
/// eventually be delivered, if this node is still leader when its turn
/// comes. No guarantee beyond that.
#[async_trait::async_trait]
pub trait Log: Send + Sync {
    async fn start(&self, op: Op) -> Option<(u64, u64)>;
    fn get_state(&self) -> (u64, bool);
    async fn take_snapshot(&self, bytes: Vec<u8>, index: u64);
    fn persist_size(&self) -> usize;
}

/// Single-node, always-leader reference `LOG`. Sufficient to exercise the
/// Applier, front-end, and reconfiguration driver end-to-end (and to run a
/// single-replica deployment); provides none of Raft's crash/partition
/// tolerance.
pub struct InMemoryLog {
    next_index: AtomicU64,
    term: AtomicU64,
    persist_size: AtomicUsize,
    tx: StdMutex<mpsc::UnboundedSender<LogMsg>>,
    leader: std::sync::atomic::AtomicBool,
}

impl InMemoryLog {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<LogMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                next_index: AtomicU64::new(1),
                term: AtomicU64::new(1),
                persist_size: AtomicUsize::new(0),
                tx: StdMutex::new(tx),
                leader: std::sync::atomic::AtomicBool::new(true),
            }),
            rx,
        )
    }

    /// Flip this node's leadership state, bumping the term on every
    /// transition. Test-only hook letting a single-process test simulate
    /// "leader lost mid-operation" without a
    /// real multi-replica Raft election.
    pub fn set_leader(&self, is_leader: bool) {
        self.leader.store(is_leader, Ordering::SeqCst);
        self.term.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Log for InMemoryLog {
    async fn start(&self, op: Op) -> Option<(u64, u64)> {
        if !self.leader.load(Ordering::SeqCst) {
            return None;
        }
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let term = self.term.load(Ordering::SeqCst);
        let size = bincode::serialized_size(&op).unwrap_or(0) as usize;
        self.persist_size.fetch_add(size, Ordering::Relaxed);
        let sender = self.tx.lock().expect("log sender mutex poisoned").clone();
        // A real Raft log would only deliver once a majority has
        // persisted the entry; the in-memory stand-in commits immediately
        // since there's exactly one replica to agree with.
        let _ = sender.send(LogMsg::Command { index, op });
        Some((index, term))
    }

    fn get_state(&self) -> (u64, bool) {
        (self.term.load(Ordering::SeqCst), self.leader.load(Ordering::SeqCst))
    }

    async fn take_snapshot(&self, bytes: Vec<u8>, _index: u64) {
        self.persist_size.store(bytes.len(), Ordering::Relaxed);
    }

    fn persist_size(&self) -> usize {
        self.persist_size.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::GetArgs;

    #[tokio::test]
    async fn start_assigns_increasing_indices() {
        let (log, mut rx) = InMemoryLog::new();
        let (i1, _) = log
            .start(Op::Get(GetArgs {
                client_id: 1,
                req_id: 1,
                key: "a".into(),
            }))
            .await
            .unwrap();
        let (i2, _) = log
            .start(Op::Get(GetArgs {
                client_id: 1,
                req_id: 2,
                key: "b".into(),
            }))
            .await
            .unwrap();
        assert!(i2 > i1);

        match rx.recv().await.unwrap() {
            LogMsg::Command { index, .. } => assert_eq!(index, i1),
            LogMsg::Snapshot { .. } => panic!("expected a command"),
        }
    }

    #[tokio::test]
    async fn persist_size_grows_with_commands() {
        let (log, _rx) = InMemoryLog::new();
        assert_eq!(log.persist_size(), 0);
        log.start(Op::Get(GetArgs {
            client_id: 1,
            req_id: 1,
            key: "a".into(),
        }))
        .await;
        assert!(log.persist_size() > 0);
    }

    #[tokio::test]
    async fn take_snapshot_resets_persist_size() {
        let (log, _rx) = InMemoryLog::new();
        for i in 0..5 {
            log.start(Op::Get(GetArgs {
                client_id: 1,
                req_id: i,
                key: "a".into(),
            }))
            .await;
        }
        log.take_snapshot(vec![0u8; 3], 5).await;
        assert_eq!(log.persist_size(), 3);
    }
}

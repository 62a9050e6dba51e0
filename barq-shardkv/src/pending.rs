use std::collections::HashMap;

use tokio::sync::{oneshot, Mutex};

use crate::op::AppliedResult;

enum Slot {
    Waiting(oneshot::Sender<AppliedResult>),
    Ready(AppliedResult),
}

/// Index-keyed, single-capacity rendezvous between the Applier and a
/// front-end waiter. Whichever of {waiter, Applier} calls
/// in first creates the slot; the other side's call completes it. Removed
/// after exactly one delivery. No slot is ever shared between two distinct
/// logical waiters for the same index, since leadership changes make the
/// old waiter's echoed-args check reject any stale delivery it might
/// otherwise see.
#[derive(Default)]
pub struct PendingRegistry {
    slots: Mutex<HashMap<u64, Slot>>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `index`'s result arrives, or resolve immediately if the
    /// Applier already delivered it. Callers wrap this in a timeout.
    /// `PendingRegistry` itself never times out.
    pub async fn wait(&self, index: u64) -> Option<AppliedResult> {
        let rx = {
            let mut slots = self.slots.lock().await;
            match slots.remove(&index) {
                Some(Slot::Ready(result)) => return Some(result),
                Some(Slot::Waiting(tx)) => {
                    // Another waiter is already registered for this index.
                    // Shouldn't happen in practice, indices are unique per
                    // proposal, but keep the rendezvous well-defined.
                    drop(tx);
                    let (tx, rx) = oneshot::channel();
                    slots.insert(index, Slot::Waiting(tx));
                    rx
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    slots.insert(index, Slot::Waiting(tx));
                    rx
                }
            }
        };
        rx.await.ok()
    }

    /// Called by the Applier after it applies the command at `index`.
    /// Drains (and discards) any stale value so a slow/abandoned waiter
    /// never blocks delivery.
    pub async fn deliver(&self, index: u64, result: AppliedResult) {
        let mut slots = self.slots.lock().await;
        match slots.remove(&index) {
            Some(Slot::Waiting(tx)) => {
                let _ = tx.send(result);
            }
            _ => {
                slots.insert(index, Slot::Ready(result));
            }
        }
    }

    /// Discard every pending slot. Called after a snapshot install: all
    /// pre-snapshot waiters time out and their clients retry.
    pub async fn clear(&self) {
        self.slots.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{Echo, ResultPayload};
    use std::sync::Arc;

    fn sample(index_marker: i64) -> AppliedResult {
        AppliedResult {
            echo: Echo::Client {
                client_id: 1,
                req_id: index_marker,
            },
            payload: ResultPayload::Get {
                err: None,
                value: "v".into(),
            },
        }
    }

    #[tokio::test]
    async fn waiter_first_then_deliver() {
        let registry = Arc::new(PendingRegistry::new());
        let wait = tokio::spawn({
            let registry = registry.clone();
            async move { registry.wait(1).await }
        });
        tokio::task::yield_now().await;
        registry.deliver(1, sample(42)).await;
        let result = wait.await.unwrap().unwrap();
        match result.echo {
            Echo::Client { req_id, .. } => assert_eq!(req_id, 42),
            _ => panic!("wrong echo"),
        }
    }

    #[tokio::test]
    async fn deliver_first_then_waiter() {
        let registry = PendingRegistry::new();
        registry.deliver(5, sample(7)).await;
        let result = registry.wait(5).await.unwrap();
        match result.echo {
            Echo::Client { req_id, .. } => assert_eq!(req_id, 7),
            _ => panic!("wrong echo"),
        }
    }

    #[tokio::test]
    async fn clear_drops_pending_slots() {
        let registry = PendingRegistry::new();
        registry.deliver(9, sample(1)).await;
        registry.clear().await;
        // The slot is gone; a fresh wait would block forever, so we just
        // check the internal map emptied out via a non-blocking re-deliver
        // + immediate resolve (proves no stale Ready value survived).
        registry.deliver(9, sample(2)).await;
        let result = registry.wait(9).await.unwrap();
        match result.echo {
            Echo::Client { req_id, .. } => assert_eq!(req_id, 2),
            _ => panic!("wrong echo"),
        }
    }
}

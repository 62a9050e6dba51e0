use std::sync::Mutex;

/// Raw-byte persistence, named only by its interface. A production
/// deployment would back this with disk or object storage. This crate owns
/// the snapshot codec (what the bytes mean), not the durable medium they're
/// written to. The in-memory stand-in exists so the Applier and server
/// bootstrap have something to call.
pub trait Persister: Send + Sync {
    fn save_snapshot(&self, bytes: Vec<u8>);
    fn load_snapshot(&self) -> Option<Vec<u8>>;
}

#[derive(Default)]
pub struct InMemoryPersister {
    snapshot: Mutex<Option<Vec<u8>>>,
}

impl InMemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persister for InMemoryPersister {
    fn save_snapshot(&self, bytes: Vec<u8>) {
        *self.snapshot.lock().expect("persister mutex poisoned") = Some(bytes);
    }

    fn load_snapshot(&self) -> Option<Vec<u8>> {
        self.snapshot.lock().expect("persister mutex poisoned").clone()
    }
}

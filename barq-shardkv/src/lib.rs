//! A single replica group's key/value store: the shard-owning half of the
//! cluster (see `barq-cluster` for `CFG`, the shard-to-group assignment).
//!
//! Everything here assumes a replicated, totally-ordered command log
//! (`LOG`, abstracted as the [`log::Log`] trait) feeding a single
//! [`applier::apply`] function; the front end and reconfiguration driver
//! only ever communicate with the rest of the group by proposing commands
//! to that log and waiting on [`pending::PendingRegistry`].

pub mod ack;
pub mod applier;
pub mod clerk;
pub mod error;
pub mod frontend;
pub mod log;
pub mod op;
pub mod pending;
pub mod persister;
pub mod reconfig;
pub mod server;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod transfer;

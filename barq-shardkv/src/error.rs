use barq_proto::shardkv::ErrorKind;
use thiserror::Error;

/// User/peer-visible error kinds. `WRONG_LEADER` additionally
/// covers "leadership was lost mid-operation" and is what the front-end
/// returns whenever it cannot prove its proposal landed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ShardKvError {
    #[error("key absent")]
    NoKey,
    #[error("shard not owned by this group")]
    WrongGroup,
    #[error("not leader, or leadership lost mid-operation")]
    WrongLeader,
    #[error("peer has not caught up to the requested config")]
    NotReady,
    #[error("peer has already moved past the requested config")]
    OutOfDate,
}

impl From<ShardKvError> for ErrorKind {
    fn from(e: ShardKvError) -> Self {
        match e {
            ShardKvError::NoKey => ErrorKind::NoKey,
            ShardKvError::WrongGroup => ErrorKind::WrongGroup,
            ShardKvError::WrongLeader => ErrorKind::WrongLeader,
            ShardKvError::NotReady => ErrorKind::NotReady,
            ShardKvError::OutOfDate => ErrorKind::OutOfDate,
        }
    }
}

impl From<ErrorKind> for ShardKvError {
    fn from(e: ErrorKind) -> Self {
        match e {
            ErrorKind::Ok => panic!("ErrorKind::Ok has no ShardKvError counterpart"),
            ErrorKind::NoKey => ShardKvError::NoKey,
            ErrorKind::WrongGroup => ShardKvError::WrongGroup,
            ErrorKind::WrongLeader => ShardKvError::WrongLeader,
            ErrorKind::NotReady => ShardKvError::NotReady,
            ErrorKind::OutOfDate => ShardKvError::OutOfDate,
        }
    }
}

/// Internal inconsistencies (ack regression, out-of-range shard index,
/// snapshot decode failure) are fatal: they mean this
/// replica's log-applied state has diverged from what the log actually
/// committed, and no caller could meaningfully recover. We panic rather
/// than return a `Result`.
pub fn fatal(msg: impl std::fmt::Display) -> ! {
    panic!("barq-shardkv: fatal internal inconsistency: {msg}");
}

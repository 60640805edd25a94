use std::fmt;

use cxo_crypto::ChainError;
use cxo_types::PubKey;

/// Errors from data layer operations.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    /// A root record violates a structural rule. Nothing was stored.
    #[error("malformed root {seq} of feed {}: {rule}", .feed.short_hex())]
    MalformedRoot { feed: PubKey, seq: u64, rule: RootRule },

    /// The feed already holds a root at this sequence number.
    #[error("root {seq} of feed {} already exists", .feed.short_hex())]
    RootAlreadyExists { feed: PubKey, seq: u64 },

    /// Another root with the same hash is already stored. Root hashes are
    /// unique across the whole store, so the same payload cannot be filed
    /// twice, neither in one feed nor in two.
    #[error(
        "root {seq} of feed {} has the hash of root {owner_seq} of feed {}",
        .feed.short_hex(),
        .owner.short_hex()
    )]
    RootHashTaken {
        feed: PubKey,
        seq: u64,
        owner: PubKey,
        owner_seq: u64,
    },

    /// I/O error from the durable backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The write-ahead log holds a damaged frame before its tail.
    #[error("corrupt log at offset {offset}: {reason}")]
    CorruptLog { offset: u64, reason: String },

    /// An earlier append to the write-ahead log failed and could not be
    /// rolled back. The log refuses writes until it is rewritten or reopened.
    #[error("write-ahead log is unusable after a failed append")]
    LogFailed,

    /// The configuration could not be read or parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A thread panicked while holding the database lock.
    #[error("database lock poisoned")]
    Poisoned,
}

impl DataError {
    pub(crate) fn malformed(feed: PubKey, err: ChainError) -> Self {
        Self::MalformedRoot {
            feed,
            seq: err.seq(),
            rule: err.into(),
        }
    }
}

/// The structural rule a rejected root record broke.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RootRule {
    /// `seq == 0` but `prev` is set.
    UnexpectedPrev,
    /// `seq != 0` but `prev` is the zero hash.
    MissingPrev,
    /// `hash` is not the hash of `payload`.
    HashMismatch,
    /// `prev` disagrees with an adjacent root already in the feed.
    BrokenChain,
}

impl fmt::Display for RootRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedPrev => write!(f, "unexpected prev. reference"),
            Self::MissingPrev => write!(f, "missing prev. reference"),
            Self::HashMismatch => write!(f, "wrong hash of the root"),
            Self::BrokenChain => write!(f, "prev. reference does not match the chain"),
        }
    }
}

impl From<ChainError> for RootRule {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::UnexpectedPrev { .. } => Self::UnexpectedPrev,
            ChainError::MissingPrev { .. } => Self::MissingPrev,
            ChainError::HashMismatch { .. } => Self::HashMismatch,
            ChainError::BrokenLink { .. } | ChainError::OutOfOrder { .. } => Self::BrokenChain,
        }
    }
}

/// Result alias for data layer operations.
pub type DataResult<T> = Result<T, DataError>;

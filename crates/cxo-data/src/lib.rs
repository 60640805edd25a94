//! Storage engine for CXO.
//!
//! This crate is the data layer of a CXO node: a content-addressed object
//! store plus, for every feed (an ed25519 public key), an append-only chain
//! of signed root records indexed by sequence number. Peers exchange objects
//! and roots; the store only keeps them consistent.
//!
//! # Namespaces
//!
//! - **objects**: `Hash -> Bytes`, arbitrary blobs (schemas, data)
//! - **roots**: `Hash -> RootRecord`, keyed by the hash of the root payload
//! - **feeds**: `PubKey -> { seq -> root hash }`
//!
//! # Backends
//!
//! All backends implement the [`Db`] trait:
//!
//! - [`MemoryDb`]: everything in memory behind one `RwLock`
//! - [`LogDb`]: the same state persisted as a CRC-framed write-ahead log,
//!   replayed on open and compactable
//!
//! [`DbConfig::open`] picks one from configuration.
//!
//! # Design Rules
//!
//! 1. One lock guards all three namespaces. `add_root` and `del_feed` touch
//!    both the index and the roots space and must never be observed halfway.
//! 2. Values are immutable once handed out (`Bytes`, cloned records).
//! 3. Malformed or conflicting roots are rejected before any mutation.
//! 4. An index entry without its record means the store is corrupt: the
//!    operation panics instead of reporting "not found".
//! 5. Signatures are not verified here. That is the replication layer's job.

pub mod config;
pub mod durable;
pub mod error;
pub mod memory;
pub mod record;
pub mod stat;
pub mod traits;
pub mod wal;

mod state;

pub use bytes::Bytes;
pub use config::{ChainPolicy, DbConfig};
pub use durable::LogDb;
pub use error::{DataError, DataResult, RootRule};
pub use memory::MemoryDb;
pub use record::RootRecord;
pub use stat::{FeedStat, Space, Stat, ROOT_OVERHEAD};
pub use traits::Db;
pub use wal::{LogOp, SyncMode, WriteAheadLog};

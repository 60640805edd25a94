use std::fmt;
use std::ops::ControlFlow;
use std::path::Path;

use bytes::Bytes;
use tracing::{debug, info};

use cxo_types::{Hash, PubKey};

use crate::config::ChainPolicy;
use crate::error::DataResult;
use crate::memory::MemoryDb;
use crate::record::RootRecord;
use crate::stat::Stat;
use crate::state::DbState;
use crate::traits::Db;
use crate::wal::{LogOp, SyncMode, WriteAheadLog};

/// Durable database: a [`MemoryDb`] whose every mutation is first recorded
/// in a [`WriteAheadLog`].
///
/// Opening replays the log into memory. A mutation is validated, logged and
/// applied while the state write lock is held, so the log order is the
/// apply order. Operations that would change nothing are not logged, and
/// neither are rejected ones.
///
/// Lock order: state, then log.
pub struct LogDb {
    mem: MemoryDb,
    wal: WriteAheadLog,
}

impl LogDb {
    /// Open (or create) the database logged at `path`.
    pub fn open(path: &Path, sync_mode: SyncMode, policy: ChainPolicy) -> DataResult<Self> {
        let (wal, ops) = WriteAheadLog::open(path, sync_mode)?;
        let replayed = ops.len();

        let mut state = DbState::default();
        for op in ops {
            state.apply(op);
        }

        info!(
            path = %path.display(),
            replayed,
            objects = state.object_count(),
            feeds = state.feeds().len(),
            "opened database"
        );
        Ok(Self {
            mem: MemoryDb::from_state(state, policy),
            wal,
        })
    }

    /// Rewrite the log as the shortest operation list that rebuilds the
    /// current state.
    pub fn compact(&self) -> DataResult<()> {
        let state = self.mem.read_state()?;
        let before = self.wal.offset();
        let ops = state.snapshot();
        self.wal.rewrite(&ops)?;
        info!(before, after = self.wal.offset(), ops = ops.len(), "compacted log");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        self.wal.path()
    }

    /// Current size of the log in bytes.
    pub fn log_size(&self) -> u64 {
        self.wal.offset()
    }

    pub fn policy(&self) -> ChainPolicy {
        self.mem.policy()
    }
}

impl fmt::Debug for LogDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogDb")
            .field("policy", &self.mem.policy())
            .field("wal", &self.wal)
            .finish()
    }
}

impl Db for LogDb {
    fn set(&self, hash: Hash, data: Bytes) -> DataResult<()> {
        let mut state = self.mem.write_state()?;
        if state.get(&hash).as_ref() == Some(&data) {
            return Ok(());
        }
        let op = LogOp::Set { hash, data };
        self.wal.append(&op)?;
        state.apply(op);
        Ok(())
    }

    fn add(&self, data: Bytes) -> DataResult<Hash> {
        let hash = Hash::sum(&data);
        let mut state = self.mem.write_state()?;
        if state.contains(&hash) {
            return Ok(hash);
        }
        let op = LogOp::Set { hash, data };
        self.wal.append(&op)?;
        state.apply(op);
        Ok(hash)
    }

    fn get(&self, hash: &Hash) -> DataResult<Option<Bytes>> {
        self.mem.get(hash)
    }

    fn exists(&self, hash: &Hash) -> DataResult<bool> {
        self.mem.exists(hash)
    }

    fn del(&self, hash: &Hash) -> DataResult<bool> {
        let mut state = self.mem.write_state()?;
        if !state.contains(hash) {
            return Ok(false);
        }
        let op = LogOp::DelObjects { hashes: vec![*hash] };
        self.wal.append(&op)?;
        state.apply(op);
        Ok(true)
    }

    fn range(&self, visit: &mut dyn FnMut(&Hash, &Bytes) -> ControlFlow<()>) -> DataResult<()> {
        self.mem.range(visit)
    }

    fn range_delete(&self, pred: &mut dyn FnMut(&Hash) -> bool) -> DataResult<usize> {
        let mut state = self.mem.write_state()?;
        let hashes = state.matching_objects(pred);
        if hashes.is_empty() {
            return Ok(0);
        }
        self.wal.append(&LogOp::DelObjects {
            hashes: hashes.clone(),
        })?;
        let removed = state.del_objects(&hashes);
        debug!(removed, "range delete objects");
        Ok(removed)
    }

    fn add_feed(&self, feed: PubKey) -> DataResult<()> {
        let mut state = self.mem.write_state()?;
        if state.has_feed(&feed) {
            return Ok(());
        }
        let op = LogOp::AddFeed { feed };
        self.wal.append(&op)?;
        state.apply(op);
        Ok(())
    }

    fn has_feed(&self, feed: &PubKey) -> DataResult<bool> {
        self.mem.has_feed(feed)
    }

    fn feeds(&self) -> DataResult<Vec<PubKey>> {
        self.mem.feeds()
    }

    fn del_feed(&self, feed: &PubKey) -> DataResult<()> {
        let mut state = self.mem.write_state()?;
        if !state.has_feed(feed) {
            return Ok(());
        }
        let op = LogOp::DelFeed { feed: *feed };
        self.wal.append(&op)?;
        state.apply(op);
        debug!(feed = %feed.short_hex(), "deleted feed");
        Ok(())
    }

    fn add_root(&self, feed: &PubKey, root: &RootRecord) -> DataResult<()> {
        MemoryDb::check_root(feed, root)?;
        let mut state = self.mem.write_state()?;
        state.check_insert(feed, root, self.mem.policy())?;
        let op = LogOp::AddRoot {
            feed: *feed,
            root: root.clone(),
        };
        self.wal.append(&op)?;
        state.apply(op);
        debug!(feed = %feed.short_hex(), seq = root.seq, "added root");
        Ok(())
    }

    fn last_root(&self, feed: &PubKey) -> DataResult<Option<RootRecord>> {
        self.mem.last_root(feed)
    }

    fn get_root(&self, hash: &Hash) -> DataResult<Option<RootRecord>> {
        self.mem.get_root(hash)
    }

    fn range_feed(
        &self,
        feed: &PubKey,
        visit: &mut dyn FnMut(&RootRecord) -> ControlFlow<()>,
    ) -> DataResult<()> {
        self.mem.range_feed(feed, visit)
    }

    fn range_feed_reverse(
        &self,
        feed: &PubKey,
        visit: &mut dyn FnMut(&RootRecord) -> ControlFlow<()>,
    ) -> DataResult<()> {
        self.mem.range_feed_reverse(feed, visit)
    }

    fn range_feed_delete(
        &self,
        feed: &PubKey,
        pred: &mut dyn FnMut(&RootRecord) -> bool,
    ) -> DataResult<usize> {
        let mut state = self.mem.write_state()?;
        let seqs = state.matching_roots(feed, pred);
        self.del_roots(&mut state, feed, seqs)
    }

    fn delete_roots_before(&self, feed: &PubKey, seq: u64) -> DataResult<usize> {
        let mut state = self.mem.write_state()?;
        let seqs = state.seqs_before(feed, seq);
        self.del_roots(&mut state, feed, seqs)
    }

    fn stat(&self) -> DataResult<Stat> {
        self.mem.stat()
    }

    fn close(&self) -> DataResult<()> {
        self.wal.sync()?;
        info!(path = %self.wal.path().display(), "closed database");
        Ok(())
    }
}

impl LogDb {
    fn del_roots(&self, state: &mut DbState, feed: &PubKey, seqs: Vec<u64>) -> DataResult<usize> {
        if seqs.is_empty() {
            return Ok(0);
        }
        self.wal.append(&LogOp::DelRoots {
            feed: *feed,
            seqs: seqs.clone(),
        })?;
        let removed = state.del_roots(feed, &seqs);
        debug!(feed = %feed.short_hex(), removed, "deleted roots");
        Ok(removed)
    }
}

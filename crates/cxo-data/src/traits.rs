use std::ops::ControlFlow;

use bytes::Bytes;

use cxo_crypto::ChainVerifier;
use cxo_types::{Hash, PubKey};

use crate::error::{DataError, DataResult};
use crate::record::RootRecord;
use crate::stat::Stat;

/// Content-addressed object store plus a per-feed registry of root records.
///
/// All implementations must satisfy these invariants:
/// - The key of every object written through [`add`](Self::add) is the hash
///   of its bytes. [`set`](Self::set) trusts the caller's key.
/// - Values handed out by [`get`](Self::get) are immutable; later writes to
///   the same key never change a value a reader already holds.
/// - A stored root is a private copy. It is reachable both by its hash and
///   through its feed at its sequence number, and both views change together.
/// - A feed holds at most one root per sequence number; the first writer wins.
/// - A root hash is stored at most once across all feeds.
/// - Every operation is atomic with respect to every other operation.
/// - "Not found" is `Ok(None)` or `Ok(false)`, never an error.
///
/// Visitors run while the store lock is held. They must not call back into
/// the same store.
pub trait Db: Send + Sync {
    // -----------------------------------------------------------------------
    // Objects
    // -----------------------------------------------------------------------

    /// Store `data` under `hash`, overwriting any previous value.
    fn set(&self, hash: Hash, data: Bytes) -> DataResult<()>;

    /// Store `data` under its own hash and return the hash.
    ///
    /// Writing the same bytes twice is a no-op.
    fn add(&self, data: Bytes) -> DataResult<Hash>;

    /// Read an object. Returns `Ok(None)` if it does not exist.
    fn get(&self, hash: &Hash) -> DataResult<Option<Bytes>>;

    /// Check whether an object exists.
    fn exists(&self, hash: &Hash) -> DataResult<bool>;

    /// Delete an object. Returns `true` if it existed.
    fn del(&self, hash: &Hash) -> DataResult<bool>;

    /// Visit every object in no particular order until `visit` breaks.
    fn range(&self, visit: &mut dyn FnMut(&Hash, &Bytes) -> ControlFlow<()>) -> DataResult<()>;

    /// Delete every object whose hash `pred` selects, in one atomic pass.
    /// Returns the number of objects removed.
    fn range_delete(&self, pred: &mut dyn FnMut(&Hash) -> bool) -> DataResult<usize>;

    // -----------------------------------------------------------------------
    // Feeds
    // -----------------------------------------------------------------------

    /// Register a feed with no roots. No-op if it is already registered.
    fn add_feed(&self, feed: PubKey) -> DataResult<()>;

    /// Check whether a feed is registered.
    fn has_feed(&self, feed: &PubKey) -> DataResult<bool>;

    /// Snapshot of the registered feeds, in no particular order.
    fn feeds(&self) -> DataResult<Vec<PubKey>>;

    /// Remove a feed together with all its roots. No-op if it is absent.
    fn del_feed(&self, feed: &PubKey) -> DataResult<()>;

    // -----------------------------------------------------------------------
    // Roots
    // -----------------------------------------------------------------------

    /// Store a copy of `root` under `feed`, registering the feed if needed.
    ///
    /// Fails with [`DataError::MalformedRoot`] if the record breaks a
    /// structural rule, with [`DataError::RootAlreadyExists`] if the feed
    /// already holds a root at `root.seq`, and with
    /// [`DataError::RootHashTaken`] if any feed already holds a root with the
    /// same hash. A failed call changes nothing. Signatures are not checked
    /// here.
    fn add_root(&self, feed: &PubKey, root: &RootRecord) -> DataResult<()>;

    /// The root with the highest sequence number, or `None` if the feed is
    /// absent or empty.
    fn last_root(&self, feed: &PubKey) -> DataResult<Option<RootRecord>>;

    /// Look a root up by its hash.
    fn get_root(&self, hash: &Hash) -> DataResult<Option<RootRecord>>;

    /// Visit the roots of a feed by ascending sequence number.
    fn range_feed(
        &self,
        feed: &PubKey,
        visit: &mut dyn FnMut(&RootRecord) -> ControlFlow<()>,
    ) -> DataResult<()>;

    /// Visit the roots of a feed by descending sequence number.
    fn range_feed_reverse(
        &self,
        feed: &PubKey,
        visit: &mut dyn FnMut(&RootRecord) -> ControlFlow<()>,
    ) -> DataResult<()>;

    /// Delete the roots of a feed that `pred` selects, offered by ascending
    /// sequence number. Returns the number of roots removed.
    fn range_feed_delete(
        &self,
        feed: &PubKey,
        pred: &mut dyn FnMut(&RootRecord) -> bool,
    ) -> DataResult<usize>;

    /// Delete every root of a feed with a sequence number below `seq`.
    /// Returns the number of roots removed.
    fn delete_roots_before(&self, feed: &PubKey, seq: u64) -> DataResult<usize>;

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Counts and sizes of everything stored.
    fn stat(&self) -> DataResult<Stat>;

    /// Flush pending writes. The default implementation does nothing.
    fn close(&self) -> DataResult<()> {
        Ok(())
    }

    /// All roots of a feed, by ascending sequence number.
    fn roots(&self, feed: &PubKey) -> DataResult<Vec<RootRecord>> {
        let mut roots = Vec::new();
        self.range_feed(feed, &mut |root| {
            roots.push(root.clone());
            ControlFlow::Continue(())
        })?;
        Ok(roots)
    }

    /// Check that every pair of roots at consecutive sequence numbers is
    /// linked through `prev`. Gaps are tolerated.
    fn verify_feed(&self, feed: &PubKey) -> DataResult<()> {
        let roots = self.roots(feed)?;
        ChainVerifier::verify_chain(&roots).map_err(|e| DataError::malformed(*feed, e))
    }
}

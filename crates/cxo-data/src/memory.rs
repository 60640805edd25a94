use std::fmt;
use std::ops::ControlFlow;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use tracing::debug;

use cxo_types::{Hash, PubKey};

use crate::config::ChainPolicy;
use crate::error::{DataError, DataResult};
use crate::record::RootRecord;
use crate::stat::Stat;
use crate::state::{DbState, Order};
use crate::traits::Db;

/// In-memory database.
///
/// Objects, roots and the feed index live behind a single `RwLock`, so a
/// root insertion or a feed removal is atomic across all three. Reads share
/// the lock; mutations take it exclusively. Nothing survives a restart; see
/// [`LogDb`](crate::LogDb) for a durable variant.
pub struct MemoryDb {
    state: RwLock<DbState>,
    policy: ChainPolicy,
}

impl MemoryDb {
    /// Create an empty database with the default [`ChainPolicy`].
    pub fn new() -> Self {
        Self::with_policy(ChainPolicy::default())
    }

    /// Create an empty database with the given [`ChainPolicy`].
    pub fn with_policy(policy: ChainPolicy) -> Self {
        Self {
            state: RwLock::new(DbState::default()),
            policy,
        }
    }

    pub fn policy(&self) -> ChainPolicy {
        self.policy
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.state.read().expect("lock poisoned").object_count()
    }

    /// Returns `true` if no objects are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes across all stored objects.
    pub fn total_bytes(&self) -> u64 {
        self.state.read().expect("lock poisoned").object_space().0
    }

    pub(crate) fn from_state(state: DbState, policy: ChainPolicy) -> Self {
        Self {
            state: RwLock::new(state),
            policy,
        }
    }

    pub(crate) fn read_state(&self) -> DataResult<RwLockReadGuard<'_, DbState>> {
        self.state.read().map_err(|_| DataError::Poisoned)
    }

    pub(crate) fn write_state(&self) -> DataResult<RwLockWriteGuard<'_, DbState>> {
        self.state.write().map_err(|_| DataError::Poisoned)
    }

    /// Structural checks that need no lock.
    pub(crate) fn check_root(feed: &PubKey, root: &RootRecord) -> DataResult<()> {
        root.check().map_err(|e| DataError::malformed(*feed, e))
    }
}

impl Default for MemoryDb {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDb")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Db for MemoryDb {
    fn set(&self, hash: Hash, data: Bytes) -> DataResult<()> {
        let mut state = self.write_state()?;
        debug!(hash = %hash.short_hex(), len = data.len(), "set object");
        state.set(hash, data);
        Ok(())
    }

    fn add(&self, data: Bytes) -> DataResult<Hash> {
        let hash = Hash::sum(&data);
        let mut state = self.write_state()?;
        if !state.contains(&hash) {
            debug!(hash = %hash.short_hex(), len = data.len(), "add object");
            state.set(hash, data);
        }
        Ok(hash)
    }

    fn get(&self, hash: &Hash) -> DataResult<Option<Bytes>> {
        Ok(self.read_state()?.get(hash))
    }

    fn exists(&self, hash: &Hash) -> DataResult<bool> {
        Ok(self.read_state()?.contains(hash))
    }

    fn del(&self, hash: &Hash) -> DataResult<bool> {
        let removed = self.write_state()?.del(hash);
        if removed {
            debug!(hash = %hash.short_hex(), "deleted object");
        }
        Ok(removed)
    }

    fn range(&self, visit: &mut dyn FnMut(&Hash, &Bytes) -> ControlFlow<()>) -> DataResult<()> {
        self.read_state()?.range(visit);
        Ok(())
    }

    fn range_delete(&self, pred: &mut dyn FnMut(&Hash) -> bool) -> DataResult<usize> {
        let mut state = self.write_state()?;
        let doomed = state.matching_objects(pred);
        let removed = state.del_objects(&doomed);
        debug!(removed, "range delete objects");
        Ok(removed)
    }

    fn add_feed(&self, feed: PubKey) -> DataResult<()> {
        if self.write_state()?.add_feed(feed) {
            debug!(feed = %feed.short_hex(), "added feed");
        }
        Ok(())
    }

    fn has_feed(&self, feed: &PubKey) -> DataResult<bool> {
        Ok(self.read_state()?.has_feed(feed))
    }

    fn feeds(&self) -> DataResult<Vec<PubKey>> {
        Ok(self.read_state()?.feeds())
    }

    fn del_feed(&self, feed: &PubKey) -> DataResult<()> {
        if let Some(roots) = self.write_state()?.del_feed(feed) {
            debug!(feed = %feed.short_hex(), roots, "deleted feed");
        }
        Ok(())
    }

    fn add_root(&self, feed: &PubKey, root: &RootRecord) -> DataResult<()> {
        Self::check_root(feed, root)?;
        let mut state = self.write_state()?;
        state.check_insert(feed, root, self.policy)?;
        debug!(feed = %feed.short_hex(), seq = root.seq, hash = %root.hash.short_hex(), "added root");
        state.insert_root(*feed, root.clone());
        Ok(())
    }

    fn last_root(&self, feed: &PubKey) -> DataResult<Option<RootRecord>> {
        Ok(self.read_state()?.last_root(feed))
    }

    fn get_root(&self, hash: &Hash) -> DataResult<Option<RootRecord>> {
        Ok(self.read_state()?.get_root(hash))
    }

    fn range_feed(
        &self,
        feed: &PubKey,
        visit: &mut dyn FnMut(&RootRecord) -> ControlFlow<()>,
    ) -> DataResult<()> {
        self.read_state()?.range_feed(feed, Order::Ascending, visit);
        Ok(())
    }

    fn range_feed_reverse(
        &self,
        feed: &PubKey,
        visit: &mut dyn FnMut(&RootRecord) -> ControlFlow<()>,
    ) -> DataResult<()> {
        self.read_state()?.range_feed(feed, Order::Descending, visit);
        Ok(())
    }

    fn range_feed_delete(
        &self,
        feed: &PubKey,
        pred: &mut dyn FnMut(&RootRecord) -> bool,
    ) -> DataResult<usize> {
        let mut state = self.write_state()?;
        let doomed = state.matching_roots(feed, pred);
        let removed = state.del_roots(feed, &doomed);
        debug!(feed = %feed.short_hex(), removed, "range delete roots");
        Ok(removed)
    }

    fn delete_roots_before(&self, feed: &PubKey, seq: u64) -> DataResult<usize> {
        let mut state = self.write_state()?;
        let doomed = state.seqs_before(feed, seq);
        let removed = state.del_roots(feed, &doomed);
        if removed > 0 {
            debug!(feed = %feed.short_hex(), before = seq, removed, "trimmed roots");
        }
        Ok(removed)
    }

    fn stat(&self) -> DataResult<Stat> {
        Ok(self.read_state()?.stat())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use proptest::prelude::*;

    use cxo_crypto::SigningKey;

    use super::*;
    use crate::error::RootRule;
    use crate::stat::{Space, ROOT_OVERHEAD};

    fn feed() -> PubKey {
        PubKey::from_raw([7; 32])
    }

    /// A well-formed root whose `prev` is the hash of `root(seq - 1)`.
    fn root(seq: u64) -> RootRecord {
        let prev = if seq == 0 {
            Hash::zero()
        } else {
            Hash::sum(payload(seq - 1).as_bytes())
        };
        RootRecord::new(seq, prev, payload(seq).into_bytes())
    }

    fn payload(seq: u64) -> String {
        format!("feed-7/root-{seq}")
    }

    fn seqs(db: &MemoryDb, feed: &PubKey) -> Vec<u64> {
        db.roots(feed).unwrap().iter().map(|r| r.seq).collect()
    }

    fn reverse_seqs(db: &MemoryDb, feed: &PubKey) -> Vec<u64> {
        let mut seen = Vec::new();
        db.range_feed_reverse(feed, &mut |r| {
            seen.push(r.seq);
            ControlFlow::Continue(())
        })
        .unwrap();
        seen
    }

    // -----------------------------------------------------------------------
    // Objects
    // -----------------------------------------------------------------------

    #[test]
    fn add_returns_content_hash() {
        let db = MemoryDb::new();
        let data = Bytes::from_static(b"hello cxo");
        let hash = db.add(data.clone()).unwrap();
        assert_eq!(hash, Hash::sum(b"hello cxo"));
        assert_eq!(db.get(&hash).unwrap(), Some(data));
        assert!(db.exists(&hash).unwrap());
    }

    #[test]
    fn add_is_idempotent() {
        let db = MemoryDb::new();
        let a = db.add(Bytes::from_static(b"same")).unwrap();
        let b = db.add(Bytes::from_static(b"same")).unwrap();
        assert_eq!(a, b);
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn set_overwrites() {
        let db = MemoryDb::new();
        let key = Hash::sum(b"key");
        db.set(key, Bytes::from_static(b"one")).unwrap();
        db.set(key, Bytes::from_static(b"two")).unwrap();
        assert_eq!(db.get(&key).unwrap(), Some(Bytes::from_static(b"two")));
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn held_value_survives_overwrite_and_delete() {
        let db = MemoryDb::new();
        let key = Hash::sum(b"key");
        db.set(key, Bytes::from_static(b"first")).unwrap();
        let held = db.get(&key).unwrap().unwrap();

        db.set(key, Bytes::from_static(b"second")).unwrap();
        db.del(&key).unwrap();
        assert_eq!(held, Bytes::from_static(b"first"));
    }

    #[test]
    fn missing_object_is_none() {
        let db = MemoryDb::new();
        let hash = Hash::sum(b"nope");
        assert_eq!(db.get(&hash).unwrap(), None);
        assert!(!db.exists(&hash).unwrap());
        assert!(!db.del(&hash).unwrap());
    }

    #[test]
    fn del_removes_object() {
        let db = MemoryDb::new();
        let hash = db.add(Bytes::from_static(b"gone soon")).unwrap();
        assert!(db.del(&hash).unwrap());
        assert!(!db.exists(&hash).unwrap());
        assert!(db.is_empty());
    }

    #[test]
    fn range_visits_all_and_stops_early() {
        let db = MemoryDb::new();
        for i in 0..10u8 {
            db.add(Bytes::from(vec![i])).unwrap();
        }

        let mut all = 0;
        db.range(&mut |hash, data| {
            assert!(hash.matches(data));
            all += 1;
            ControlFlow::Continue(())
        })
        .unwrap();
        assert_eq!(all, 10);

        let mut seen = 0;
        db.range(&mut |_, _| {
            seen += 1;
            if seen == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();
        assert_eq!(seen, 3);
    }

    #[test]
    fn range_delete_removes_selected() {
        let db = MemoryDb::new();
        let keep = db.add(Bytes::from_static(b"keep")).unwrap();
        let drop_a = db.add(Bytes::from_static(b"drop-a")).unwrap();
        let drop_b = db.add(Bytes::from_static(b"drop-b")).unwrap();

        let mut offered = 0;
        let removed = db
            .range_delete(&mut |hash| {
                offered += 1;
                *hash == drop_a || *hash == drop_b
            })
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(offered, 3);
        assert!(db.exists(&keep).unwrap());
        assert!(!db.exists(&drop_a).unwrap());
        assert!(!db.exists(&drop_b).unwrap());
    }

    #[test]
    fn total_bytes_sums_values() {
        let db = MemoryDb::new();
        db.add(Bytes::from_static(b"1234")).unwrap();
        db.add(Bytes::from_static(b"56")).unwrap();
        assert_eq!(db.total_bytes(), 6);
    }

    // -----------------------------------------------------------------------
    // Feeds
    // -----------------------------------------------------------------------

    #[test]
    fn add_feed_is_idempotent() {
        let db = MemoryDb::new();
        db.add_feed(feed()).unwrap();
        db.add_root(&feed(), &root(0)).unwrap();
        db.add_feed(feed()).unwrap();
        assert_eq!(db.feeds().unwrap(), vec![feed()]);
        assert_eq!(seqs(&db, &feed()), vec![0]);
    }

    #[test]
    fn empty_feed_has_no_last_root() {
        let db = MemoryDb::new();
        assert_eq!(db.last_root(&feed()).unwrap(), None);
        db.add_feed(feed()).unwrap();
        assert!(db.has_feed(&feed()).unwrap());
        assert_eq!(db.last_root(&feed()).unwrap(), None);
    }

    #[test]
    fn del_feed_cascades_to_roots() {
        let db = MemoryDb::new();
        let other = PubKey::from_raw([8; 32]);
        for seq in 0..3 {
            db.add_root(&feed(), &root(seq)).unwrap();
        }
        db.add_feed(other).unwrap();

        db.del_feed(&feed()).unwrap();
        assert!(!db.has_feed(&feed()).unwrap());
        assert_eq!(db.feeds().unwrap(), vec![other]);
        for seq in 0..3 {
            assert_eq!(db.get_root(&root(seq).hash).unwrap(), None);
        }

        // absent feed
        db.del_feed(&feed()).unwrap();
    }

    // -----------------------------------------------------------------------
    // Roots
    // -----------------------------------------------------------------------

    #[test]
    fn add_root_creates_feed() {
        let db = MemoryDb::new();
        db.add_root(&feed(), &root(0)).unwrap();
        assert!(db.has_feed(&feed()).unwrap());
        assert_eq!(db.get_root(&root(0).hash).unwrap(), Some(root(0)));
    }

    #[test]
    fn genesis_with_prev_is_malformed() {
        let db = MemoryDb::new();
        db.add_feed(feed()).unwrap();
        let bad = RootRecord::new(0, Hash::sum(b"x"), Bytes::from_static(b"g"));
        let err = db.add_root(&feed(), &bad).unwrap_err();
        assert!(matches!(
            err,
            DataError::MalformedRoot { seq: 0, rule: RootRule::UnexpectedPrev, .. }
        ));
        assert!(seqs(&db, &feed()).is_empty());
        assert_eq!(db.get_root(&bad.hash).unwrap(), None);
    }

    #[test]
    fn later_root_without_prev_is_malformed() {
        let db = MemoryDb::new();
        let bad = RootRecord::new(1, Hash::zero(), Bytes::from_static(b"r"));
        let err = db.add_root(&feed(), &bad).unwrap_err();
        assert!(matches!(
            err,
            DataError::MalformedRoot { seq: 1, rule: RootRule::MissingPrev, .. }
        ));
        assert!(!db.has_feed(&feed()).unwrap());
    }

    #[test]
    fn hash_mismatch_changes_nothing() {
        let db = MemoryDb::new();
        let mut bad = root(0);
        bad.hash = Hash::sum(b"something else");
        let err = db.add_root(&feed(), &bad).unwrap_err();
        assert!(matches!(
            err,
            DataError::MalformedRoot { rule: RootRule::HashMismatch, .. }
        ));
        assert_eq!(db.get_root(&bad.hash).unwrap(), None);
        assert_eq!(db.stat().unwrap(), Stat::default());
    }

    #[test]
    fn occupied_seq_conflicts() {
        let db = MemoryDb::new();
        for seq in [2, 5] {
            db.add_root(&feed(), &root(seq)).unwrap();
        }
        let rival = RootRecord::new(5, root(5).prev, Bytes::from_static(b"rival"));
        let err = db.add_root(&feed(), &rival).unwrap_err();
        assert!(matches!(err, DataError::RootAlreadyExists { seq: 5, .. }));
        db.add_root(&feed(), &root(9)).unwrap();

        assert_eq!(seqs(&db, &feed()), vec![2, 5, 9]);
        assert_eq!(db.get_root(&rival.hash).unwrap(), None);
        assert_eq!(db.get_root(&root(5).hash).unwrap(), Some(root(5)));
    }

    #[test]
    fn same_payload_at_two_seqs_keeps_first() {
        let db = MemoryDb::new();
        let first = RootRecord::new(1, Hash::sum(b"p0"), Bytes::from_static(b"same"));
        let second = RootRecord::new(2, Hash::sum(b"p1"), Bytes::from_static(b"same"));
        db.add_root(&feed(), &first).unwrap();

        let err = db.add_root(&feed(), &second).unwrap_err();
        assert!(matches!(
            err,
            DataError::RootHashTaken { seq: 2, owner_seq: 1, .. }
        ));
        assert_eq!(seqs(&db, &feed()), vec![1]);
        assert_eq!(db.get_root(&first.hash).unwrap(), Some(first.clone()));

        assert_eq!(db.delete_roots_before(&feed(), 2).unwrap(), 1);
        assert_eq!(db.last_root(&feed()).unwrap(), None);
        db.add_root(&feed(), &second).unwrap();
        assert_eq!(db.last_root(&feed()).unwrap(), Some(second));
    }

    #[test]
    fn shared_genesis_across_feeds_is_rejected() {
        let db = MemoryDb::new();
        let (a, b) = (PubKey::from_raw([1; 32]), PubKey::from_raw([2; 32]));
        let genesis = RootRecord::new(0, Hash::zero(), Bytes::from_static(b"genesis"));
        db.add_root(&a, &genesis).unwrap();

        let err = db.add_root(&b, &genesis).unwrap_err();
        assert!(matches!(
            err,
            DataError::RootHashTaken { owner, owner_seq: 0, .. } if owner == a
        ));
        assert!(!db.has_feed(&b).unwrap());

        db.del_feed(&a).unwrap();
        db.add_root(&b, &genesis).unwrap();
        assert_eq!(db.last_root(&b).unwrap(), Some(genesis));
        assert_eq!(db.stat().unwrap().roots(), 1);
    }

    #[test]
    fn stored_root_is_a_private_copy() {
        let db = MemoryDb::new();
        let mut mine = root(0);
        db.add_root(&feed(), &mine).unwrap();
        mine.payload = Bytes::from_static(b"changed after the call");
        mine.seq = 42;
        assert_eq!(db.last_root(&feed()).unwrap(), Some(root(0)));
    }

    #[test]
    fn range_feed_sorts_insertion_order() {
        let db = MemoryDb::new();
        for seq in [9, 2, 5] {
            db.add_root(&feed(), &root(seq)).unwrap();
        }
        assert_eq!(seqs(&db, &feed()), vec![2, 5, 9]);
        assert_eq!(reverse_seqs(&db, &feed()), vec![9, 5, 2]);
    }

    #[test]
    fn range_feed_stops_early() {
        let db = MemoryDb::new();
        for seq in 0..5 {
            db.add_root(&feed(), &root(seq)).unwrap();
        }
        let mut seen = Vec::new();
        db.range_feed_reverse(&feed(), &mut |r| {
            seen.push(r.seq);
            if r.seq == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();
        assert_eq!(seen, vec![4, 3]);
    }

    #[test]
    fn range_over_absent_feed_is_empty() {
        let db = MemoryDb::new();
        assert!(db.roots(&feed()).unwrap().is_empty());
        assert!(reverse_seqs(&db, &feed()).is_empty());
    }

    #[test]
    fn last_root_is_highest_seq() {
        let db = MemoryDb::new();
        for seq in [1, 3, 2] {
            db.add_root(&feed(), &root(seq)).unwrap();
        }
        assert_eq!(db.last_root(&feed()).unwrap().map(|r| r.seq), Some(3));
    }

    #[test]
    fn delete_roots_before_trims_chain() {
        let db = MemoryDb::new();
        for seq in [1, 2, 5, 7] {
            db.add_root(&feed(), &root(seq)).unwrap();
        }
        assert_eq!(db.delete_roots_before(&feed(), 5).unwrap(), 2);
        assert_eq!(seqs(&db, &feed()), vec![5, 7]);
        assert_eq!(db.get_root(&root(1).hash).unwrap(), None);
        assert_eq!(db.get_root(&root(2).hash).unwrap(), None);

        assert_eq!(db.delete_roots_before(&feed(), 5).unwrap(), 0);
        assert_eq!(seqs(&db, &feed()), vec![5, 7]);
    }

    #[test]
    fn range_feed_delete_removes_selected() {
        let db = MemoryDb::new();
        for seq in 0..6 {
            db.add_root(&feed(), &root(seq)).unwrap();
        }
        let mut offered = Vec::new();
        let removed = db
            .range_feed_delete(&feed(), &mut |r| {
                offered.push(r.seq);
                r.seq % 2 == 1
            })
            .unwrap();
        assert_eq!(removed, 3);
        assert_eq!(offered, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(seqs(&db, &feed()), vec![0, 2, 4]);
        assert_eq!(db.get_root(&root(3).hash).unwrap(), None);
    }

    #[test]
    fn signed_roots_are_stored_as_given() {
        let key = SigningKey::generate();
        let db = MemoryDb::new();
        let signed = root(0).signed(&key);
        db.add_root(&key.public_key(), &signed).unwrap();

        let stored = db.last_root(&key.public_key()).unwrap().unwrap();
        assert!(stored.verify(&key.public_key()).is_ok());
    }

    // -----------------------------------------------------------------------
    // Chain policy and verification
    // -----------------------------------------------------------------------

    #[test]
    fn trusting_policy_accepts_foreign_prev() {
        let db = MemoryDb::new();
        db.add_root(&feed(), &root(0)).unwrap();
        let stray = RootRecord::new(1, Hash::sum(b"not root 0"), Bytes::from_static(b"r1"));
        db.add_root(&feed(), &stray).unwrap();

        let err = db.verify_feed(&feed()).unwrap_err();
        assert!(matches!(
            err,
            DataError::MalformedRoot { seq: 1, rule: RootRule::BrokenChain, .. }
        ));
    }

    #[test]
    fn strict_policy_rejects_broken_links() {
        let db = MemoryDb::with_policy(ChainPolicy::Strict);
        db.add_root(&feed(), &root(0)).unwrap();
        let stray = RootRecord::new(1, Hash::sum(b"not root 0"), Bytes::from_static(b"r1"));
        let err = db.add_root(&feed(), &stray).unwrap_err();
        assert!(matches!(
            err,
            DataError::MalformedRoot { seq: 1, rule: RootRule::BrokenChain, .. }
        ));

        db.add_root(&feed(), &root(1)).unwrap();
        // gaps are fine
        db.add_root(&feed(), &root(4)).unwrap();
        assert_eq!(seqs(&db, &feed()), vec![0, 1, 4]);
    }

    #[test]
    fn verify_feed_accepts_gapped_chain() {
        let db = MemoryDb::new();
        for seq in [0, 1, 2, 6, 7] {
            db.add_root(&feed(), &root(seq)).unwrap();
        }
        assert!(db.verify_feed(&feed()).is_ok());
        assert!(db.verify_feed(&PubKey::from_raw([9; 32])).is_ok());
    }

    // -----------------------------------------------------------------------
    // Statistics
    // -----------------------------------------------------------------------

    #[test]
    fn stat_counts_everything() {
        let db = MemoryDb::new();
        db.add(Bytes::from_static(b"abc")).unwrap();
        db.add(Bytes::from_static(b"defgh")).unwrap();
        for seq in 0..2 {
            db.add_root(&feed(), &root(seq)).unwrap();
        }
        let empty = PubKey::from_raw([3; 32]);
        db.add_feed(empty).unwrap();

        let stat = db.stat().unwrap();
        assert_eq!(stat.objects, 2);
        assert_eq!(stat.space, Space(8));
        assert_eq!(stat.feeds.len(), 2);
        assert_eq!(stat.roots(), 2);

        let expected = (payload(0).len() + payload(1).len()) as u64 + 2 * ROOT_OVERHEAD;
        assert_eq!(stat.feeds[&feed()].space, Space(expected));
        assert_eq!(stat.feeds[&empty].roots, 0);
    }

    // -----------------------------------------------------------------------
    // Concurrency
    // -----------------------------------------------------------------------

    #[test]
    fn readers_never_see_partial_values() {
        let db = Arc::new(MemoryDb::new());
        let key = Hash::sum(b"hot key");
        db.set(key, Bytes::from(vec![0u8; 64])).unwrap();

        let writer = {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for round in 1..=500u32 {
                    let fill = (round % 251) as u8;
                    let len = 64 + (round as usize % 7) * 512;
                    db.set(key, Bytes::from(vec![fill; len])).unwrap();
                    db.add(Bytes::from(round.to_le_bytes().to_vec())).unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let db = Arc::clone(&db);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let value = db.get(&key).unwrap().expect("hot key present");
                        let first = value[0];
                        assert!(value.iter().all(|b| *b == first), "torn read");
                    }
                })
            })
            .collect();

        writer.join().expect("writer should not panic");
        for h in readers {
            h.join().expect("reader should not panic");
        }
    }

    #[test]
    fn concurrent_root_inserts_have_one_winner() {
        let db = Arc::new(MemoryDb::new());
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let db = Arc::clone(&db);
                thread::spawn(move || {
                    let rival = RootRecord::new(3, Hash::sum(b"p"), vec![i; 4]);
                    db.add_root(&feed(), &rival).is_ok()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().expect("thread should not panic"))
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(seqs(&db, &feed()), vec![3]);
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    proptest! {
        #[test]
        fn add_then_get_roundtrips(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let db = MemoryDb::new();
            let hash = db.add(Bytes::from(data.clone())).unwrap();
            prop_assert_eq!(hash, Hash::sum(&data));
            prop_assert_eq!(db.get(&hash).unwrap(), Some(Bytes::from(data)));
        }

        #[test]
        fn feed_ranges_are_sorted(input in proptest::collection::hash_set(1u64..1000, 0..40)) {
            let db = MemoryDb::new();
            for &seq in &input {
                db.add_root(&feed(), &root(seq)).unwrap();
            }
            let mut expected: Vec<u64> = input.into_iter().collect();
            expected.sort_unstable();
            prop_assert_eq!(seqs(&db, &feed()), expected.clone());

            expected.reverse();
            prop_assert_eq!(reverse_seqs(&db, &feed()), expected.clone());
            prop_assert_eq!(db.last_root(&feed()).unwrap().map(|r| r.seq), expected.first().copied());
        }

        #[test]
        fn trim_keeps_exactly_the_tail(
            input in proptest::collection::hash_set(1u64..200, 0..30),
            cut in 0u64..220,
        ) {
            let db = MemoryDb::new();
            for &seq in &input {
                db.add_root(&feed(), &root(seq)).unwrap();
            }
            let below = input.iter().filter(|&&s| s < cut).count();
            prop_assert_eq!(db.delete_roots_before(&feed(), cut).unwrap(), below);
            prop_assert!(seqs(&db, &feed()).iter().all(|&s| s >= cut));
        }
    }
}

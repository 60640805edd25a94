use std::collections::HashMap;
use std::ops::ControlFlow;

use bytes::Bytes;

use cxo_crypto::{ChainError, ChainVerifier};
use cxo_types::{Hash, PubKey};

use crate::config::ChainPolicy;
use crate::error::{DataError, DataResult, RootRule};
use crate::record::RootRecord;
use crate::stat::{FeedStat, Space, Stat};
use crate::wal::LogOp;

/// Traversal direction over a feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Order {
    Ascending,
    Descending,
}

/// The combined state guarded by a backend's single lock.
///
/// buckets:
///  - objects hash -> bytes (including schemas)
///  - roots   hash -> (owning feed, root record)
///  - feeds   pubkey -> { seq -> hash of root }
///
/// Every roots entry is referenced by exactly one feed index entry.
#[derive(Default)]
pub(crate) struct DbState {
    objects: HashMap<Hash, Bytes>,
    roots: HashMap<Hash, (PubKey, RootRecord)>,
    feeds: HashMap<PubKey, HashMap<u64, Hash>>,
}

impl DbState {
    // -----------------------------------------------------------------------
    // Objects
    // -----------------------------------------------------------------------

    pub fn get(&self, hash: &Hash) -> Option<Bytes> {
        self.objects.get(hash).cloned()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.objects.contains_key(hash)
    }

    pub fn set(&mut self, hash: Hash, data: Bytes) {
        self.objects.insert(hash, data);
    }

    pub fn del(&mut self, hash: &Hash) -> bool {
        self.objects.remove(hash).is_some()
    }

    pub fn range(&self, visit: &mut dyn FnMut(&Hash, &Bytes) -> ControlFlow<()>) {
        for (hash, data) in &self.objects {
            if visit(hash, data).is_break() {
                return;
            }
        }
    }

    /// Keys selected by `pred`, each key offered exactly once.
    pub fn matching_objects(&self, pred: &mut dyn FnMut(&Hash) -> bool) -> Vec<Hash> {
        self.objects.keys().filter(|hash| pred(*hash)).copied().collect()
    }

    pub fn del_objects(&mut self, hashes: &[Hash]) -> usize {
        hashes
            .iter()
            .filter(|hash| self.objects.remove(*hash).is_some())
            .count()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn object_space(&self) -> Space {
        self.objects.values().map(|v| Space(v.len() as u64)).sum()
    }

    // -----------------------------------------------------------------------
    // Feeds
    // -----------------------------------------------------------------------

    /// Register an empty feed. Returns `false` if it already existed.
    pub fn add_feed(&mut self, feed: PubKey) -> bool {
        if self.feeds.contains_key(&feed) {
            return false;
        }
        self.feeds.insert(feed, HashMap::new());
        true
    }

    pub fn has_feed(&self, feed: &PubKey) -> bool {
        self.feeds.contains_key(feed)
    }

    pub fn feeds(&self) -> Vec<PubKey> {
        self.feeds.keys().copied().collect()
    }

    /// Remove a feed with all its roots. Returns the number of roots removed,
    /// or `None` if the feed did not exist.
    pub fn del_feed(&mut self, feed: &PubKey) -> Option<usize> {
        let index = self.feeds.remove(feed)?;
        for hash in index.values() {
            self.roots.remove(hash);
        }
        Some(index.len())
    }

    // -----------------------------------------------------------------------
    // Roots
    // -----------------------------------------------------------------------

    /// Checks that depend on the current state: the sequence number must be
    /// free, no other root may already be stored under the same hash and,
    /// under [`ChainPolicy::Strict`], the root must link with the roots next
    /// to it.
    pub fn check_insert(
        &self,
        feed: &PubKey,
        root: &RootRecord,
        policy: ChainPolicy,
    ) -> DataResult<()> {
        if self
            .feeds
            .get(feed)
            .is_some_and(|index| index.contains_key(&root.seq))
        {
            return Err(DataError::RootAlreadyExists {
                feed: *feed,
                seq: root.seq,
            });
        }
        if let Some((owner, held)) = self.roots.get(&root.hash) {
            return Err(DataError::RootHashTaken {
                feed: *feed,
                seq: root.seq,
                owner: *owner,
                owner_seq: held.seq,
            });
        }

        if policy == ChainPolicy::Strict {
            let broken = |_: ChainError| DataError::MalformedRoot {
                feed: *feed,
                seq: root.seq,
                rule: RootRule::BrokenChain,
            };
            if let Some(parent) = root.seq.checked_sub(1).and_then(|s| self.root_at(feed, s)) {
                ChainVerifier::check_link(parent, root).map_err(broken)?;
            }
            if let Some(child) = root.seq.checked_add(1).and_then(|s| self.root_at(feed, s)) {
                ChainVerifier::check_link(root, child).map_err(broken)?;
            }
        }
        Ok(())
    }

    /// File a validated root under its feed and in the roots space.
    pub fn insert_root(&mut self, feed: PubKey, root: RootRecord) {
        self.feeds.entry(feed).or_default().insert(root.seq, root.hash);
        self.roots.insert(root.hash, (feed, root));
    }

    pub fn get_root(&self, hash: &Hash) -> Option<RootRecord> {
        self.roots.get(hash).map(|(_, root)| root.clone())
    }

    pub fn last_root(&self, feed: &PubKey) -> Option<RootRecord> {
        let index = self.feeds.get(feed)?;
        let (&seq, hash) = index.iter().max_by_key(|(seq, _)| **seq)?;
        Some(self.indexed_root(feed, seq, hash).clone())
    }

    /// Index entries of a feed, sorted by sequence number.
    pub fn entries(&self, feed: &PubKey, order: Order) -> Vec<(u64, Hash)> {
        let Some(index) = self.feeds.get(feed) else {
            return Vec::new();
        };
        let mut entries: Vec<(u64, Hash)> = index.iter().map(|(s, h)| (*s, *h)).collect();
        match order {
            Order::Ascending => entries.sort_unstable_by_key(|(seq, _)| *seq),
            Order::Descending => entries.sort_unstable_by(|a, b| b.0.cmp(&a.0)),
        }
        entries
    }

    pub fn range_feed(
        &self,
        feed: &PubKey,
        order: Order,
        visit: &mut dyn FnMut(&RootRecord) -> ControlFlow<()>,
    ) {
        for (seq, hash) in self.entries(feed, order) {
            if visit(self.indexed_root(feed, seq, &hash)).is_break() {
                return;
            }
        }
    }

    /// Sequence numbers, ascending, of the roots selected by `pred`.
    pub fn matching_roots(
        &self,
        feed: &PubKey,
        pred: &mut dyn FnMut(&RootRecord) -> bool,
    ) -> Vec<u64> {
        self.entries(feed, Order::Ascending)
            .into_iter()
            .filter(|(seq, hash)| pred(self.indexed_root(feed, *seq, hash)))
            .map(|(seq, _)| seq)
            .collect()
    }

    /// Sequence numbers, ascending, strictly below `seq`.
    pub fn seqs_before(&self, feed: &PubKey, seq: u64) -> Vec<u64> {
        let Some(index) = self.feeds.get(feed) else {
            return Vec::new();
        };
        let mut seqs: Vec<u64> = index.keys().copied().filter(|&s| s < seq).collect();
        seqs.sort_unstable();
        seqs
    }

    /// Remove roots of a feed from both the index and the roots space.
    pub fn del_roots(&mut self, feed: &PubKey, seqs: &[u64]) -> usize {
        let Some(index) = self.feeds.get_mut(feed) else {
            return 0;
        };
        let mut removed = 0;
        for seq in seqs {
            if let Some(hash) = index.remove(seq) {
                self.roots.remove(&hash);
                removed += 1;
            }
        }
        removed
    }

    fn root_at(&self, feed: &PubKey, seq: u64) -> Option<&RootRecord> {
        let hash = self.feeds.get(feed)?.get(&seq)?;
        Some(self.indexed_root(feed, seq, hash))
    }

    fn indexed_root(&self, feed: &PubKey, seq: u64, hash: &Hash) -> &RootRecord {
        match self.roots.get(hash) {
            Some((owner, root)) if owner == feed && root.seq == seq => root,
            _ => broken_index(feed, seq, hash),
        }
    }

    // -----------------------------------------------------------------------
    // Statistics and persistence
    // -----------------------------------------------------------------------

    pub fn stat(&self) -> Stat {
        let feeds = self
            .feeds
            .iter()
            .map(|(feed, index)| {
                let space = index
                    .iter()
                    .map(|(seq, hash)| self.indexed_root(feed, *seq, hash).space())
                    .sum();
                let stat = FeedStat {
                    roots: index.len(),
                    space,
                };
                (*feed, stat)
            })
            .collect();

        Stat {
            objects: self.objects.len(),
            space: self.object_space(),
            feeds,
        }
    }

    /// Replay one logged operation.
    pub fn apply(&mut self, op: LogOp) {
        match op {
            LogOp::Set { hash, data } => self.set(hash, data),
            LogOp::DelObjects { hashes } => {
                self.del_objects(&hashes);
            }
            LogOp::AddFeed { feed } => {
                self.add_feed(feed);
            }
            LogOp::DelFeed { feed } => {
                self.del_feed(&feed);
            }
            LogOp::AddRoot { feed, root } => self.insert_root(feed, root),
            LogOp::DelRoots { feed, seqs } => {
                self.del_roots(&feed, &seqs);
            }
        }
    }

    /// The shortest operation list that rebuilds this state.
    pub fn snapshot(&self) -> Vec<LogOp> {
        let mut hashes: Vec<&Hash> = self.objects.keys().collect();
        hashes.sort_unstable();
        let mut feeds: Vec<&PubKey> = self.feeds.keys().collect();
        feeds.sort_unstable();

        let mut ops = Vec::with_capacity(hashes.len() + feeds.len() + self.roots.len());
        for hash in hashes {
            ops.push(LogOp::Set {
                hash: *hash,
                data: self.objects[hash].clone(),
            });
        }
        for feed in feeds {
            ops.push(LogOp::AddFeed { feed: *feed });
            for (seq, hash) in self.entries(feed, Order::Ascending) {
                ops.push(LogOp::AddRoot {
                    feed: *feed,
                    root: self.indexed_root(feed, seq, &hash).clone(),
                });
            }
        }
        ops
    }
}

/// The feed index points at a root that is not stored. Only a bug in the
/// store itself gets here; the data can no longer be trusted.
#[cold]
fn broken_index(feed: &PubKey, seq: u64, hash: &Hash) -> ! {
    panic!(
        "broken db: feed {} indexes root {} at seq {}, but no such root is stored",
        feed.short_hex(),
        hash.short_hex(),
        seq
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed() -> PubKey {
        PubKey::from_raw([1; 32])
    }

    fn root(seq: u64) -> RootRecord {
        let prev = if seq == 0 {
            Hash::zero()
        } else {
            Hash::sum(format!("root-{}", seq - 1).as_bytes())
        };
        RootRecord::new(seq, prev, format!("root-{seq}").into_bytes())
    }

    fn state_with(seqs: &[u64]) -> DbState {
        let mut state = DbState::default();
        for &seq in seqs {
            state.insert_root(feed(), root(seq));
        }
        state
    }

    fn seqs(state: &DbState, feed: &PubKey, order: Order) -> Vec<u64> {
        state.entries(feed, order).into_iter().map(|(seq, _)| seq).collect()
    }

    #[test]
    fn entries_are_sorted_both_ways() {
        let state = state_with(&[9, 2, 5]);
        assert_eq!(seqs(&state, &feed(), Order::Ascending), vec![2, 5, 9]);
        assert_eq!(seqs(&state, &feed(), Order::Descending), vec![9, 5, 2]);
        assert!(seqs(&state, &PubKey::from_raw([2; 32]), Order::Ascending).is_empty());
        assert_eq!(state.entries(&feed(), Order::Ascending)[0], (2, root(2).hash));
    }

    #[test]
    fn seqs_before_is_strict() {
        let state = state_with(&[7, 1, 5, 2]);
        assert_eq!(state.seqs_before(&feed(), 5), vec![1, 2]);
        assert!(state.seqs_before(&feed(), 0).is_empty());
    }

    #[test]
    fn strict_policy_checks_both_neighbours() {
        let state = state_with(&[1, 3]);

        let mut bad_parent = root(2);
        bad_parent.prev = Hash::sum(b"elsewhere");
        assert!(state.check_insert(&feed(), &bad_parent, ChainPolicy::Trusting).is_ok());
        assert!(state.check_insert(&feed(), &bad_parent, ChainPolicy::Strict).is_err());

        // root 3 expects prev = hash("root-2"); a different payload at 2 breaks it.
        let bad_child = RootRecord::new(2, root(2).prev, b"other".to_vec());
        assert!(state.check_insert(&feed(), &bad_child, ChainPolicy::Strict).is_err());

        assert!(state.check_insert(&feed(), &root(2), ChainPolicy::Strict).is_ok());
    }

    #[test]
    fn taken_hash_is_rejected_in_any_feed() {
        let state = state_with(&[1]);
        let same_payload = RootRecord::new(2, Hash::sum(b"p1"), b"root-1".to_vec());
        assert!(matches!(
            state.check_insert(&feed(), &same_payload, ChainPolicy::Trusting),
            Err(DataError::RootHashTaken { seq: 2, owner_seq: 1, .. })
        ));

        let other = PubKey::from_raw([2; 32]);
        let err = state
            .check_insert(&other, &root(1), ChainPolicy::Trusting)
            .unwrap_err();
        assert!(matches!(
            err,
            DataError::RootHashTaken { feed: taker, owner, .. } if taker == other && owner == feed()
        ));
    }

    #[test]
    fn snapshot_rebuilds_state() {
        let mut state = state_with(&[0, 1, 2]);
        state.set(Hash::sum(b"obj"), Bytes::from_static(b"obj"));
        state.add_feed(PubKey::from_raw([5; 32]));

        let mut rebuilt = DbState::default();
        for op in state.snapshot() {
            rebuilt.apply(op);
        }
        assert_eq!(rebuilt.stat(), state.stat());
        assert_eq!(rebuilt.last_root(&feed()), Some(root(2)));
        assert!(rebuilt.has_feed(&PubKey::from_raw([5; 32])));
    }

    #[test]
    #[should_panic(expected = "broken db")]
    fn missing_root_behind_index_is_fatal() {
        let mut state = state_with(&[1, 3, 2]);
        state.roots.remove(&root(3).hash);
        state.last_root(&feed());
    }

    #[test]
    #[should_panic(expected = "broken db")]
    fn stat_over_broken_index_is_fatal() {
        let mut state = state_with(&[1]);
        state.roots.clear();
        state.stat();
    }
}

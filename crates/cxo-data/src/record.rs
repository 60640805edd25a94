use bytes::Bytes;
use serde::{Deserialize, Serialize};

use cxo_crypto::{ChainError, ChainLink, ChainVerifier, SignatureError, SigningKey, VerifyingKey};
use cxo_types::{Hash, PubKey, Sig};

use crate::stat::{Space, ROOT_OVERHEAD};

/// One entry of a feed's root chain.
///
/// A root is a signed snapshot of the feed owner's state at `seq`. It is
/// linked to its predecessor through `prev` and addressed by `hash`, the
/// content hash of `payload`. Roots are immutable once stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootRecord {
    /// Sequence number, assigned by the feed owner.
    pub seq: u64,
    /// Hash of the previous root. Zero only at `seq == 0`.
    pub prev: Hash,
    /// Encoded snapshot.
    pub payload: Bytes,
    /// Hash of `payload`.
    pub hash: Hash,
    /// Owner's signature of `hash`.
    pub sig: Sig,
}

impl RootRecord {
    /// Build an unsigned root, computing its hash from the payload.
    pub fn new(seq: u64, prev: Hash, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Self {
            seq,
            prev,
            hash: Hash::sum(&payload),
            payload,
            sig: Sig::zero(),
        }
    }

    /// Sign the root hash with the feed owner's key.
    pub fn sign(&mut self, key: &SigningKey) {
        self.sig = key.sign_hash(&self.hash);
    }

    /// Builder form of [`sign`](Self::sign).
    pub fn signed(mut self, key: &SigningKey) -> Self {
        self.sign(key);
        self
    }

    /// Check the signature against the feed key.
    ///
    /// The store never calls this; the replication layer does before it
    /// hands a root to [`Db::add_root`](crate::Db::add_root).
    pub fn verify(&self, feed: &PubKey) -> Result<(), SignatureError> {
        VerifyingKey::from_pubkey(feed)?.verify_hash(&self.hash, &self.sig)
    }

    /// Check the structural rules enforced on insertion.
    pub fn check(&self) -> Result<(), ChainError> {
        ChainVerifier::check_record(self)
    }

    /// Estimated storage footprint: payload plus fixed-width fields.
    pub fn space(&self) -> Space {
        Space(self.payload.len() as u64 + ROOT_OVERHEAD)
    }
}

impl ChainLink for RootRecord {
    fn seq(&self) -> u64 {
        self.seq
    }

    fn hash(&self) -> Hash {
        self.hash
    }

    fn prev(&self) -> Hash {
        self.prev
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }
}

use cxo_types::Hash;

/// A record that participates in a feed's root chain.
pub trait ChainLink {
    /// Sequence number assigned by the feed owner.
    fn seq(&self) -> u64;
    /// The record's own content hash.
    fn hash(&self) -> Hash;
    /// Hash of the previous record (zero for sequence 0).
    fn prev(&self) -> Hash;
    /// Bytes the content hash is computed over.
    fn payload(&self) -> &[u8];
}

/// Root chain integrity verifier.
///
/// Two levels of checks:
/// - [`check_record`](Self::check_record): the structural rules every record
///   must satisfy on its own (genesis has no `prev`, later records do, and the
///   hash matches the payload).
/// - [`check_link`](Self::check_link) / [`verify_chain`](Self::verify_chain):
///   continuity between records at consecutive sequence numbers. Chains may
///   have gaps (trimmed or not yet received records); only adjacent pairs that
///   are both present are compared.
pub struct ChainVerifier;

impl ChainVerifier {
    /// Verify the structural rules of a single record.
    pub fn check_record(link: &impl ChainLink) -> Result<(), ChainError> {
        let seq = link.seq();
        if seq == 0 {
            if !link.prev().is_zero() {
                return Err(ChainError::UnexpectedPrev { seq });
            }
        } else if link.prev().is_zero() {
            return Err(ChainError::MissingPrev { seq });
        }
        if !link.hash().matches(link.payload()) {
            return Err(ChainError::HashMismatch { seq });
        }
        Ok(())
    }

    /// Verify that `child` directly follows `parent`.
    ///
    /// Records that are not at consecutive sequence numbers are not linked
    /// and always pass.
    pub fn check_link(parent: &impl ChainLink, child: &impl ChainLink) -> Result<(), ChainError> {
        if parent.seq().checked_add(1) != Some(child.seq()) {
            return Ok(());
        }
        if child.prev() != parent.hash() {
            return Err(ChainError::BrokenLink { seq: child.seq() });
        }
        Ok(())
    }

    /// Verify a chain given in ascending sequence order.
    ///
    /// Checks:
    /// 1. Sequence numbers strictly increase
    /// 2. Every record passes [`check_record`](Self::check_record)
    /// 3. Every adjacent pair passes [`check_link`](Self::check_link)
    pub fn verify_chain<L: ChainLink>(links: &[L]) -> Result<(), ChainError> {
        for (i, link) in links.iter().enumerate() {
            Self::check_record(link)?;
            if i == 0 {
                continue;
            }
            let parent = &links[i - 1];
            if link.seq() <= parent.seq() {
                return Err(ChainError::OutOfOrder { seq: link.seq() });
            }
            Self::check_link(parent, link)?;
        }
        Ok(())
    }
}

/// Errors from chain verification.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum ChainError {
    #[error("unexpected prev. reference at seq {seq}")]
    UnexpectedPrev { seq: u64 },

    #[error("missing prev. reference at seq {seq}")]
    MissingPrev { seq: u64 },

    #[error("wrong hash of the root at seq {seq}")]
    HashMismatch { seq: u64 },

    #[error("broken link at seq {seq}: prev does not match the previous root")]
    BrokenLink { seq: u64 },

    #[error("seq {seq} is out of order")]
    OutOfOrder { seq: u64 },
}

impl ChainError {
    /// Sequence number of the offending record.
    pub fn seq(&self) -> u64 {
        match *self {
            Self::UnexpectedPrev { seq }
            | Self::MissingPrev { seq }
            | Self::HashMismatch { seq }
            | Self::BrokenLink { seq }
            | Self::OutOfOrder { seq } => seq,
        }
    }
}

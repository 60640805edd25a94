//! Cryptographic primitives for CXO.
//!
//! Provides ed25519 feed keys for signing root records and a verifier for
//! the `prev` links of a feed's root chain. Content hashing itself lives on
//! [`cxo_types::Hash::sum`].
//!
//! All crypto operations wrap established libraries; there is no custom cryptography.

pub mod chain;
pub mod signer;

pub use chain::{ChainError, ChainLink, ChainVerifier};
pub use signer::{SignatureError, SigningKey, VerifyingKey};

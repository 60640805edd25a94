//! Foundation types for CXO.
//!
//! Every other CXO crate depends on `cxo-types`. The types here are small,
//! `Copy`, fixed-width byte arrays with hex formatting:
//!
//! - [`Hash`]: BLAKE3 content address of objects and root records
//! - [`PubKey`]: ed25519 public key identifying a feed
//! - [`Sig`]: ed25519 signature attached to a root record

pub mod error;
pub mod hash;
pub mod keys;

pub use error::TypeError;
pub use hash::Hash;
pub use keys::{PubKey, Sig};

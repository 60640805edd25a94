use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{decode_hex, TypeError};

/// Public key identifying a feed.
///
/// Holds the raw bytes of an ed25519 verifying key. The store treats it as
/// an opaque identifier; `cxo-crypto` turns it back into a verifying key
/// when a signature has to be checked.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PubKey([u8; 32]);

impl PubKey {
    pub const LEN: usize = 32;

    pub const fn from_raw(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short identifier (first 8 hex characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        decode_hex(s).map(Self)
    }
}

impl fmt::Debug for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PubKey({})", self.short_hex())
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for PubKey {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Signature over a root record hash.
///
/// 64 raw ed25519 signature bytes. The all-zero value means "unsigned";
/// the store never verifies signatures itself.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sig(#[serde(with = "sig_serde")] [u8; 64]);

impl Sig {
    pub const LEN: usize = 64;

    pub const fn from_raw(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// The empty signature (all zeros).
    pub const fn zero() -> Self {
        Self([0u8; 64])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 64]
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        decode_hex(s).map(Self)
    }
}

impl Default for Sig {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Debug for Sig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sig({}...)", hex::encode(&self.0[..8]))
    }
}

mod sig_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(sig: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(sig)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 64], D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Vec::deserialize(deserializer)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 64-byte signature"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pubkey_hex_roundtrip() {
        let pk = PubKey::from_raw([0xab; 32]);
        assert_eq!(pk.to_hex().parse::<PubKey>().unwrap(), pk);
        assert_eq!(format!("{pk:?}"), "PubKey(abababab)");
    }

    #[test]
    fn pubkey_rejects_wrong_length() {
        let err = PubKey::from_hex(&hex::encode([1u8; 33])).unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidLength {
                expected: 32,
                actual: 33
            }
        );
    }

    #[test]
    fn sig_zero_is_default() {
        assert!(Sig::default().is_zero());
        assert!(!Sig::from_raw([1; 64]).is_zero());
    }

    #[test]
    fn sig_survives_bincode() {
        let sig = Sig::from_raw([7; 64]);
        let encoded = bincode::serialize(&sig).unwrap();
        let decoded: Sig = bincode::deserialize(&encoded).unwrap();
        assert_eq!(sig, decoded);
    }

    #[test]
    fn sig_json_rejects_short_input() {
        let err = serde_json::from_str::<Sig>("[1,2,3]").unwrap_err();
        assert!(err.to_string().contains("64-byte"));
    }

    #[test]
    fn sig_hex_roundtrip() {
        let sig = Sig::from_raw([0x5a; 64]);
        assert_eq!(Sig::from_hex(&sig.to_hex()).unwrap(), sig);
    }
}

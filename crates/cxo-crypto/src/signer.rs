use cxo_types::{Hash, PubKey, Sig};

/// Ed25519 signing key (private) of a feed owner.
pub struct SigningKey(ed25519_dalek::SigningKey);

/// Ed25519 verifying key (public) of a feed.
#[derive(Clone, PartialEq, Eq)]
pub struct VerifyingKey(ed25519_dalek::VerifyingKey);

impl SigningKey {
    /// Generate a new random signing key.
    pub fn generate() -> Self {
        let mut csprng = rand::thread_rng();
        Self(ed25519_dalek::SigningKey::generate(&mut csprng))
    }

    /// Create from raw 32-byte secret.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(&bytes))
    }

    /// The feed public key for this secret.
    pub fn public_key(&self) -> PubKey {
        PubKey::from_raw(self.0.verifying_key().to_bytes())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey(self.0.verifying_key())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Sig {
        use ed25519_dalek::Signer;
        Sig::from_raw(self.0.sign(message).to_bytes())
    }

    /// Sign a content hash (how root records are signed).
    pub fn sign_hash(&self, hash: &Hash) -> Sig {
        self.sign(hash.as_bytes())
    }

    /// Raw secret key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl VerifyingKey {
    /// Interpret a feed public key as an ed25519 verifying key.
    pub fn from_pubkey(pk: &PubKey) -> Result<Self, SignatureError> {
        let key = ed25519_dalek::VerifyingKey::from_bytes(pk.as_bytes())
            .map_err(|_| SignatureError::InvalidKey)?;
        Ok(Self(key))
    }

    /// Verify a signature on a message.
    pub fn verify(&self, message: &[u8], sig: &Sig) -> Result<(), SignatureError> {
        use ed25519_dalek::Verifier;
        let sig = ed25519_dalek::Signature::from_bytes(sig.as_bytes());
        self.0
            .verify(message, &sig)
            .map_err(|_| SignatureError::InvalidSignature)
    }

    /// Verify a signature over a content hash.
    pub fn verify_hash(&self, hash: &Hash, sig: &Sig) -> Result<(), SignatureError> {
        self.verify(hash.as_bytes(), sig)
    }

    pub fn to_pubkey(&self) -> PubKey {
        PubKey::from_raw(self.0.to_bytes())
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningKey(<redacted>)")
    }
}

impl std::fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VerifyingKey({})", hex::encode(self.0.to_bytes()))
    }
}

/// Errors from signing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid key")]
    InvalidKey,
}

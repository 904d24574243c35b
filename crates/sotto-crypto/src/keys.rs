//! Key types with zeroization and redacted debug output.
//!
//! An identity pairs an X25519 key (Diffie-Hellman agreement) with an
//! Ed25519 key (prekey signing). Agreement keys appear in session state and
//! therefore serialize; signing keys never leave the owner's vault.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, Result};

/// Length in bytes of every key type here.
pub const KEY_LEN: usize = 32;

/// An X25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; KEY_LEN]);

impl PublicKey {
    /// Construct from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    fn to_x25519(self) -> X25519PublicKey {
        X25519PublicKey::from(self.0)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

impl From<X25519PublicKey> for PublicKey {
    fn from(key: X25519PublicKey) -> Self {
        Self(*key.as_bytes())
    }
}

/// An X25519 secret key; zeroizes on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(StaticSecret);

impl SecretKey {
    /// Generate a fresh secret key.
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        Self(StaticSecret::random_from_rng(rng))
    }

    /// Construct from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// The corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(X25519PublicKey::from(&self.0))
    }

    /// Diffie-Hellman agreement with a peer's public key.
    pub fn diffie_hellman(&self, peer: &PublicKey) -> DhOutput {
        DhOutput(*self.0.diffie_hellman(&peer.to_x25519()).as_bytes())
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

impl Serialize for SecretKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.to_bytes().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SecretKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = <[u8; KEY_LEN]>::deserialize(deserializer)?;
        Ok(Self::from_bytes(bytes))
    }
}

/// Output of a Diffie-Hellman agreement; zeroizes on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DhOutput([u8; KEY_LEN]);

impl DhOutput {
    /// Raw shared-secret bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for DhOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DhOutput([REDACTED])")
    }
}

#[cfg(test)]
impl DhOutput {
    pub(crate) fn for_tests(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }
}

/// A long-term identity: X25519 agreement key plus Ed25519 signing key.
///
/// Created once per account and never rotated; the signing half only ever
/// signs prekeys.
pub struct IdentityKeyPair {
    dh: SecretKey,
    signing: SigningKey,
}

impl IdentityKeyPair {
    /// Generate a fresh identity.
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        Self { dh: SecretKey::generate(rng), signing: SigningKey::generate(rng) }
    }

    /// The public agreement key.
    pub fn public_key(&self) -> PublicKey {
        self.dh.public_key()
    }

    /// The public verification key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// The secret agreement key.
    pub fn secret_key(&self) -> &SecretKey {
        &self.dh
    }

    /// Sign `message` under the identity's signing key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair").field("public", &self.public_key()).finish()
    }
}

/// Verify an Ed25519 signature.
pub fn verify_signature(
    verifying_key: &VerifyingKey,
    message: &[u8],
    signature: &Signature,
) -> Result<()> {
    verifying_key.verify(message, signature).map_err(|_| CryptoError::InvalidSignature)
}

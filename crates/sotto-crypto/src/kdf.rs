//! Key derivation and AEAD.
//!
//! Three derivations drive the protocol, all over HKDF-SHA256 or HMAC-SHA256:
//!
//! - [`derive_agreement_secret`] condenses the X3DH DH outputs into the
//!   initial shared secret.
//! - [`kdf_root`] advances the root key on a DH ratchet step, yielding a new
//!   root and a fresh chain key.
//! - [`kdf_chain`] advances a sending or receiving chain by one message,
//!   yielding the next chain key and a single-use message key.
//!
//! Payload encryption is ChaCha20-Poly1305. Each message key is used for
//! exactly one message, so the nonce only needs to be unique per key; it is
//! derived from the message counter.

use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, Result};
use crate::keys::DhOutput;

const AGREEMENT_INFO: &[u8] = b"sotto/x3dh/v1";
const ROOT_INFO: &[u8] = b"sotto/ratchet/root/v1";

/// AEAD nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// Symmetric key length in bytes.
pub const KEY_LEN: usize = 32;

/// A 256-bit symmetric key; zeroizes on drop, redacted in debug output.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    /// Construct from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

/// Condense the X3DH DH outputs into the session's initial secret.
///
/// `SK = HKDF(0xFF^32 || DH1 || DH2 || DH3 || [DH4])` with a zero salt. The
/// leading constant block domain-separates the input from raw DH output. The
/// optional fourth agreement is present when the responder offered a one-time
/// prekey.
pub fn derive_agreement_secret(
    dh1: &DhOutput,
    dh2: &DhOutput,
    dh3: &DhOutput,
    dh4: Option<&DhOutput>,
) -> SymmetricKey {
    const PREFIX: [u8; 32] = [0xFF; 32];

    let mut input = Vec::with_capacity(32 * 5);
    input.extend_from_slice(&PREFIX);
    input.extend_from_slice(dh1.as_bytes());
    input.extend_from_slice(dh2.as_bytes());
    input.extend_from_slice(dh3.as_bytes());
    if let Some(dh4) = dh4 {
        input.extend_from_slice(dh4.as_bytes());
    }

    let salt = [0u8; 32];
    let hkdf = Hkdf::<Sha256>::new(Some(&salt), &input);
    let mut output = [0u8; KEY_LEN];
    if hkdf.expand(AGREEMENT_INFO, &mut output).is_err() {
        // 32-byte output is always valid for HKDF-SHA256
        unreachable!()
    }

    input.zeroize();
    SymmetricKey(output)
}

/// Root KDF for a DH ratchet step.
///
/// `(RK', CK) = HKDF(salt = RK, ikm = DH_out)`, split into the new root key
/// and the first chain key of the new chain.
pub fn kdf_root(root_key: &SymmetricKey, dh_output: &DhOutput) -> (SymmetricKey, SymmetricKey) {
    let hkdf = Hkdf::<Sha256>::new(Some(root_key.as_bytes()), dh_output.as_bytes());
    let mut output = [0u8; KEY_LEN * 2];
    if hkdf.expand(ROOT_INFO, &mut output).is_err() {
        // 64-byte output is always valid for HKDF-SHA256
        unreachable!()
    }

    let mut new_root = [0u8; KEY_LEN];
    let mut chain = [0u8; KEY_LEN];
    new_root.copy_from_slice(&output[..KEY_LEN]);
    chain.copy_from_slice(&output[KEY_LEN..]);
    output.zeroize();

    (SymmetricKey(new_root), SymmetricKey(chain))
}

/// Chain KDF for one message step.
///
/// `MK = HMAC(CK, 0x01)`, `CK' = HMAC(CK, 0x02)`. Returns
/// `(next_chain_key, message_key)`; the caller discards the old chain key,
/// which is what makes earlier traffic unrecoverable from later state.
pub fn kdf_chain(chain_key: &SymmetricKey) -> (SymmetricKey, SymmetricKey) {
    (hmac_step(chain_key, 0x02), hmac_step(chain_key, 0x01))
}

fn hmac_step(key: &SymmetricKey, label: u8) -> SymmetricKey {
    type HmacSha256 = Hmac<Sha256>;

    let mut mac = match <HmacSha256 as Mac>::new_from_slice(key.as_bytes()) {
        Ok(mac) => mac,
        // HMAC-SHA256 accepts any key length
        Err(_) => unreachable!(),
    };
    mac.update(&[label]);
    SymmetricKey(mac.finalize().into_bytes().into())
}

/// Nonce for a message key: the message counter, zero-padded.
///
/// Safe because each message key encrypts exactly one message.
pub fn message_nonce(message_number: u32) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..4].copy_from_slice(&message_number.to_le_bytes());
    nonce
}

/// Encrypt with ChaCha20-Poly1305.
///
/// Associated data is authenticated but not encrypted; the 16-byte tag is
/// appended to the ciphertext.
pub fn encrypt(
    key: &SymmetricKey,
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad: associated_data })
        .map_err(|_| CryptoError::DecryptFailed)
}

/// Decrypt with ChaCha20-Poly1305, verifying the tag in constant time.
///
/// # Errors
///
/// [`CryptoError::DecryptFailed`] if the key, nonce, associated data, or
/// ciphertext do not match what was encrypted.
pub fn decrypt(
    key: &SymmetricKey,
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad: associated_data })
        .map_err(|_| CryptoError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreement_secret_is_deterministic() {
        let dh1 = DhOutput::for_tests([1u8; 32]);
        let dh2 = DhOutput::for_tests([2u8; 32]);
        let dh3 = DhOutput::for_tests([3u8; 32]);

        let a = derive_agreement_secret(&dh1, &dh2, &dh3, None);
        let b = derive_agreement_secret(&dh1, &dh2, &dh3, None);
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn one_time_prekey_changes_the_secret() {
        let dh1 = DhOutput::for_tests([1u8; 32]);
        let dh2 = DhOutput::for_tests([2u8; 32]);
        let dh3 = DhOutput::for_tests([3u8; 32]);
        let dh4 = DhOutput::for_tests([4u8; 32]);

        let without = derive_agreement_secret(&dh1, &dh2, &dh3, None);
        let with = derive_agreement_secret(&dh1, &dh2, &dh3, Some(&dh4));
        assert_ne!(without.as_bytes(), with.as_bytes());
    }

    #[test]
    fn chain_steps_produce_distinct_keys() {
        let chain = SymmetricKey::from_bytes([42u8; KEY_LEN]);
        let (next, mk1) = kdf_chain(&chain);
        let (_, mk2) = kdf_chain(&next);

        assert_ne!(mk1.as_bytes(), mk2.as_bytes());
        assert_ne!(chain.as_bytes(), next.as_bytes());
    }

    #[test]
    fn encrypt_then_decrypt_roundtrips() {
        let key = SymmetricKey::from_bytes([7u8; KEY_LEN]);
        let nonce = message_nonce(3);

        let ciphertext = encrypt(&key, &nonce, b"payload", b"header").unwrap();
        let plaintext = decrypt(&key, &nonce, &ciphertext, b"header").unwrap();
        assert_eq!(plaintext, b"payload");
    }

    #[test]
    fn wrong_associated_data_fails() {
        let key = SymmetricKey::from_bytes([7u8; KEY_LEN]);
        let nonce = message_nonce(0);

        let ciphertext = encrypt(&key, &nonce, b"payload", b"header").unwrap();
        let result = decrypt(&key, &nonce, &ciphertext, b"other");
        assert_eq!(result, Err(CryptoError::DecryptFailed));
    }
}

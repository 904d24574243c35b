//! Per-message key ratcheting.
//!
//! Combines a symmetric-key ratchet (a new message key per message) with a
//! DH ratchet (a new shared secret whenever the remote side's ratchet key
//! changes). Every encrypt and decrypt advances state; old message keys are
//! discarded immediately, so a compromised later state cannot decrypt
//! earlier traffic.
//!
//! Out-of-order delivery within a chain is tolerated: keys for skipped
//! message numbers are retained (bounded by [`MAX_SKIPPED_KEYS`]) and
//! removed when their message arrives.
//!
//! The whole state serializes with serde, which is how a session survives a
//! process restart: the owning layer snapshots it into a blob after every
//! successful step.

use std::collections::HashMap;

use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{CryptoError, Result};
use crate::kdf::{self, SymmetricKey, kdf_chain, kdf_root};
use crate::keys::{PublicKey, SecretKey};

/// Upper bound on retained skipped-message keys per session.
pub const MAX_SKIPPED_KEYS: usize = 512;

/// Plaintext header carried with every ratchet message.
///
/// Not encrypted, but bound into the AEAD associated data, so tampering is
/// detected at decrypt time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatchetHeader {
    /// Sender's current DH ratchet public key.
    pub ratchet_key: PublicKey,
    /// Length of the sender's previous sending chain.
    pub previous_chain_length: u32,
    /// Message number within the current sending chain.
    pub message_number: u32,
}

impl RatchetHeader {
    /// Canonical byte encoding, used as AEAD associated data.
    pub fn to_bytes(&self) -> [u8; 40] {
        let mut bytes = [0u8; 40];
        bytes[..32].copy_from_slice(self.ratchet_key.as_bytes());
        bytes[32..36].copy_from_slice(&self.previous_chain_length.to_le_bytes());
        bytes[36..].copy_from_slice(&self.message_number.to_le_bytes());
        bytes
    }
}

/// One encrypted message: header plus ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatchetMessage {
    /// Plaintext (authenticated) header.
    pub header: RatchetHeader,
    /// AEAD ciphertext with appended tag.
    pub ciphertext: Vec<u8>,
}

/// Ratchet state for one session.
///
/// Cloneable so callers can attempt a decrypt on a copy and commit only on
/// success, keeping a failed decrypt from corrupting live state.
#[derive(Clone, Serialize, Deserialize)]
pub struct DoubleRatchet {
    root_key: SymmetricKey,
    send_chain: Option<SymmetricKey>,
    recv_chain: Option<SymmetricKey>,
    ratchet_key: SecretKey,
    remote_ratchet_key: Option<PublicKey>,
    send_count: u32,
    recv_count: u32,
    previous_chain_length: u32,
    skipped: HashMap<(PublicKey, u32), SymmetricKey>,
}

impl DoubleRatchet {
    /// Initialize on the initiating side.
    ///
    /// `remote_ratchet_key` is the responder's signed prekey: it doubles as
    /// the responder's first ratchet key, which is what lets the initiator
    /// start sending before the responder has ever been online.
    pub fn initiator<R: CryptoRngCore>(
        rng: &mut R,
        shared_secret: SymmetricKey,
        remote_ratchet_key: PublicKey,
    ) -> Self {
        let ratchet_key = SecretKey::generate(rng);
        let dh = ratchet_key.diffie_hellman(&remote_ratchet_key);
        let (root_key, send_chain) = kdf_root(&shared_secret, &dh);

        Self {
            root_key,
            send_chain: Some(send_chain),
            recv_chain: None,
            ratchet_key,
            remote_ratchet_key: Some(remote_ratchet_key),
            send_count: 0,
            recv_count: 0,
            previous_chain_length: 0,
            skipped: HashMap::new(),
        }
    }

    /// Initialize on the responding side.
    ///
    /// `ratchet_key` is the responder's signed prekey secret, matching the
    /// public half the initiator ratcheted against.
    pub fn responder(shared_secret: SymmetricKey, ratchet_key: SecretKey) -> Self {
        Self {
            root_key: shared_secret,
            send_chain: None,
            recv_chain: None,
            ratchet_key,
            remote_ratchet_key: None,
            send_count: 0,
            recv_count: 0,
            previous_chain_length: 0,
            skipped: HashMap::new(),
        }
    }

    /// Number of ratchet steps taken in the current sending chain.
    pub fn send_count(&self) -> u32 {
        self.send_count
    }

    /// Encrypt one message, advancing the sending chain.
    ///
    /// # Errors
    ///
    /// [`CryptoError::NoSendChain`] if this side has never ratcheted toward
    /// the peer (responder before its first send after a received message).
    pub fn encrypt(&mut self, plaintext: &[u8], associated_data: &[u8]) -> Result<RatchetMessage> {
        let chain = self.send_chain.as_ref().ok_or(CryptoError::NoSendChain)?;
        let (next_chain, message_key) = kdf_chain(chain);
        self.send_chain = Some(next_chain);

        let header = RatchetHeader {
            ratchet_key: self.ratchet_key.public_key(),
            previous_chain_length: self.previous_chain_length,
            message_number: self.send_count,
        };

        let ciphertext = kdf::encrypt(
            &message_key,
            &kdf::message_nonce(header.message_number),
            plaintext,
            &with_header(associated_data, &header),
        )?;

        self.send_count += 1;
        Ok(RatchetMessage { header, ciphertext })
    }

    /// Decrypt one message, advancing the receiving chain.
    ///
    /// A new remote ratchet key in the header triggers a DH ratchet step
    /// first. State is mutated even when decryption ultimately fails, so
    /// callers that need transactional behavior should decrypt on a clone.
    ///
    /// # Errors
    ///
    /// [`CryptoError::DecryptFailed`] on authentication failure,
    /// [`CryptoError::TooManySkippedKeys`] if the header's message number
    /// would skip past the retention bound.
    pub fn decrypt<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
        message: &RatchetMessage,
        associated_data: &[u8],
    ) -> Result<Vec<u8>> {
        // A message from an out-of-order chain position we already passed.
        let skipped_slot = (message.header.ratchet_key, message.header.message_number);
        if let Some(message_key) = self.skipped.remove(&skipped_slot) {
            return self.open(message, &message_key, associated_data);
        }

        if Some(message.header.ratchet_key) != self.remote_ratchet_key {
            self.skip_to(message.header.previous_chain_length)?;
            self.turn(rng, message.header.ratchet_key);
        }

        self.skip_to(message.header.message_number)?;

        let chain = self.recv_chain.as_ref().ok_or(CryptoError::NoRecvChain)?;
        let (next_chain, message_key) = kdf_chain(chain);
        let plaintext = self.open(message, &message_key, associated_data)?;

        self.recv_chain = Some(next_chain);
        self.recv_count += 1;
        Ok(plaintext)
    }

    /// DH ratchet step: fold the new remote key into the root, then rotate
    /// our own ratchet key and derive the next sending chain.
    fn turn<R: CryptoRngCore>(&mut self, rng: &mut R, remote: PublicKey) {
        self.previous_chain_length = self.send_count;
        self.send_count = 0;
        self.recv_count = 0;

        let dh = self.ratchet_key.diffie_hellman(&remote);
        let (root_key, recv_chain) = kdf_root(&self.root_key, &dh);
        self.root_key = root_key;
        self.recv_chain = Some(recv_chain);
        self.remote_ratchet_key = Some(remote);

        self.ratchet_key = SecretKey::generate(rng);
        let dh = self.ratchet_key.diffie_hellman(&remote);
        let (root_key, send_chain) = kdf_root(&self.root_key, &dh);
        self.root_key = root_key;
        self.send_chain = Some(send_chain);
    }

    /// Derive and retain message keys for skipped chain positions.
    fn skip_to(&mut self, until: u32) -> Result<()> {
        if until <= self.recv_count {
            return Ok(());
        }
        let Some(chain) = self.recv_chain.as_ref() else {
            // No receiving chain yet: nothing to skip, the DH step will
            // create one.
            return Ok(());
        };
        if (until - self.recv_count) as usize > MAX_SKIPPED_KEYS
            || self.skipped.len() + (until - self.recv_count) as usize > MAX_SKIPPED_KEYS
        {
            return Err(CryptoError::TooManySkippedKeys);
        }
        let Some(remote) = self.remote_ratchet_key else {
            return Ok(());
        };

        let mut chain = chain.clone();
        for number in self.recv_count..until {
            let (next_chain, message_key) = kdf_chain(&chain);
            self.skipped.insert((remote, number), message_key);
            chain = next_chain;
        }
        self.recv_chain = Some(chain);
        self.recv_count = until;
        Ok(())
    }

    fn open(
        &self,
        message: &RatchetMessage,
        message_key: &SymmetricKey,
        associated_data: &[u8],
    ) -> Result<Vec<u8>> {
        kdf::decrypt(
            message_key,
            &kdf::message_nonce(message.header.message_number),
            &message.ciphertext,
            &with_header(associated_data, &message.header),
        )
    }
}

fn with_header(associated_data: &[u8], header: &RatchetHeader) -> Vec<u8> {
    let mut data = Vec::with_capacity(associated_data.len() + 40);
    data.extend_from_slice(associated_data);
    data.extend_from_slice(&header.to_bytes());
    data
}

impl std::fmt::Debug for DoubleRatchet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoubleRatchet")
            .field("send_count", &self.send_count)
            .field("recv_count", &self.recv_count)
            .field("skipped", &self.skipped.len())
            .finish()
    }
}

impl Zeroize for DoubleRatchet {
    fn zeroize(&mut self) {
        self.root_key.zeroize();
        if let Some(chain) = self.send_chain.as_mut() {
            chain.zeroize();
        }
        if let Some(chain) = self.recv_chain.as_mut() {
            chain.zeroize();
        }
        self.skipped.clear();
    }
}

impl Drop for DoubleRatchet {
    fn drop(&mut self) {
        self.zeroize();
    }
}

//! The cipher session state machine.
//!
//! A session exists for `(owner, peer)` or it does not - "uninitialized" is
//! the absence of a [`SessionRecord`] in the store. Once installed, a record
//! is `Established` (key agreement done, no traffic yet) and becomes
//! `Active` on the first successful ratchet step. Explicit reset deletes the
//! record and returns the pair to uninitialized.
//!
//! ```text
//! (no record) ──negotiate/bootstrap──> Established ──encrypt/decrypt──> Active
//!      ^                                                                  │
//!      └──────────────────────────── reset ────────────────────────────────┘
//! ```
//!
//! Every successful encrypt or decrypt advances ratchet state and must be
//! followed by persisting the record; the manager owns that write. Decrypt
//! failures leave the record untouched: the attempt runs against a clone and
//! is committed only on success.

use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use sotto_crypto::PublicKey;
use sotto_crypto::ratchet::{DoubleRatchet, RatchetMessage};
use sotto_crypto::x3dh::InitialMessage;
use sotto_proto::{EncryptedEnvelope, EnvelopeKind};

use crate::error::{SessionError, StoreError};

/// Lifecycle phase of an installed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    /// Key agreement complete; no ratchet step has succeeded yet.
    Established,
    /// At least one ratchet step has succeeded.
    Active,
}

/// Ciphertext framing of the first message of a session.
///
/// Carries the key agreement material the responder needs to bootstrap its
/// half of the session alongside the first ratchet message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PreKeyMessage {
    pub(crate) initial: InitialMessage,
    pub(crate) message: RatchetMessage,
}

/// Persisted state of one session, the unit the store holds per peer.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    peer_identity: PublicKey,
    phase: SessionPhase,
    /// Present on the initiator side until its first encrypt; its presence
    /// is what makes that envelope a `PreKey` envelope.
    pending_initial: Option<InitialMessage>,
    associated_data: Vec<u8>,
    ratchet: DoubleRatchet,
}

impl SessionRecord {
    /// Install the initiator side after key agreement.
    pub fn initiator(
        peer_identity: PublicKey,
        ratchet: DoubleRatchet,
        initial: InitialMessage,
        associated_data: Vec<u8>,
    ) -> Self {
        Self {
            peer_identity,
            phase: SessionPhase::Established,
            pending_initial: Some(initial),
            associated_data,
            ratchet,
        }
    }

    /// Install the responder side after bootstrapping from a `PreKey`
    /// envelope.
    pub fn responder(
        peer_identity: PublicKey,
        ratchet: DoubleRatchet,
        associated_data: Vec<u8>,
    ) -> Self {
        Self {
            peer_identity,
            phase: SessionPhase::Established,
            pending_initial: None,
            associated_data,
            ratchet,
        }
    }

    /// The peer identity this session was negotiated against.
    pub fn peer_identity(&self) -> &PublicKey {
        &self.peer_identity
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Encrypt one message, advancing the sending chain.
    ///
    /// The first initiator-side encrypt emits a [`EnvelopeKind::PreKey`]
    /// envelope embedding the key agreement material; every later envelope
    /// is [`EnvelopeKind::Normal`]. If the `PreKey` envelope is lost in
    /// transit the two sides desynchronize until an explicit reset and fresh
    /// negotiation - the session layer does not self-heal that.
    pub fn encrypt(
        &mut self,
        registration_id: u32,
        plaintext: &[u8],
    ) -> Result<EncryptedEnvelope, SessionError> {
        let message = self
            .ratchet
            .encrypt(plaintext, &self.associated_data)
            .map_err(|_| SessionError::Undecryptable)?;

        let envelope = match self.pending_initial.take() {
            Some(initial) => EncryptedEnvelope {
                kind: EnvelopeKind::PreKey,
                body: encode(&PreKeyMessage { initial, message })?,
                registration_id,
            },
            None => EncryptedEnvelope {
                kind: EnvelopeKind::Normal,
                body: encode(&message)?,
                registration_id,
            },
        };

        self.phase = SessionPhase::Active;
        Ok(envelope)
    }

    /// Decrypt one envelope, advancing the receiving chain.
    ///
    /// A `PreKey` envelope arriving on an already-installed session is
    /// unwrapped and its inner message decrypted with the existing state;
    /// the embedded agreement material is ignored so concurrent
    /// negotiations converge instead of silently overwriting.
    ///
    /// Runs against a clone of the ratchet and commits only on success, so
    /// a failed decrypt is recoverable per message.
    pub fn decrypt<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
        envelope: &EncryptedEnvelope,
    ) -> Result<Vec<u8>, SessionError> {
        let message = match envelope.kind {
            EnvelopeKind::PreKey => decode::<PreKeyMessage>(&envelope.body)?.message,
            EnvelopeKind::Normal => decode::<RatchetMessage>(&envelope.body)?,
        };

        let mut trial = self.ratchet.clone();
        let plaintext = trial
            .decrypt(rng, &message, &self.associated_data)
            .map_err(|_| SessionError::Undecryptable)?;

        self.ratchet = trial;
        self.phase = SessionPhase::Active;
        Ok(plaintext)
    }

    /// Serialize for persistence.
    pub fn to_blob(&self) -> Result<Vec<u8>, StoreError> {
        let mut blob = Vec::new();
        ciborium::ser::into_writer(self, &mut blob)
            .map_err(|error| StoreError::Backend(error.to_string()))?;
        Ok(blob)
    }

    /// Deserialize from a persisted blob.
    ///
    /// # Errors
    ///
    /// [`StoreError::Corrupt`] if the blob does not decode; callers treat
    /// that the same as a missing session and renegotiate.
    pub fn from_blob(blob: &[u8]) -> Result<Self, StoreError> {
        ciborium::de::from_reader(blob).map_err(|_| StoreError::Corrupt)
    }
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("peer_identity", &self.peer_identity)
            .field("phase", &self.phase)
            .field("pending_initial", &self.pending_initial.is_some())
            .finish()
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, SessionError> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)
        .map_err(|error| SessionError::Store(StoreError::Backend(error.to_string())))?;
    Ok(bytes)
}

pub(crate) fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, SessionError> {
    ciborium::de::from_reader(bytes).map_err(|_| SessionError::Undecryptable)
}

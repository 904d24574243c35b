//! Session orchestration.
//!
//! [`SessionManager`] is the single entry point the rest of the system uses
//! to encrypt and decrypt: it negotiates lazily, bootstraps responder
//! sessions from `PreKey` envelopes, persists after every successful
//! mutation, and strictly serializes everything per peer.
//!
//! # Concurrency
//!
//! Ratchet state is not safe under concurrent mutation. Every operation
//! that touches a session for `(owner, peer)` runs under a per-peer async
//! mutex, so concurrent encrypts, decrypts, and negotiations against the
//! same peer are totally ordered. Operations against different peers do not
//! contend. An in-flight negotiation is not cancellable mid-step; a caller
//! that needs a different outcome retries from scratch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand_core::CryptoRngCore;
use sotto_crypto::ratchet::DoubleRatchet;
use sotto_crypto::x3dh::{self, PreKeyBundle, ResponderKeys};
use sotto_proto::{EncryptedEnvelope, EnvelopeKind, UserId};

use crate::error::{NegotiationReason, SessionError, StoreError};
use crate::session::{PreKeyMessage, SessionRecord, decode, encode};
use crate::store::{BundleFetcher, SessionStore};
use crate::trust::{TrustDecision, TrustPolicy};
use crate::vault::PreKeyVault;

/// Owns a user's sessions: lazy negotiation, encrypt/decrypt, persistence,
/// and per-peer ordering.
pub struct SessionManager<S, F, T> {
    user: UserId,
    registration_id: u32,
    vault: Mutex<PreKeyVault>,
    store: S,
    fetcher: F,
    trust: T,
    peer_locks: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S, F, T> SessionManager<S, F, T>
where
    S: SessionStore,
    F: BundleFetcher,
    T: TrustPolicy,
{
    /// Wrap a vault with its storage, bundle source, and trust policy.
    pub fn new(vault: PreKeyVault, store: S, fetcher: F, trust: T) -> Self {
        Self {
            user: vault.user(),
            registration_id: vault.registration_id(),
            vault: Mutex::new(vault),
            store,
            fetcher,
            trust,
            peer_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The owning user.
    pub fn user(&self) -> UserId {
        self.user
    }

    /// CBOR-encoded public bundle for publication.
    pub fn publish_bundle(&self) -> Result<Vec<u8>, SessionError> {
        let bundle = self.lock_vault()?.publish();
        encode(&bundle)
    }

    /// Mint fresh one-time prekeys; the next published bundle offers them.
    pub fn replenish_prekeys<R: CryptoRngCore>(
        &self,
        rng: &mut R,
        count: u32,
    ) -> Result<(), SessionError> {
        self.lock_vault()?.replenish(rng, count);
        Ok(())
    }

    /// Establish a session with `peer` if none exists.
    ///
    /// No-op when a session is already on record unless `rekey` is set.
    /// Concurrent calls against the same peer converge: the second entrant
    /// observes the stored session and returns without overwriting it.
    pub async fn negotiate<R: CryptoRngCore>(
        &self,
        rng: &mut R,
        peer: UserId,
        rekey: bool,
    ) -> Result<(), SessionError> {
        let guard = self.peer_lock(peer)?;
        let _serialized = guard.lock().await;
        self.ensure_session(rng, peer, rekey).await.map(|_| ())
    }

    /// Encrypt `plaintext` for `peer`, negotiating first if no session
    /// exists.
    pub async fn encrypt<R: CryptoRngCore>(
        &self,
        rng: &mut R,
        peer: UserId,
        plaintext: &[u8],
    ) -> Result<EncryptedEnvelope, SessionError> {
        let guard = self.peer_lock(peer)?;
        let _serialized = guard.lock().await;

        let mut record = self.ensure_session(rng, peer, false).await?;
        let envelope = record.encrypt(self.registration_id, plaintext)?;
        self.persist(peer, &record).await?;
        Ok(envelope)
    }

    /// Decrypt an envelope from `peer`.
    ///
    /// A `PreKey` envelope with no session on record bootstraps one from
    /// the embedded agreement material - this is how a responder that never
    /// negotiated still reads the first message. Failures are per-message:
    /// the stored session, if any, is unchanged.
    pub async fn decrypt<R: CryptoRngCore>(
        &self,
        rng: &mut R,
        peer: UserId,
        envelope: &EncryptedEnvelope,
    ) -> Result<Vec<u8>, SessionError> {
        let guard = self.peer_lock(peer)?;
        let _serialized = guard.lock().await;

        if let Some(mut record) = self.load_record(peer).await? {
            let plaintext = record.decrypt(rng, envelope)?;
            self.persist(peer, &record).await?;
            return Ok(plaintext);
        }

        match envelope.kind {
            EnvelopeKind::Normal => Err(SessionError::NoSession(peer)),
            EnvelopeKind::PreKey => self.bootstrap(rng, peer, envelope).await,
        }
    }

    /// Destroy the session with `peer` and forget its identity pin.
    ///
    /// Returns the pair to uninitialized; the next encrypt negotiates from
    /// a freshly fetched bundle.
    pub async fn reset(&self, peer: UserId) -> Result<(), SessionError> {
        let guard = self.peer_lock(peer)?;
        let _serialized = guard.lock().await;

        self.store.delete_session(self.user, peer).await?;
        self.store.unpin_identity(self.user, peer).await?;
        tracing::info!(user = %self.user, %peer, "session reset");
        Ok(())
    }

    /// Load and decode the stored record, treating a corrupt blob as
    /// missing (it is deleted and a warning logged; the peers stay
    /// desynchronized until they renegotiate).
    async fn load_record(&self, peer: UserId) -> Result<Option<SessionRecord>, SessionError> {
        let Some(blob) = self.store.load_session(self.user, peer).await? else {
            return Ok(None);
        };
        match SessionRecord::from_blob(&blob) {
            Ok(record) => Ok(Some(record)),
            Err(_) => {
                tracing::warn!(user = %self.user, %peer, "discarding corrupt session blob");
                self.store.delete_session(self.user, peer).await?;
                Ok(None)
            },
        }
    }

    async fn ensure_session<R: CryptoRngCore>(
        &self,
        rng: &mut R,
        peer: UserId,
        rekey: bool,
    ) -> Result<SessionRecord, SessionError> {
        if !rekey {
            if let Some(record) = self.load_record(peer).await? {
                return Ok(record);
            }
        }

        let blob = self
            .fetcher
            .fetch(peer)
            .await?
            .ok_or(SessionError::BundleNotFound(peer))?;
        let bundle: PreKeyBundle = ciborium::de::from_reader(blob.as_slice())
            .map_err(|_| SessionError::BundleMalformed(peer))?;

        if bundle.verify().is_err() {
            return Err(SessionError::Negotiation {
                peer,
                reason: NegotiationReason::InvalidSignature,
            });
        }

        let pinned = self.store.load_pinned_identity(self.user, peer).await?;
        if self.trust.evaluate(peer, &bundle.identity_key, pinned.as_ref())
            == TrustDecision::Rejected
        {
            return Err(SessionError::Negotiation {
                peer,
                reason: NegotiationReason::UntrustedIdentity,
            });
        }

        let init = {
            let vault = self.lock_vault()?;
            x3dh::initiate(rng, vault.identity(), &bundle).map_err(|_| {
                SessionError::Negotiation { peer, reason: NegotiationReason::InvalidSignature }
            })?
        };

        let ratchet = DoubleRatchet::initiator(rng, init.shared_secret, bundle.signed_prekey);
        let record = SessionRecord::initiator(
            bundle.identity_key,
            ratchet,
            init.initial_message,
            init.associated_data,
        );

        self.store.pin_identity(self.user, peer, bundle.identity_key).await?;
        self.persist(peer, &record).await?;
        tracing::info!(user = %self.user, %peer, "session negotiated");
        Ok(record)
    }

    async fn bootstrap<R: CryptoRngCore>(
        &self,
        rng: &mut R,
        peer: UserId,
        envelope: &EncryptedEnvelope,
    ) -> Result<Vec<u8>, SessionError> {
        let pre: PreKeyMessage = decode(&envelope.body)?;
        let initial = pre.initial;

        let pinned = self.store.load_pinned_identity(self.user, peer).await?;
        if self.trust.evaluate(peer, &initial.identity_key, pinned.as_ref())
            == TrustDecision::Rejected
        {
            return Err(SessionError::Negotiation {
                peer,
                reason: NegotiationReason::UntrustedIdentity,
            });
        }

        let (agreement, ratchet_secret) = {
            let mut vault = self.lock_vault()?;
            if initial.signed_prekey_id != vault.signed_prekey_id() {
                return Err(SessionError::Negotiation {
                    peer,
                    reason: NegotiationReason::UnknownSignedPreKey,
                });
            }

            let one_time_prekey = match initial.one_time_prekey_id {
                Some(id) => {
                    Some(vault.consume_one_time(id).ok_or(SessionError::Negotiation {
                        peer,
                        reason: NegotiationReason::OneTimePreKeyConsumed,
                    })?)
                },
                None => None,
            };

            let keys = ResponderKeys {
                identity: vault.identity(),
                signed_prekey: vault.signed_prekey(),
                one_time_prekey,
            };
            (x3dh::respond(&keys, &initial), vault.signed_prekey().clone())
        };

        let ratchet = DoubleRatchet::responder(agreement.shared_secret, ratchet_secret);
        let mut record =
            SessionRecord::responder(initial.identity_key, ratchet, agreement.associated_data);
        let plaintext = record.decrypt(rng, envelope)?;

        self.store.pin_identity(self.user, peer, initial.identity_key).await?;
        self.persist(peer, &record).await?;
        tracing::info!(user = %self.user, %peer, "session bootstrapped from prekey envelope");
        Ok(plaintext)
    }

    async fn persist(&self, peer: UserId, record: &SessionRecord) -> Result<(), SessionError> {
        let blob = record.to_blob()?;
        self.store.store_session(self.user, peer, blob).await?;
        Ok(())
    }

    fn peer_lock(&self, peer: UserId) -> Result<Arc<tokio::sync::Mutex<()>>, SessionError> {
        let mut locks = self
            .peer_locks
            .lock()
            .map_err(|_| StoreError::Backend("peer lock table poisoned".into()))?;
        Ok(locks.entry(peer).or_default().clone())
    }

    fn lock_vault(&self) -> Result<std::sync::MutexGuard<'_, PreKeyVault>, SessionError> {
        self.vault
            .lock()
            .map_err(|_| SessionError::Store(StoreError::Backend("vault mutex poisoned".into())))
    }
}

impl<S, F, T> std::fmt::Debug for SessionManager<S, F, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager").field("user", &self.user).finish()
    }
}

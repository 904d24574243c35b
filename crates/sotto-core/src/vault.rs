//! Identity and prekey material.
//!
//! The vault is the only holder of a user's secret keys: the long-term
//! identity, the current signed prekey, and a batch of one-time prekeys.
//! [`PreKeyVault::publish`] exposes public halves only; nothing secret ever
//! leaves this type.

use std::collections::BTreeMap;

use rand_core::CryptoRngCore;
use sotto_crypto::Signature;
use sotto_crypto::keys::{IdentityKeyPair, SecretKey};
use sotto_crypto::x3dh::{PreKeyBundle, prekey_signing_message};
use sotto_proto::UserId;

/// A user's long-term identity plus the prekeys offered for asynchronous
/// session establishment.
///
/// One-time prekeys are strictly single-use: [`PreKeyVault::consume_one_time`]
/// removes the secret, and a consumed id can never be resolved again.
/// [`PreKeyVault::replenish`] mints a fresh batch with new ids, so a
/// republished bundle rotates the offered prekey rather than reusing one.
pub struct PreKeyVault {
    user: UserId,
    identity: IdentityKeyPair,
    registration_id: u32,
    signed_prekey_id: u32,
    signed_prekey: SecretKey,
    signed_prekey_signature: Signature,
    one_time: BTreeMap<u32, SecretKey>,
    next_one_time_id: u32,
}

impl PreKeyVault {
    /// Generate fresh identity material for `user`.
    ///
    /// Without this material the user can neither establish nor accept
    /// sessions, so callers treat failure to construct a vault as fatal.
    pub fn generate<R: CryptoRngCore>(rng: &mut R, user: UserId, one_time_count: u32) -> Self {
        let identity = IdentityKeyPair::generate(rng);
        let registration_id = rng.next_u32();

        let signed_prekey = SecretKey::generate(rng);
        let signed_prekey_signature = identity
            .sign(&prekey_signing_message(&identity.public_key(), &signed_prekey.public_key()));

        let mut vault = Self {
            user,
            identity,
            registration_id,
            signed_prekey_id: 1,
            signed_prekey,
            signed_prekey_signature,
            one_time: BTreeMap::new(),
            next_one_time_id: 1,
        };
        vault.replenish(rng, one_time_count);
        vault
    }

    /// The owning user.
    pub fn user(&self) -> UserId {
        self.user
    }

    /// The key registration id stamped into outgoing envelopes.
    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    /// The long-term identity keypair.
    pub fn identity(&self) -> &IdentityKeyPair {
        &self.identity
    }

    /// Id of the current signed prekey.
    pub fn signed_prekey_id(&self) -> u32 {
        self.signed_prekey_id
    }

    /// Secret half of the current signed prekey.
    pub fn signed_prekey(&self) -> &SecretKey {
        &self.signed_prekey
    }

    /// Public bundle for publication.
    ///
    /// Offers the lowest-id one-time prekey still unconsumed, or none if the
    /// batch is exhausted. Contains only public material.
    pub fn publish(&self) -> PreKeyBundle {
        PreKeyBundle {
            identity_key: self.identity.public_key(),
            verifying_key: self.identity.verifying_key(),
            registration_id: self.registration_id,
            signed_prekey_id: self.signed_prekey_id,
            signed_prekey: self.signed_prekey.public_key(),
            signed_prekey_signature: self.signed_prekey_signature,
            one_time_prekey: self
                .one_time
                .iter()
                .next()
                .map(|(id, secret)| (*id, secret.public_key())),
        }
    }

    /// Remove and return the one-time prekey secret for `id`.
    ///
    /// Returns `None` if the id was never minted or already consumed;
    /// callers map that to a refused negotiation.
    pub fn consume_one_time(&mut self, id: u32) -> Option<SecretKey> {
        self.one_time.remove(&id)
    }

    /// Number of one-time prekeys still available.
    pub fn one_time_remaining(&self) -> usize {
        self.one_time.len()
    }

    /// Mint `count` fresh one-time prekeys with previously unused ids.
    pub fn replenish<R: CryptoRngCore>(&mut self, rng: &mut R, count: u32) {
        for _ in 0..count {
            self.one_time.insert(self.next_one_time_id, SecretKey::generate(rng));
            self.next_one_time_id += 1;
        }
    }
}

impl std::fmt::Debug for PreKeyVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreKeyVault")
            .field("user", &self.user)
            .field("signed_prekey_id", &self.signed_prekey_id)
            .field("one_time_remaining", &self.one_time.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    #[test]
    fn published_bundle_verifies() {
        let vault = PreKeyVault::generate(&mut OsRng, UserId(1), 4);
        let bundle = vault.publish();

        bundle.verify().unwrap();
        assert_eq!(bundle.registration_id, vault.registration_id());
        assert_eq!(bundle.one_time_prekey.map(|(id, _)| id), Some(1));
    }

    #[test]
    fn consume_is_single_use() {
        let mut vault = PreKeyVault::generate(&mut OsRng, UserId(1), 2);

        assert!(vault.consume_one_time(1).is_some());
        assert!(vault.consume_one_time(1).is_none());
        assert_eq!(vault.one_time_remaining(), 1);
    }

    #[test]
    fn publish_offers_next_prekey_after_consumption() {
        let mut vault = PreKeyVault::generate(&mut OsRng, UserId(1), 2);

        vault.consume_one_time(1);
        assert_eq!(vault.publish().one_time_prekey.map(|(id, _)| id), Some(2));

        vault.consume_one_time(2);
        assert!(vault.publish().one_time_prekey.is_none());
    }

    #[test]
    fn replenish_mints_fresh_ids() {
        let mut vault = PreKeyVault::generate(&mut OsRng, UserId(1), 2);
        vault.consume_one_time(1);
        vault.consume_one_time(2);

        vault.replenish(&mut OsRng, 2);
        assert_eq!(vault.one_time_remaining(), 2);
        // Consumed ids are never reissued.
        assert!(vault.consume_one_time(1).is_none());
        assert!(vault.consume_one_time(3).is_some());
    }
}

//! Asynchronous key agreement.
//!
//! The responder publishes a prekey bundle while online; the initiator can
//! then establish a shared secret at any later time without the responder's
//! participation. The first encrypted message carries an [`InitialMessage`]
//! so the responder can derive the same secret when it comes back.
//!
//! # Protocol
//!
//! With the responder's identity key `IK_r`, signed prekey `SPK_r`, and
//! optional one-time prekey `OPK_r`, the initiator generates an ephemeral
//! key `EK_i` and computes:
//!
//! ```text
//! DH1 = DH(IK_i, SPK_r)
//! DH2 = DH(EK_i, IK_r)
//! DH3 = DH(EK_i, SPK_r)
//! DH4 = DH(EK_i, OPK_r)        (only when an OPK was offered)
//! SK  = KDF(DH1 || DH2 || DH3 || [DH4])
//! ```
//!
//! The responder mirrors the computation from its secret halves.
//!
//! # Security
//!
//! The signed prekey signature is verified before any DH is performed; it
//! binds the agreement identity and the prekey under the bundle's signing
//! identity, so neither can be substituted without invalidating the
//! signature. One-time prekeys are single-use: the caller supplies the
//! consumed secret to [`respond`] and must never supply it again.

use ed25519_dalek::{Signature, VerifyingKey};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::kdf::{SymmetricKey, derive_agreement_secret};
use crate::keys::{IdentityKeyPair, PublicKey, SecretKey, verify_signature};

/// Published public key material enabling offline session establishment.
///
/// Immutable once fetched for a negotiation; a republished bundle replaces
/// the previous one wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreKeyBundle {
    /// Owner's long-term X25519 agreement key.
    pub identity_key: PublicKey,
    /// Owner's long-term Ed25519 verification key.
    pub verifying_key: VerifyingKey,
    /// Owner's key registration id.
    pub registration_id: u32,
    /// Id of the signed prekey below.
    pub signed_prekey_id: u32,
    /// Medium-term signed prekey.
    pub signed_prekey: PublicKey,
    /// Signature over `identity_key || signed_prekey` under `verifying_key`.
    pub signed_prekey_signature: Signature,
    /// A single offered one-time prekey, if any remain.
    pub one_time_prekey: Option<(u32, PublicKey)>,
}

impl PreKeyBundle {
    /// Verify the signed-prekey signature.
    ///
    /// # Errors
    ///
    /// [`crate::CryptoError::InvalidSignature`] if the bundle was not signed
    /// by the holder of `verifying_key`, or if either bound key was swapped.
    pub fn verify(&self) -> Result<()> {
        verify_signature(
            &self.verifying_key,
            &prekey_signing_message(&self.identity_key, &self.signed_prekey),
            &self.signed_prekey_signature,
        )
    }
}

/// The byte string a signed prekey commits to.
///
/// Binds the agreement identity to the prekey so neither can be replaced
/// independently.
pub fn prekey_signing_message(identity_key: &PublicKey, signed_prekey: &PublicKey) -> [u8; 64] {
    let mut message = [0u8; 64];
    message[..32].copy_from_slice(identity_key.as_bytes());
    message[32..].copy_from_slice(signed_prekey.as_bytes());
    message
}

/// Key agreement material the initiator sends alongside its first message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialMessage {
    /// Initiator's long-term agreement key.
    pub identity_key: PublicKey,
    /// Initiator's ephemeral key for this session.
    pub ephemeral_key: PublicKey,
    /// Id of the responder signed prekey the initiator used.
    pub signed_prekey_id: u32,
    /// Id of the consumed one-time prekey, if the bundle offered one.
    pub one_time_prekey_id: Option<u32>,
}

/// Initiator-side agreement output.
#[derive(Debug)]
pub struct InitiatorResult {
    /// The derived session secret.
    pub shared_secret: SymmetricKey,
    /// Material the responder needs to derive the same secret.
    pub initial_message: InitialMessage,
    /// `IK_initiator || IK_responder`, authenticated with every message.
    pub associated_data: Vec<u8>,
}

/// Responder-side agreement output.
#[derive(Debug)]
pub struct ResponderResult {
    /// The derived session secret, equal to the initiator's.
    pub shared_secret: SymmetricKey,
    /// `IK_initiator || IK_responder`, authenticated with every message.
    pub associated_data: Vec<u8>,
}

/// The responder's secret halves, borrowed from its vault.
///
/// `one_time_prekey` is the consumed secret for the id named in the
/// [`InitialMessage`]; passing it here is what makes the prekey single-use.
pub struct ResponderKeys<'a> {
    /// Long-term identity.
    pub identity: &'a IdentityKeyPair,
    /// Current signed prekey secret.
    pub signed_prekey: &'a SecretKey,
    /// Consumed one-time prekey secret, if the initiator used one.
    pub one_time_prekey: Option<SecretKey>,
}

/// Initiate key agreement against a fetched bundle.
///
/// Verifies the bundle signature, generates the ephemeral key, and derives
/// the session secret.
///
/// # Errors
///
/// [`crate::CryptoError::InvalidSignature`] if the bundle fails
/// verification; nothing is derived in that case.
pub fn initiate<R: CryptoRngCore>(
    rng: &mut R,
    local_identity: &IdentityKeyPair,
    bundle: &PreKeyBundle,
) -> Result<InitiatorResult> {
    bundle.verify()?;

    let ephemeral = SecretKey::generate(rng);

    let dh1 = local_identity.secret_key().diffie_hellman(&bundle.signed_prekey);
    let dh2 = ephemeral.diffie_hellman(&bundle.identity_key);
    let dh3 = ephemeral.diffie_hellman(&bundle.signed_prekey);
    let (dh4, one_time_prekey_id) = match bundle.one_time_prekey {
        Some((id, key)) => (Some(ephemeral.diffie_hellman(&key)), Some(id)),
        None => (None, None),
    };

    let shared_secret = derive_agreement_secret(&dh1, &dh2, &dh3, dh4.as_ref());

    Ok(InitiatorResult {
        shared_secret,
        initial_message: InitialMessage {
            identity_key: local_identity.public_key(),
            ephemeral_key: ephemeral.public_key(),
            signed_prekey_id: bundle.signed_prekey_id,
            one_time_prekey_id,
        },
        associated_data: associated_data(&local_identity.public_key(), &bundle.identity_key),
    })
}

/// Mirror the agreement from the responder's side.
///
/// The caller is responsible for having consumed the one-time prekey named
/// in `initial` and supplying its secret in `keys`.
pub fn respond(keys: &ResponderKeys<'_>, initial: &InitialMessage) -> ResponderResult {
    let dh1 = keys.signed_prekey.diffie_hellman(&initial.identity_key);
    let dh2 = keys.identity.secret_key().diffie_hellman(&initial.ephemeral_key);
    let dh3 = keys.signed_prekey.diffie_hellman(&initial.ephemeral_key);
    let dh4 = keys
        .one_time_prekey
        .as_ref()
        .map(|opk| opk.diffie_hellman(&initial.ephemeral_key));

    ResponderResult {
        shared_secret: derive_agreement_secret(&dh1, &dh2, &dh3, dh4.as_ref()),
        associated_data: associated_data(&initial.identity_key, &keys.identity.public_key()),
    }
}

fn associated_data(initiator: &PublicKey, responder: &PublicKey) -> Vec<u8> {
    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(initiator.as_bytes());
    data.extend_from_slice(responder.as_bytes());
    data
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    struct TestResponder {
        identity: IdentityKeyPair,
        signed_prekey: SecretKey,
        one_time_prekey: Option<SecretKey>,
        bundle: PreKeyBundle,
    }

    fn responder(with_opk: bool) -> TestResponder {
        let identity = IdentityKeyPair::generate(&mut OsRng);
        let signed_prekey = SecretKey::generate(&mut OsRng);
        let one_time_prekey = with_opk.then(|| SecretKey::generate(&mut OsRng));

        let signature = identity
            .sign(&prekey_signing_message(&identity.public_key(), &signed_prekey.public_key()));
        let bundle = PreKeyBundle {
            identity_key: identity.public_key(),
            verifying_key: identity.verifying_key(),
            registration_id: 4242,
            signed_prekey_id: 1,
            signed_prekey: signed_prekey.public_key(),
            signed_prekey_signature: signature,
            one_time_prekey: one_time_prekey.as_ref().map(|opk| (1, opk.public_key())),
        };

        TestResponder { identity, signed_prekey, one_time_prekey, bundle }
    }

    #[test]
    fn both_sides_derive_the_same_secret_with_opk() {
        let initiator = IdentityKeyPair::generate(&mut OsRng);
        let TestResponder { identity, signed_prekey, one_time_prekey, bundle } = responder(true);

        let init = initiate(&mut OsRng, &initiator, &bundle).unwrap();
        assert_eq!(init.initial_message.one_time_prekey_id, Some(1));

        let resp = respond(
            &ResponderKeys { identity: &identity, signed_prekey: &signed_prekey, one_time_prekey },
            &init.initial_message,
        );

        assert_eq!(init.shared_secret.as_bytes(), resp.shared_secret.as_bytes());
        assert_eq!(init.associated_data, resp.associated_data);
    }

    #[test]
    fn both_sides_derive_the_same_secret_without_opk() {
        let initiator = IdentityKeyPair::generate(&mut OsRng);
        let TestResponder { identity, signed_prekey, bundle, .. } = responder(false);

        let init = initiate(&mut OsRng, &initiator, &bundle).unwrap();
        assert_eq!(init.initial_message.one_time_prekey_id, None);

        let resp = respond(
            &ResponderKeys {
                identity: &identity,
                signed_prekey: &signed_prekey,
                one_time_prekey: None,
            },
            &init.initial_message,
        );

        assert_eq!(init.shared_secret.as_bytes(), resp.shared_secret.as_bytes());
    }

    #[test]
    fn corrupted_signature_is_rejected() {
        let initiator = IdentityKeyPair::generate(&mut OsRng);
        let mut bundle = responder(true).bundle;

        let mut bytes = bundle.signed_prekey_signature.to_bytes();
        bytes[0] ^= 0xFF;
        bundle.signed_prekey_signature = Signature::from_bytes(&bytes);

        assert!(initiate(&mut OsRng, &initiator, &bundle).is_err());
    }

    #[test]
    fn substituted_identity_key_is_rejected() {
        let initiator = IdentityKeyPair::generate(&mut OsRng);
        let attacker = IdentityKeyPair::generate(&mut OsRng);
        let mut bundle = responder(true).bundle;

        bundle.identity_key = attacker.public_key();
        assert!(initiate(&mut OsRng, &initiator, &bundle).is_err());
    }

    #[test]
    fn reused_signature_over_new_prekey_is_rejected() {
        let initiator = IdentityKeyPair::generate(&mut OsRng);
        let mut bundle = responder(true).bundle;

        bundle.signed_prekey = SecretKey::generate(&mut OsRng).public_key();
        assert!(initiate(&mut OsRng, &initiator, &bundle).is_err());
    }

    #[test]
    fn bundle_roundtrips_through_cbor() {
        let bundle = responder(true).bundle;
        let mut encoded = Vec::new();
        ciborium::ser::into_writer(&bundle, &mut encoded).unwrap();
        let decoded: PreKeyBundle = ciborium::de::from_reader(encoded.as_slice()).unwrap();

        assert_eq!(decoded.identity_key, bundle.identity_key);
        assert_eq!(decoded.registration_id, bundle.registration_id);
        assert_eq!(decoded.one_time_prekey, bundle.one_time_prekey);
        decoded.verify().unwrap();
    }
}

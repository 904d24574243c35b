//! Identity trust policy.
//!
//! The negotiator never decides on its own whether a peer's claimed identity
//! key is acceptable; it consults a [`TrustPolicy`]. The default policy pins
//! the first identity seen for a peer and rejects unexplained changes, which
//! is the difference between "encrypted" and "encrypted to whoever answered".

use sotto_crypto::PublicKey;
use sotto_proto::UserId;

/// Outcome of a trust evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    /// Proceed with this identity.
    Trusted,
    /// Refuse the negotiation.
    Rejected,
}

/// Decides whether a claimed identity key may be used for a peer.
///
/// `pinned` is the identity previously recorded for the peer, if any.
/// Implementations must be pure decisions - pinning itself is done by the
/// caller after a successful negotiation.
pub trait TrustPolicy: Send + Sync {
    /// Evaluate `claimed` as `peer`'s identity key.
    fn evaluate(&self, peer: UserId, claimed: &PublicKey, pinned: Option<&PublicKey>)
    -> TrustDecision;
}

/// Trust the first identity seen per peer; reject any later change.
///
/// A legitimate reinstall shows up as a rejection here and requires an
/// explicit reset of the stored session before the new identity is accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustOnFirstUse;

impl TrustPolicy for TrustOnFirstUse {
    fn evaluate(
        &self,
        peer: UserId,
        claimed: &PublicKey,
        pinned: Option<&PublicKey>,
    ) -> TrustDecision {
        match pinned {
            None => TrustDecision::Trusted,
            Some(known) if known == claimed => TrustDecision::Trusted,
            Some(_) => {
                tracing::warn!(%peer, "identity key changed; rejecting negotiation");
                TrustDecision::Rejected
            },
        }
    }
}

/// Accept every identity unconditionally.
///
/// Exists for tests and for embedders that verify identities out of band.
/// Not a sensible default.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl TrustPolicy for AcceptAll {
    fn evaluate(&self, _: UserId, _: &PublicKey, _: Option<&PublicKey>) -> TrustDecision {
        TrustDecision::Trusted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> PublicKey {
        PublicKey::from_bytes([byte; 32])
    }

    #[test]
    fn first_use_is_trusted() {
        let decision = TrustOnFirstUse.evaluate(UserId(1), &key(1), None);
        assert_eq!(decision, TrustDecision::Trusted);
    }

    #[test]
    fn matching_pin_is_trusted() {
        let decision = TrustOnFirstUse.evaluate(UserId(1), &key(1), Some(&key(1)));
        assert_eq!(decision, TrustDecision::Trusted);
    }

    #[test]
    fn changed_identity_is_rejected() {
        let decision = TrustOnFirstUse.evaluate(UserId(1), &key(2), Some(&key(1)));
        assert_eq!(decision, TrustDecision::Rejected);
    }

    #[test]
    fn accept_all_ignores_the_pin() {
        let decision = AcceptAll.evaluate(UserId(1), &key(2), Some(&key(1)));
        assert_eq!(decision, TrustDecision::Trusted);
    }
}

//! Session-layer error taxonomy.
//!
//! Errors here follow one propagation rule: no internal detail crosses a
//! trust boundary. A peer that cannot decrypt learns only that the message
//! was undecryptable; the cause stays in local logs.

use sotto_proto::UserId;
use thiserror::Error;

/// Why a negotiation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NegotiationReason {
    /// The bundle's signed-prekey signature did not verify.
    #[error("bundle signature invalid")]
    InvalidSignature,

    /// The trust policy rejected the peer's claimed identity key.
    #[error("identity key rejected by trust policy")]
    UntrustedIdentity,

    /// The initiator referenced a signed prekey this side no longer holds.
    #[error("referenced signed prekey is unknown")]
    UnknownSignedPreKey,

    /// The initiator referenced a one-time prekey that was already consumed
    /// or never existed.
    #[error("referenced one-time prekey is unknown or already consumed")]
    OneTimePreKeyConsumed,
}

/// Failures surfaced by the session layer.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The peer has never published a bundle; no session can be initiated.
    #[error("{0} has no published bundle")]
    BundleNotFound(UserId),

    /// The peer's published bundle could not be decoded.
    #[error("published bundle for {0} is malformed")]
    BundleMalformed(UserId),

    /// Negotiation refused; nothing was sent and no session was installed.
    #[error("negotiation with {peer} failed: {reason}")]
    Negotiation {
        /// The peer the negotiation targeted.
        peer: UserId,
        /// Why it was refused.
        reason: NegotiationReason,
    },

    /// An inbound message could not be decrypted. Per-message and
    /// recoverable: the session (if any) is untouched and later messages
    /// may still decrypt.
    #[error("message could not be decrypted")]
    Undecryptable,

    /// Decrypt of a non-bootstrap message with no session on record.
    #[error("no session established with {0}")]
    NoSession(UserId),

    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures in the storage backends behind the session layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend itself failed (I/O, connection, quota).
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored blob exists but cannot be decoded.
    #[error("stored blob is corrupt")]
    Corrupt,
}
